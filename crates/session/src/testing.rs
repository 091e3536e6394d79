//! Deterministic stand-ins for a session's collaborators.
//!
//! [`ManualTimers`] only fires when told to, [`RecordingNotifier`] keeps every
//! notice, and [`SharedWriter`] captures outgoing frames (and can be made to
//! fail).

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use transport::{FrameDecoder, Message, codec};

use crate::notify::Notifier;
use crate::timer::{TimerCallback, TimerFacility, TimerId, TimerToken};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ManualTimersState {
    next_id: TimerId,
    active: HashMap<TimerId, TimerCallback>,
    durations: HashMap<TimerId, Duration>,
    cancelled: Vec<TimerId>,
}

/// A timer facility driven by the test.
#[derive(Clone, Default)]
pub struct ManualTimers {
    state: Arc<Mutex<ManualTimersState>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the timer now. Returns `false` if it was cancelled or already
    /// fired.
    pub fn fire(&self, id: TimerId) -> bool {
        let callback = lock(&self.state).active.remove(&id);
        match callback {
            Some(on_fire) => {
                on_fire(id);
                true
            }
            None => false,
        }
    }

    /// Fire every active timer in start order. Returns how many fired.
    pub fn fire_all(&self) -> usize {
        self.active().into_iter().filter(|id| self.fire(*id)).count()
    }

    /// Ids of timers that have neither fired nor been cancelled, in start
    /// order.
    pub fn active(&self) -> Vec<TimerId> {
        let mut ids: Vec<_> = lock(&self.state).active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The duration a timer was started with.
    pub fn duration(&self, id: TimerId) -> Option<Duration> {
        lock(&self.state).durations.get(&id).copied()
    }

    pub fn is_cancelled(&self, id: TimerId) -> bool {
        lock(&self.state).cancelled.contains(&id)
    }
}

impl TimerFacility for ManualTimers {
    fn start(&self, duration: Duration, on_fire: TimerCallback) -> TimerToken {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.active.insert(id, on_fire);
        state.durations.insert(id, duration);

        let shared = Arc::clone(&self.state);
        TimerToken::new(id, move || {
            let mut state = lock(&shared);
            if state.active.remove(&id).is_some() {
                state.cancelled.push(id);
            }
        })
    }
}

/// Keeps every notice it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }
}

#[derive(Default)]
struct SharedWriterState {
    written: Vec<u8>,
    fail: bool,
}

/// An in-memory write half whose contents stay readable after it is handed
/// to a session.
#[derive(Clone, Default)]
pub struct SharedWriter {
    state: Arc<Mutex<SharedWriterState>>,
}

impl SharedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every byte written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Decode everything written so far.
    pub fn messages(&self) -> Vec<Message> {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&self.written());
        std::iter::from_fn(|| decoder.next_frame())
            .filter_map(|body| codec::decode(&body).ok())
            .collect()
    }

    /// Make subsequent writes fail with `BrokenPipe`.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"));
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
