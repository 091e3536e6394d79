//! Timer facility used for request timeouts.
//!
//! A session never sleeps itself. It asks a [`TimerFacility`] to call it back
//! after a request's timeout and keeps the returned [`TimerToken`] in the
//! ledger entry. Every path that removes the entry cancels the token, and a
//! callback that fires anyway finds no entry and does nothing.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Identity of one started timer. Unique per facility.
pub type TimerId = u64;

/// Invoked with the timer's id when it fires.
pub type TimerCallback = Box<dyn FnOnce(TimerId) + Send + 'static>;

pub trait TimerFacility: Send + Sync {
    /// Schedule `on_fire` to run once `duration` has elapsed.
    ///
    /// The facility may be shared by several sessions; the callback carries
    /// everything needed to reach its owner.
    fn start(&self, duration: Duration, on_fire: TimerCallback) -> TimerToken;
}

/// Handle to a started timer.
pub struct TimerToken {
    id: TimerId,
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerToken {
    pub fn new(id: TimerId, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Stop the timer from firing. Has no effect if it already fired.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerToken").field("id", &self.id).finish()
    }
}

enum Command {
    Start {
        id: TimerId,
        deadline: Instant,
        on_fire: TimerCallback,
    },
    Cancel(TimerId),
}

/// A timer facility backed by one background thread.
///
/// Callbacks run on that thread, one after another.
pub struct ThreadTimers {
    next_id: AtomicU64,
    commands: Sender<Command>,
}

impl ThreadTimers {
    pub fn new() -> Self {
        let (commands, rx) = crossbeam_channel::unbounded();
        thread::spawn(move || run_timers(rx));
        Self {
            next_id: AtomicU64::new(0),
            commands,
        }
    }
}

impl Default for ThreadTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerFacility for ThreadTimers {
    fn start(&self, duration: Duration, on_fire: TimerCallback) -> TimerToken {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let command = Command::Start {
            id,
            deadline: Instant::now() + duration,
            on_fire,
        };
        if self.commands.send(command).is_err() {
            tracing::error!(timer = id, "timer thread has stopped, timer will never fire");
        }

        let commands = self.commands.clone();
        TimerToken::new(id, move || {
            let _ = commands.send(Command::Cancel(id));
        })
    }
}

fn run_timers(commands: Receiver<Command>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, TimerId)>> = BinaryHeap::new();
    let mut callbacks: HashMap<TimerId, TimerCallback> = HashMap::new();

    loop {
        let now = Instant::now();
        while let Some(&Reverse((deadline, id))) = deadlines.peek() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            // cancelled timers leave a stale heap entry with no callback
            if let Some(on_fire) = callbacks.remove(&id) {
                tracing::debug!(timer = id, "timer fired");
                on_fire(id);
            }
        }

        let command = match deadlines.peek() {
            Some(&Reverse((deadline, _))) => commands.recv_deadline(deadline),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Start {
                id,
                deadline,
                on_fire,
            }) => {
                callbacks.insert(id, on_fire);
                deadlines.push(Reverse((deadline, id)));
            }
            Ok(Command::Cancel(id)) => {
                callbacks.remove(&id);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn timers_fire_in_deadline_order() {
        let timers = ThreadTimers::new();
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut tokens = Vec::new();
        for millis in [60, 20, 40] {
            let tx = tx.clone();
            tokens.push(timers.start(
                Duration::from_millis(millis),
                Box::new(move |_| {
                    let _ = tx.send(millis);
                }),
            ));
        }

        let fired: Vec<u64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec![20, 40, 60]);
    }

    #[test]
    fn callback_receives_its_own_id() {
        let timers = ThreadTimers::new();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let token = timers.start(
            Duration::from_millis(1),
            Box::new(move |id| {
                let _ = tx.send(id);
            }),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), token.id());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let timers = ThreadTimers::new();
        let fired = Arc::new(Mutex::new(Vec::new()));

        let cancelled = {
            let fired = Arc::clone(&fired);
            timers.start(
                Duration::from_millis(30),
                Box::new(move |id| fired.lock().unwrap().push(id)),
            )
        };
        let cancelled_id = cancelled.id();
        cancelled.cancel();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let _later = timers.start(
            Duration::from_millis(80),
            Box::new(move |id| {
                let _ = tx.send(id);
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(!fired.lock().unwrap().contains(&cancelled_id));
    }

    #[test]
    fn ids_are_unique() {
        let timers = ThreadTimers::new();
        let a = timers.start(Duration::from_secs(60), Box::new(|_| {}));
        let b = timers.start(Duration::from_secs(60), Box::new(|_| {}));
        assert_ne!(a.id(), b.id());
        a.cancel();
        b.cancel();
    }
}
