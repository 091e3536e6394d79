//! Rendering of `error.format` templates from failed responses.
//!
//! Adapters describe errors as a format string with `{name}` placeholders and
//! a map of variables, e.g. `"Unable to find {path}"` with
//! `{"path": "/tmp/x.py"}`. Literal braces are written `{{` and `}}`.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("no value for placeholder `{0}`")]
    MissingVariable(String),

    #[error("unclosed `{{` in format string")]
    UnclosedPlaceholder,

    #[error("single `}}` encountered in format string")]
    UnmatchedClose,
}

/// Substitute `variables` into `format`.
///
/// String values are inserted as-is; any other JSON value is inserted as its
/// JSON text.
pub fn render(format: &str, variables: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(TemplateError::UnclosedPlaceholder),
                    }
                }
                match variables.get(name.trim()) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => return Err(TemplateError::MissingVariable(name)),
                }
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(TemplateError::UnmatchedClose),
            c => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("variables must be an object"),
        }
    }

    #[test]
    fn substitutes_named_variables() {
        let rendered = render(
            "Unable to find {path} (attempt {attempt})",
            &vars(json!({"path": "/tmp/x.py", "attempt": 3})),
        )
        .unwrap();
        assert_eq!(rendered, "Unable to find /tmp/x.py (attempt 3)");
    }

    #[test]
    fn escaped_braces() {
        let rendered = render("{{literal}} {v}", &vars(json!({"v": "ok"}))).unwrap();
        assert_eq!(rendered, "{literal} ok");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(render("plain text", &Map::new()).unwrap(), "plain text");
    }

    #[test]
    fn missing_variable() {
        assert_eq!(
            render("{missing}", &Map::new()),
            Err(TemplateError::MissingVariable("missing".to_string()))
        );
    }

    #[test]
    fn unbalanced_braces() {
        assert_eq!(
            render("oops {name", &vars(json!({"name": "x"}))),
            Err(TemplateError::UnclosedPlaceholder)
        );
        assert_eq!(render("oops }", &Map::new()), Err(TemplateError::UnmatchedClose));
    }
}
