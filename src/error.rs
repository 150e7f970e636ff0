use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// What went wrong on a line of the build file.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SyntaxError {
    #[error("unexpected indentation")]
    UnexpectedIndentation,

    #[error("invalid target")]
    InvalidTarget,

    #[error("invalid .PHONY target")]
    InvalidPhony,

    #[error("target {0:?} already exists")]
    DuplicateTarget(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("{kind} near {text:?} (line {line})")]
    Syntax {
        kind: SyntaxError,
        line: usize,
        text: String,
    },

    #[error("no targets")]
    NoTargets,

    #[error("unknown target {0:?}")]
    UnknownTarget(String),

    #[error("circular dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("expansion of {0:?} does not terminate")]
    Unterminated(String),

    #[error("cannot run `{command}`: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("`{command}` failed with {}", exit_description(.code))]
    CommandFailed { command: String, code: Option<i32> },
}

impl Error {
    pub fn syntax(kind: SyntaxError, line: usize, text: &str) -> Error {
        Error::Syntax {
            kind,
            line,
            text: text.to_string(),
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "a signal".to_string(),
    }
}

#[test]
fn test_error_display() {
    assert_eq!(
        Error::syntax(SyntaxError::InvalidTarget, 3, "all").to_string(),
        "invalid target near \"all\" (line 3)"
    );
    assert_eq!(
        Error::Cycle(vec!["a".into(), "b".into(), "a".into()]).to_string(),
        "circular dependency: a -> b -> a"
    );
    assert_eq!(
        Error::CommandFailed {
            command: "false".into(),
            code: Some(1)
        }
        .to_string(),
        "`false` failed with exit status 1"
    );
}
