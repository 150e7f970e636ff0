use crate::error::Error;
use crate::functions::split_call;
use crate::runner::CommandRunner;

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::char,
    error::{Error as NomError, ErrorKind},
    sequence::preceded,
    IResult,
};
use std::collections::BTreeMap;
use std::env;
use tracing::{debug, trace};

/// Upper bound on substitution passes over one line; a value that keeps
/// referring to itself never reaches a fixed point.
const MAX_PASSES: usize = 100;

/// The variable table of one build file, plus how it is consulted.
#[derive(Clone, Debug, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
    env_first: bool,
}

impl Variables {
    /// With `env_first`, the process environment shadows the table.
    pub fn new(env_first: bool) -> Variables {
        Variables {
            values: BTreeMap::new(),
            env_first,
        }
    }

    /// Stores an already expanded value; a later assignment wins.
    pub fn set(&mut self, name: &str, value: String) {
        debug!(name, value = %value, "variable");
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Rewrites `line` until no `$name` or `$(body)` reference is left.
    /// References to nothing expand to the empty string.
    pub fn expand(&self, line: &str, runner: &dyn CommandRunner) -> Result<String, Error> {
        let mut current = line.to_string();
        for _ in 0..MAX_PASSES {
            trace!(line = %current, "before expand");
            match self.expand_once(&current, runner)? {
                Some(next) => current = next,
                None => {
                    if current != line {
                        debug!(from = %line, to = %current, "expanded");
                    }
                    return Ok(current);
                }
            }
        }

        Err(Error::Unterminated(line.to_string()))
    }

    /// One left-to-right substitution pass, `None` when nothing matched.
    fn expand_once(
        &self,
        line: &str,
        runner: &dyn CommandRunner,
    ) -> Result<Option<String>, Error> {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;
        let mut found = false;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            match reference(&rest[pos..]) {
                Ok((after, body)) => {
                    out.push_str(&self.resolve(body, runner)?);
                    rest = after;
                    found = true;
                }
                Err(_) => {
                    out.push('$');
                    rest = &rest[pos + 1..];
                }
            }
        }

        out.push_str(rest);
        Ok(if found { Some(out) } else { None })
    }

    /// Nested references in `body` are expanded before it is looked up, so
    /// both `$(shell $(CMD))` and computed names like `$($(KIND)_FLAGS)` work.
    fn resolve(&self, body: &str, runner: &dyn CommandRunner) -> Result<String, Error> {
        let body = self.expand(body.trim(), runner)?;
        let body = body.as_str();
        if let Some((function, arg)) = split_call(body) {
            return function.call(arg, runner);
        }

        if self.env_first {
            if let Ok(value) = env::var(body) {
                return Ok(value);
            }
        }

        match self.get(body) {
            Some(value) => Ok(value.to_string()),
            None => Ok(env::var(body).unwrap_or_default()),
        }
    }
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `$name` or `$(body)`, yielding the name or body.
fn reference(i: &str) -> IResult<&str, &str> {
    preceded(char('$'), alt((parenthesized, take_while1(is_word))))(i)
}

/// A non-empty body between balanced parentheses.
fn parenthesized(i: &str) -> IResult<&str, &str> {
    let (rest, _) = char::<_, NomError<&str>>('(')(i)?;
    let mut depth = 1;
    for (pos, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && pos > 0 {
                    return Ok((&rest[pos + 1..], &rest[..pos]));
                } else if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
    }

    Err(nom::Err::Error(NomError::new(i, ErrorKind::Char)))
}

#[cfg(test)]
use crate::runner::RecordingRunner;

#[cfg(test)]
fn variables(pairs: &[(&str, &str)]) -> Variables {
    let mut vars = Variables::new(false);
    for (name, value) in pairs {
        vars.set(name, value.to_string());
    }
    vars
}

#[test]
fn test_reference() {
    assert_eq!(reference("$CC rest"), Ok((" rest", "CC")));
    assert_eq!(reference("$(CC)rest"), Ok(("rest", "CC")));
    assert_eq!(reference("$(shell ls -1)"), Ok(("", "shell ls -1")));
    assert_eq!(reference("$a_1-b"), Ok(("-b", "a_1")));
    assert!(reference("$@").is_err());
    assert!(reference("$<").is_err());
    assert!(reference("$()").is_err());
    assert!(reference("$(open").is_err());
    assert!(reference("plain").is_err());
    assert_eq!(reference("$(shell $(CMD)) x"), Ok((" x", "shell $(CMD)")));
    assert_eq!(reference("$(a(b)c)"), Ok(("", "a(b)c")));
}

#[test]
fn test_expand_simple() {
    let runner = RecordingRunner::new();
    let vars = variables(&[("X", "foo"), ("CC", "cc")]);
    assert_eq!(vars.expand("echo $X", &runner).unwrap(), "echo foo");
    assert_eq!(vars.expand("$(CC) -o $@ $<", &runner).unwrap(), "cc -o $@ $<");
    assert_eq!(vars.expand("no references", &runner).unwrap(), "no references");
    assert_eq!(vars.expand("cost $(5", &runner).unwrap(), "cost $(5");
}

#[test]
fn test_expand_recursive() {
    let runner = RecordingRunner::new();
    let vars = variables(&[("A", "$(B)/$C"), ("B", "$C"), ("C", "z")]);
    assert_eq!(vars.expand("[$A]", &runner).unwrap(), "[z/z]");
}

#[test]
fn test_expand_undefined_is_removed() {
    let runner = RecordingRunner::new();
    let vars = variables(&[]);
    assert_eq!(
        vars.expand("a $(MINIMAKE_TEST_UNDEFINED) b", &runner).unwrap(),
        "a  b"
    );
}

#[test]
fn test_expand_is_idempotent() {
    let runner = RecordingRunner::new();
    let vars = variables(&[("A", "$B"), ("B", "x")]);
    for line in &["$A $(B) $@ $<", "plain", "$(MINIMAKE_TEST_UNDEFINED)$$"] {
        let once = vars.expand(line, &runner).unwrap();
        assert_eq!(vars.expand(&once, &runner).unwrap(), once);
    }
}

#[test]
fn test_expand_last_assignment_wins() {
    let runner = RecordingRunner::new();
    let vars = variables(&[("X", "first"), ("X", "second")]);
    assert_eq!(vars.get("X"), Some("second"));
    assert_eq!(vars.expand("$X", &runner).unwrap(), "second");
}

#[test]
fn test_expand_shell() {
    let runner = RecordingRunner::new().with_output("git rev-parse HEAD", "abc123\n");
    let vars = variables(&[("CMD", "git rev-parse HEAD")]);
    assert_eq!(
        vars.expand("rev=$(shell $(CMD))", &runner).unwrap(),
        "rev=abc123\n"
    );
    assert_eq!(runner.runs(), vec!["git rev-parse HEAD"]);
}

#[test]
fn test_expand_computed_name() {
    let runner = RecordingRunner::new();
    let vars = variables(&[("KIND", "DEBUG"), ("DEBUG_FLAGS", "-g -O0")]);
    assert_eq!(vars.expand("cc $($(KIND)_FLAGS)", &runner).unwrap(), "cc -g -O0");
}

#[test]
fn test_expand_shell_failure() {
    let runner = RecordingRunner::new().failing("false");
    let vars = variables(&[]);
    assert!(matches!(
        vars.expand("$(shell false)", &runner),
        Err(Error::CommandFailed { .. })
    ));
}

#[test]
fn test_expand_environment_precedence() {
    let runner = RecordingRunner::new();
    env::set_var("MINIMAKE_TEST_PRECEDENCE", "env");
    env::set_var("MINIMAKE_TEST_FALLBACK", "fallback");

    let mut vars = Variables::new(false);
    vars.set("MINIMAKE_TEST_PRECEDENCE", "table".to_string());
    assert_eq!(vars.expand("$MINIMAKE_TEST_PRECEDENCE", &runner).unwrap(), "table");
    assert_eq!(vars.expand("$MINIMAKE_TEST_FALLBACK", &runner).unwrap(), "fallback");
    assert_eq!(
        vars.expand("$(env MINIMAKE_TEST_PRECEDENCE)", &runner).unwrap(),
        "env"
    );

    let mut vars = Variables::new(true);
    vars.set("MINIMAKE_TEST_PRECEDENCE", "table".to_string());
    assert_eq!(vars.expand("$MINIMAKE_TEST_PRECEDENCE", &runner).unwrap(), "env");
}

#[test]
fn test_expand_self_reference() {
    let runner = RecordingRunner::new();
    let vars = variables(&[("LOOP", "x$(LOOP)")]);
    assert!(matches!(
        vars.expand("$(LOOP)", &runner),
        Err(Error::Unterminated(_))
    ));
}
