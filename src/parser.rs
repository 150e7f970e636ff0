use crate::ast::{self, Assignment, Header, Rule};
use crate::error::{Error, SyntaxError};
use crate::expand::Variables;
use crate::lines::LogicalLines;
use crate::maker::{Maker, Options};
use crate::runner::CommandRunner;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while},
    multi::many0,
    sequence::preceded,
    IResult,
};
use std::fs;
use std::mem;
use std::path::Path;
use tracing::debug;

#[cfg(test)]
use crate::runner::RecordingRunner;
#[cfg(test)]
use maplit::*;
#[cfg(test)]
use std::collections::BTreeSet;

type ParserResult<'a, O> = IResult<&'a str, O>;

/// Reads and parses the build file at `path`.
pub fn parse_file(
    path: &Path,
    options: Options,
    runner: &dyn CommandRunner,
) -> Result<Maker, Error> {
    let source = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&source, options, runner)
}

/// Turns build-file text into a [`Maker`]. Variable references are expanded
/// line by line while reading, so `$(shell ...)` commands run here.
pub fn parse(source: &str, options: Options, runner: &dyn CommandRunner) -> Result<Maker, Error> {
    let mut parser = Parser {
        maker: Maker::new(options),
        variables: Variables::new(options.env_first),
        runner,
        state: State::Start,
    };

    for (number, line) in LogicalLines::new(source) {
        parser.line(number, &line)?;
    }

    parser.finish_rule()?;
    Ok(parser.maker)
}

enum State {
    /// Expecting an assignment or a target header.
    Start,
    /// Collecting indented recipe lines for an open block.
    Recipe(Rule),
}

struct Parser<'r> {
    maker: Maker,
    variables: Variables,
    runner: &'r dyn CommandRunner,
    state: State,
}

impl<'r> Parser<'r> {
    fn line(&mut self, number: usize, raw: &str) -> Result<(), Error> {
        let line = self.variables.expand(raw, self.runner)?;
        let parts = tokens(&line);
        debug!(line = number, ?parts, "tokens");

        if parts.is_empty() {
            return self.finish_rule();
        }

        let indented = line.starts_with(|c: char| c == ' ' || c == '\t');
        if let State::Recipe(rule) = &mut self.state {
            if indented {
                rule.recipes.push(line.trim().to_string());
                return Ok(());
            }
        }

        self.finish_rule()?;

        if let Some(Assignment { name, value }) = assignment(&parts) {
            self.variables.set(name, value);
            return Ok(());
        }

        if indented {
            return Err(Error::syntax(
                SyntaxError::UnexpectedIndentation,
                number,
                &line,
            ));
        }

        match header(&parts) {
            None => Err(Error::syntax(SyntaxError::InvalidTarget, number, &line)),
            Some(Header::Phony(names)) if names.is_empty() => {
                Err(Error::syntax(SyntaxError::InvalidPhony, number, &line))
            }
            Some(Header::Phony(names)) => {
                for name in names {
                    self.maker.add_phony(name);
                }
                Ok(())
            }
            Some(Header::Rule {
                targets,
                prerequisites,
            }) => {
                self.state = State::Recipe(Rule::new(&targets, &prerequisites, number, &line));
                Ok(())
            }
        }
    }

    /// Registers the open block, if any, and goes back to `Start`.
    fn finish_rule(&mut self) -> Result<(), Error> {
        if let State::Recipe(rule) = mem::replace(&mut self.state, State::Start) {
            self.maker.add_rule(rule)?;
        }
        Ok(())
    }
}

/// Splits an expanded line on whitespace, with `=` and `:` always standing
/// alone. A token starting with `#` ends the line.
pub fn tokens(line: &str) -> Vec<&str> {
    let parts = match many0(preceded(take_while(char::is_whitespace), token))(line) {
        Ok((_, parts)) => parts,
        Err(_) => Vec::new(),
    };

    parts
        .into_iter()
        .take_while(|part| !part.starts_with('#'))
        .filter(|part| !part.is_empty())
        .collect()
}

fn token(i: &str) -> ParserResult<&str> {
    alt((tag("="), tag(":"), is_not("=: \t\r\n\u{b}\u{c}")))(i)
}

#[test]
fn test_tokens() {
    assert_eq!(tokens("a = b c"), vec!["a", "=", "b", "c"]);
    assert_eq!(tokens("a=b"), vec!["a", "=", "b"]);
    assert_eq!(tokens("x y:z"), vec!["x", "y", ":", "z"]);
    assert_eq!(tokens("X := 1"), vec!["X", ":", "=", "1"]);
    assert_eq!(tokens("X:=1"), vec!["X", ":", "=", "1"]);
    assert_eq!(tokens("all: build # the default"), vec!["all", ":", "build"]);
    assert_eq!(tokens("a#b c"), vec!["a#b", "c"]);
    assert_eq!(tokens("# just a comment"), Vec::<&str>::new());
    assert_eq!(tokens(" \t "), Vec::<&str>::new());
    assert_eq!(tokens(""), Vec::<&str>::new());
    assert_eq!(tokens("\techo $@ $<"), vec!["echo", "$@", "$<"]);
}

/// Recognizes `name = value...` and `name := value...`.
fn assignment<'a>(parts: &[&'a str]) -> Option<Assignment<'a>> {
    match *parts {
        [name, "=", ref value @ ..] | [name, ":", "=", ref value @ ..] => Some(Assignment {
            name,
            value: value.join(" "),
        }),
        _ => None,
    }
}

#[test]
fn test_assignment() {
    assert_eq!(
        assignment(&["CC", "=", "gcc", "-std=c99"]),
        Some(Assignment {
            name: "CC",
            value: "gcc -std=c99".to_string()
        })
    );
    assert_eq!(
        assignment(&["NOW", ":", "=", "today"]),
        Some(Assignment {
            name: "NOW",
            value: "today".to_string()
        })
    );
    assert_eq!(
        assignment(&["EMPTY", "="]),
        Some(Assignment {
            name: "EMPTY",
            value: "".to_string()
        })
    );
    assert_eq!(assignment(&["all", ":", "build"]), None);
    assert_eq!(assignment(&["all"]), None);
}

/// Recognizes `names : prerequisites`; `None` when there is no `:` or no name
/// before it.
fn header<'a>(parts: &[&'a str]) -> Option<Header<'a>> {
    let colon = parts.iter().position(|part| *part == ":")?;
    let (targets, prerequisites) = (&parts[..colon], &parts[colon + 1..]);

    match targets {
        [] => None,
        [ast::PHONY] => Some(Header::Phony(prerequisites.to_vec())),
        _ => Some(Header::Rule {
            targets: targets.to_vec(),
            prerequisites: prerequisites.to_vec(),
        }),
    }
}

#[test]
fn test_header() {
    assert_eq!(
        header(&["all", ":", "build", "test"]),
        Some(Header::Rule {
            targets: vec!["all"],
            prerequisites: vec!["build", "test"]
        })
    );
    assert_eq!(
        header(&["a", "b", ":"]),
        Some(Header::Rule {
            targets: vec!["a", "b"],
            prerequisites: vec![]
        })
    );
    assert_eq!(
        header(&[".PHONY", ":", "clean", "all"]),
        Some(Header::Phony(vec!["clean", "all"]))
    );
    assert_eq!(header(&[":", "orphan"]), None);
    assert_eq!(header(&["all", "build"]), None);
}

#[cfg(test)]
fn parse_test(source: &str) -> Result<Maker, Error> {
    parse(source, Options::default(), &RecordingRunner::new())
}

#[cfg(test)]
fn syntax_error(result: Result<Maker, Error>) -> (SyntaxError, usize) {
    match result {
        Err(Error::Syntax { kind, line, .. }) => (kind, line),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("parse unexpectedly succeeded"),
    }
}

#[test]
fn test_parse_targets() {
    let maker = parse_test("A: B\n\techo hi\nB:\n\techo bye\n").unwrap();
    assert_eq!(maker.target_names().collect::<Vec<_>>(), vec!["A", "B"]);
    assert_eq!(maker.default_goal(), Some("A"));

    let a = maker.target("A").unwrap();
    assert_eq!(a.prerequisites, vec!["B"]);
    assert_eq!(a.recipes, vec!["echo hi"]);
    assert_eq!(maker.target("B").unwrap().recipes, vec!["echo bye"]);
}

#[test]
fn test_parse_variables() {
    let maker = parse_test("X = foo\nY := $X bar # trailing\nt:\n\techo $X $(Y) $@ $<\n").unwrap();
    assert_eq!(
        maker.target("t").unwrap().recipes,
        vec!["echo foo foo bar $@ $<"]
    );
}

#[test]
fn test_parse_assignment_is_immediate() {
    let maker = parse_test("X = one\nt:\n\techo $X\n\nX = two\nu:\n\techo $X\n").unwrap();
    assert_eq!(maker.target("t").unwrap().recipes, vec!["echo one"]);
    assert_eq!(maker.target("u").unwrap().recipes, vec!["echo two"]);
}

#[test]
fn test_parse_shared_block() {
    let maker = parse_test("a b: c d\n\ttouch $@\n").unwrap();
    for name in &["a", "b"] {
        let target = maker.target(name).unwrap();
        assert_eq!(target.prerequisites, vec!["c", "d"]);
        assert_eq!(target.recipes, vec!["touch $@"]);
    }
    assert_eq!(maker.default_goal(), Some("a"));
}

#[test]
fn test_parse_block_boundaries() {
    // a non-indented line closes the block and is read afresh
    let maker = parse_test("a:\n\techo a\nV = 1\nb:\n    echo b\n  echo $V\n").unwrap();
    assert_eq!(maker.target("a").unwrap().recipes, vec!["echo a"]);
    assert_eq!(maker.target("b").unwrap().recipes, vec!["echo b", "echo 1"]);

    // end of input closes the last block
    let maker = parse_test("last:\n\techo done").unwrap();
    assert_eq!(maker.target("last").unwrap().recipes, vec!["echo done"]);

    // a header with no recipes is still a target
    let maker = parse_test("empty:\n\nother:\n").unwrap();
    assert_eq!(maker.target_names().collect::<Vec<_>>(), vec!["empty", "other"]);
}

#[test]
fn test_parse_continuation() {
    let maker = parse_test("all: a \\\n  b\n\techo one \\\n\t  two\n").unwrap();
    let all = maker.target("all").unwrap();
    assert_eq!(all.prerequisites, vec!["a", "b"]);
    assert_eq!(all.recipes, vec!["echo one two"]);
}

#[test]
fn test_parse_phony() {
    let maker = parse_test(".PHONY: clean all\nall:\nclean:\n\trm -rf out\n").unwrap();
    assert!(maker.is_phony("clean"));
    assert!(maker.is_phony("all"));
    assert!(!maker.is_phony("out"));
    assert_eq!(
        maker.target_names().collect::<BTreeSet<_>>(),
        btreeset!["all", "clean"]
    );
    assert_eq!(maker.default_goal(), Some("all"));

    assert_eq!(
        syntax_error(parse_test(".PHONY:\n")),
        (SyntaxError::InvalidPhony, 1)
    );
}

#[test]
fn test_parse_duplicate_target() {
    assert_eq!(
        syntax_error(parse_test("a:\n\techo 1\n\nb:\n\na:\n\techo 2\n")),
        (SyntaxError::DuplicateTarget("a".to_string()), 6)
    );
    assert_eq!(
        syntax_error(parse_test("x y x:\n")),
        (SyntaxError::DuplicateTarget("x".to_string()), 1)
    );
}

#[test]
fn test_parse_invalid_target() {
    assert_eq!(
        syntax_error(parse_test("all build\n")),
        (SyntaxError::InvalidTarget, 1)
    );
    assert_eq!(
        syntax_error(parse_test("\n: orphan\n")),
        (SyntaxError::InvalidTarget, 2)
    );
}

#[test]
fn test_parse_unexpected_indentation() {
    assert_eq!(
        syntax_error(parse_test("\techo stray\n")),
        (SyntaxError::UnexpectedIndentation, 1)
    );
    assert_eq!(
        syntax_error(parse_test("a:\n\techo a\n\n\techo stray\n")),
        (SyntaxError::UnexpectedIndentation, 4)
    );
}

#[test]
fn test_parse_shell_substitution() {
    let runner = RecordingRunner::new().with_output("uname", "Linux");
    let maker = parse("OS = $(shell uname)\nall:\n\techo $(OS)\n", Options::default(), &runner)
        .unwrap();
    assert_eq!(maker.target("all").unwrap().recipes, vec!["echo Linux"]);
    assert_eq!(runner.runs(), vec!["uname"]);

    let runner = RecordingRunner::new().failing("exit 1");
    let result = parse("X = $(shell exit 1)\nall:\n\techo never\n", Options::default(), &runner);
    assert!(matches!(result, Err(Error::CommandFailed { .. })));
}

#[test]
fn test_parse_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Makefile");
    fs::write(&path, "all:\n\techo all\n").unwrap();

    let maker = parse_file(&path, Options::default(), &RecordingRunner::new()).unwrap();
    assert_eq!(maker.target("all").unwrap().recipes, vec!["echo all"]);

    let missing = parse_file(
        &dir.path().join("missing"),
        Options::default(),
        &RecordingRunner::new(),
    );
    assert!(matches!(missing, Err(Error::Read { .. })));
}
