use crate::ast::Rule;
use crate::error::{Error, SyntaxError};
use crate::runner::CommandRunner;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[cfg(test)]
use crate::parser::parse;
#[cfg(test)]
use crate::runner::RecordingRunner;
#[cfg(test)]
use maplit::*;

/// How one invocation behaves. Fixed once parsing starts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Options {
    pub debug: bool,
    pub dry_run: bool,
    pub ignore_errors: bool,
    pub keep_going: bool,
    pub silent: bool,
    /// Environment variables win over assignments in the build file.
    pub env_first: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub name: String,
    pub prerequisites: Vec<String>,
    /// Variable-expanded, but `$@` and `$<` are still in place.
    pub recipes: Vec<String>,
    /// File modification time until the target is built, then the time it
    /// finished. `None` when there is no such file.
    pub timestamp: Option<SystemTime>,
}

/// A recipe line ready to hand to the shell.
#[derive(Clone, Debug, PartialEq)]
pub struct Recipe {
    pub command: String,
    /// `@`: do not echo.
    pub silent: bool,
    /// `-`: a failure does not stop the build.
    pub ignore: bool,
}

impl Target {
    /// Strips the `@` and `-` markers from recipe `index` and fills in `$@`
    /// and `$<`.
    pub fn expand_recipe(&self, index: usize) -> Recipe {
        let mut command = self.recipes[index].as_str();
        let (mut silent, mut ignore) = (false, false);
        loop {
            if let Some(rest) = command.strip_prefix('@') {
                silent = true;
                command = rest.trim_start();
            } else if let Some(rest) = command.strip_prefix('-') {
                ignore = true;
                command = rest.trim_start();
            } else {
                break;
            }
        }

        let first = self.prerequisites.first().map(String::as_str).unwrap_or("");
        Recipe {
            command: command.replace("$@", &self.name).replace("$<", first),
            silent,
            ignore,
        }
    }
}

#[test]
fn test_expand_recipe() {
    let target = Target {
        name: "app".to_string(),
        prerequisites: vec!["main.o".to_string(), "util.o".to_string()],
        recipes: vec![
            "cc -o $@ $< util.o".to_string(),
            "@echo built $@".to_string(),
            "-rm -f $@.tmp".to_string(),
            "-@ true".to_string(),
            "@-true".to_string(),
        ],
        timestamp: None,
    };

    assert_eq!(
        target.expand_recipe(0),
        Recipe {
            command: "cc -o app main.o util.o".to_string(),
            silent: false,
            ignore: false
        }
    );
    assert_eq!(
        target.expand_recipe(1),
        Recipe {
            command: "echo built app".to_string(),
            silent: true,
            ignore: false
        }
    );
    assert_eq!(
        target.expand_recipe(2),
        Recipe {
            command: "rm -f app.tmp".to_string(),
            silent: false,
            ignore: true
        }
    );
    for index in 3..5 {
        assert_eq!(
            target.expand_recipe(index),
            Recipe {
                command: "true".to_string(),
                silent: true,
                ignore: true
            }
        );
    }

    let lonely = Target {
        name: "lonely".to_string(),
        prerequisites: vec![],
        recipes: vec!["echo [$<]".to_string()],
        timestamp: None,
    };
    assert_eq!(lonely.expand_recipe(0).command, "echo []");
}

/// Every target of a build file, and the machinery to bring them up to date.
#[derive(Debug)]
pub struct Maker {
    targets: BTreeMap<String, Target>,
    phony: BTreeSet<String>,
    default_goal: Option<String>,
    options: Options,
}

/// Bookkeeping for one top-level `process` call.
#[derive(Default)]
struct Visit {
    done: BTreeSet<String>,
    in_progress: Vec<String>,
}

impl Maker {
    pub fn new(options: Options) -> Maker {
        Maker {
            targets: BTreeMap::new(),
            phony: BTreeSet::new(),
            default_goal: None,
            options,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// The first target declared in the file.
    pub fn default_goal(&self) -> Option<&str> {
        self.default_goal.as_deref()
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// Registered target names in sorted order, including the ones picked up
    /// from the filesystem during a build.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn is_phony(&self, name: &str) -> bool {
        self.phony.contains(name)
    }

    pub fn add_phony(&mut self, name: &str) {
        self.phony.insert(name.to_string());
    }

    /// Registers every name of `rule`. A name may only be registered once.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), Error> {
        if self.default_goal.is_none() {
            self.default_goal = rule.targets.first().cloned();
        }

        for name in &rule.targets {
            if self.targets.contains_key(name) {
                return Err(Error::syntax(
                    SyntaxError::DuplicateTarget(name.clone()),
                    rule.line,
                    &rule.text,
                ));
            }

            let target = Target {
                name: name.clone(),
                prerequisites: rule.prerequisites.clone(),
                recipes: rule.recipes.clone(),
                timestamp: self.modified(name),
            };
            self.targets.insert(name.clone(), target);
        }

        Ok(())
    }

    /// Builds `goal` (the default goal when empty) after its prerequisites,
    /// depth first. `started` is when this top-level request began; each
    /// target runs its recipes at most once per call.
    pub fn process(
        &mut self,
        goal: &str,
        started: SystemTime,
        runner: &dyn CommandRunner,
    ) -> Result<(), Error> {
        let goal = match goal {
            "" => self.default_goal.clone().ok_or(Error::NoTargets)?,
            goal => goal.to_string(),
        };

        self.visit(&goal, started, runner, &mut Visit::default())
    }

    fn visit(
        &mut self,
        name: &str,
        started: SystemTime,
        runner: &dyn CommandRunner,
        visit: &mut Visit,
    ) -> Result<(), Error> {
        if let Some(pos) = visit.in_progress.iter().position(|n| n == name) {
            let mut chain = visit.in_progress[pos..].to_vec();
            chain.push(name.to_string());
            return Err(Error::Cycle(chain));
        }

        if visit.done.contains(name) {
            info!("nothing to do for {}", name);
            return Ok(());
        }

        if !self.targets.contains_key(name) {
            let timestamp = self
                .modified(name)
                .ok_or_else(|| Error::UnknownTarget(name.to_string()))?;
            debug!(target = %name, "found file");
            self.targets.insert(
                name.to_string(),
                Target {
                    name: name.to_string(),
                    prerequisites: Vec::new(),
                    recipes: Vec::new(),
                    timestamp: Some(timestamp),
                },
            );
        }

        let target = &self.targets[name];
        let newer = !self.is_phony(name) && target.timestamp.map_or(false, |t| t > started);
        if newer {
            info!("nothing to do for {}", name);
            visit.done.insert(name.to_string());
            return Ok(());
        }

        debug!(target = %name, "target");
        if !target.prerequisites.is_empty() {
            debug!(dependencies = ?target.prerequisites, "dependencies");
        }

        let prerequisites = target.prerequisites.clone();
        let recipes: Vec<Recipe> = (0..target.recipes.len())
            .map(|index| target.expand_recipe(index))
            .collect();

        visit.in_progress.push(name.to_string());
        for prerequisite in &prerequisites {
            self.visit(prerequisite, started, runner, visit)?;
        }

        for recipe in &recipes {
            self.run_recipe(recipe, runner)?;
        }
        visit.in_progress.pop();
        visit.done.insert(name.to_string());

        if let Some(target) = self.targets.get_mut(name) {
            target.timestamp = Some(SystemTime::now());
        }
        Ok(())
    }

    fn run_recipe(&self, recipe: &Recipe, runner: &dyn CommandRunner) -> Result<(), Error> {
        if !(recipe.silent || self.options.silent) {
            runner.echo(&recipe.command);
        }

        debug!(command = %recipe.command, "run");
        if self.options.dry_run {
            return Ok(());
        }

        match runner.run(&recipe.command, false) {
            Err(err) if recipe.ignore || self.options.ignore_errors => {
                warn!("{} (ignored)", err);
                Ok(())
            }
            result => result.map(|_| ()),
        }
    }

    /// Modification time of the file called `name`; phony names have none.
    fn modified(&self, name: &str) -> Option<SystemTime> {
        if self.is_phony(name) {
            return None;
        }

        fs::symlink_metadata(name)
            .and_then(|metadata| metadata.modified())
            .ok()
    }
}

#[cfg(test)]
fn build(source: &str, goal: &str, options: Options, runner: &RecordingRunner) -> Result<Maker, Error> {
    let mut maker = parse(source, options, runner)?;
    maker.process(goal, SystemTime::now(), runner)?;
    Ok(maker)
}

#[test]
fn test_process_order() {
    let runner = RecordingRunner::new();
    build("A: B\n\techo hi\nB:\n\techo bye\n", "A", Options::default(), &runner).unwrap();
    assert_eq!(runner.runs(), vec!["echo bye", "echo hi"]);
    assert_eq!(runner.echoes(), vec!["echo bye", "echo hi"]);
}

#[test]
fn test_process_default_goal() {
    let runner = RecordingRunner::new();
    build("first:\n\techo first\nsecond:\n\techo second\n", "", Options::default(), &runner)
        .unwrap();
    assert_eq!(runner.runs(), vec!["echo first"]);

    let runner = RecordingRunner::new();
    let result = build("X = 1\n", "", Options::default(), &runner);
    assert!(matches!(result, Err(Error::NoTargets)));
}

#[test]
fn test_process_shared_prerequisite_runs_once() {
    let runner = RecordingRunner::new();
    let source = "all: left right\n\techo all\n\
                  left: base\n\techo left\n\
                  right: base\n\techo right\n\
                  base:\n\techo base\n";
    build(source, "all", Options::default(), &runner).unwrap();
    assert_eq!(
        runner.runs(),
        vec!["echo base", "echo left", "echo right", "echo all"]
    );
}

#[test]
fn test_process_marks_timestamp() {
    let runner = RecordingRunner::new();
    let started = SystemTime::now();
    let mut maker = parse("t:\n\techo t\n", Options::default(), &runner).unwrap();
    assert_eq!(maker.target("t").unwrap().timestamp, None);

    maker.process("t", started, &runner).unwrap();
    assert!(maker.target("t").unwrap().timestamp.unwrap() >= started);

    // a new request builds it again
    maker.process("t", SystemTime::now(), &runner).unwrap();
    assert_eq!(runner.runs(), vec!["echo t", "echo t"]);
}

#[test]
fn test_process_silent_marker() {
    let runner = RecordingRunner::new();
    build("t:\n\t@echo quiet\n\techo loud\n", "t", Options::default(), &runner).unwrap();
    assert_eq!(runner.runs(), vec!["echo quiet", "echo loud"]);
    assert_eq!(runner.echoes(), vec!["echo loud"]);

    let runner = RecordingRunner::new();
    let options = Options {
        silent: true,
        ..Options::default()
    };
    build("t:\n\techo loud\n", "t", options, &runner).unwrap();
    assert_eq!(runner.runs(), vec!["echo loud"]);
    assert!(runner.echoes().is_empty());
}

#[test]
fn test_process_ignore_marker() {
    let runner = RecordingRunner::new().failing("false");
    build("t: u\n\t-false\n\techo after\nu:\n\t-false\n", "t", Options::default(), &runner)
        .unwrap();
    assert_eq!(runner.runs(), vec!["false", "false", "echo after"]);
    assert_eq!(runner.echoes(), vec!["false", "false", "echo after"]);
}

#[test]
fn test_process_failure_stops() {
    let runner = RecordingRunner::new().failing("false");
    let result = build("t: u\n\techo never\nu:\n\tfalse\n\techo never\n", "t", Options::default(), &runner);
    assert!(matches!(result, Err(Error::CommandFailed { .. })));
    assert_eq!(runner.runs(), vec!["false"]);
}

#[test]
fn test_process_ignore_errors() {
    let runner = RecordingRunner::new().failing("false");
    let options = Options {
        ignore_errors: true,
        ..Options::default()
    };
    build("t:\n\tfalse\n\techo after\n", "t", options, &runner).unwrap();
    assert_eq!(runner.runs(), vec!["false", "echo after"]);
}

#[test]
fn test_process_dry_run() {
    let runner = RecordingRunner::new();
    let options = Options {
        dry_run: true,
        ..Options::default()
    };
    build("a: b\n\techo $@ from $<\n\t@echo hidden\nb:\n\techo b\n", "a", options, &runner)
        .unwrap();
    assert!(runner.runs().is_empty());
    assert_eq!(runner.echoes(), vec!["echo b", "echo a from b"]);
}

#[test]
fn test_process_unknown_target() {
    let runner = RecordingRunner::new();
    let result = build("all: minimake-no-such-file\n\techo all\n", "all", Options::default(), &runner);
    match result {
        Err(Error::UnknownTarget(name)) => assert_eq!(name, "minimake-no-such-file"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(runner.runs().is_empty());
}

#[test]
fn test_process_cycle() {
    let runner = RecordingRunner::new();
    let result = build("a: b\n\techo a\nb: c\nc: a\n", "a", Options::default(), &runner);
    match result {
        Err(Error::Cycle(chain)) => assert_eq!(chain, vec!["a", "b", "c", "a"]),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_process_file_prerequisite() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    fs::write(&input, "data").unwrap();
    let input = input.to_str().unwrap();

    let runner = RecordingRunner::new();
    let maker = build(
        &format!("all: {}\n\tcat $<\n", input),
        "all",
        Options::default(),
        &runner,
    )
    .unwrap();
    assert_eq!(runner.runs(), vec![format!("cat {}", input)]);
    assert_eq!(
        maker.target_names().collect::<BTreeSet<_>>(),
        btreeset!["all", input]
    );
}

#[test]
fn test_process_phony_ignores_file() {
    use std::fs::File;
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    let clean = dir.path().join("clean");
    File::create(&clean)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();
    let clean = clean.to_str().unwrap();

    // a file dated after the run started counts as done
    let runner = RecordingRunner::new();
    build(&format!("{}:\n\techo cleaning\n", clean), clean, Options::default(), &runner)
        .unwrap();
    assert!(runner.runs().is_empty());

    // unless it is phony, whichever comes first in the file
    for source in &[
        format!(".PHONY: {0}\n{0}:\n\techo cleaning\n", clean),
        format!("{0}:\n\techo cleaning\n\n.PHONY: {0}\n", clean),
    ] {
        let runner = RecordingRunner::new();
        build(source, clean, Options::default(), &runner).unwrap();
        assert_eq!(runner.runs(), vec!["echo cleaning"]);
    }
}
