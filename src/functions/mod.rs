use crate::error::Error;
use crate::runner::CommandRunner;
use lazy_static::lazy_static;
use std::collections::BTreeMap;

mod env;
mod shell;

/// A built-in callable as `$(name argument)` from the build file.
pub trait Function: Sync {
    fn name(&self) -> &'static str;
    fn call(&self, arg: &str, runner: &dyn CommandRunner) -> Result<String, Error>;
}

const FUNCTIONS: &'static [&'static dyn Function] = &[&shell::ShellFunction, &env::EnvFunction];

lazy_static! {
    static ref BY_NAME: BTreeMap<&'static str, &'static dyn Function> =
        functions().iter().map(|f| (f.name(), *f)).collect();
}

pub fn functions() -> &'static [&'static dyn Function] {
    FUNCTIONS
}

/// Splits a reference body such as `shell ls -1` into the function it names
/// and its argument. Bodies without an argument are plain variable names.
pub fn split_call(body: &str) -> Option<(&'static dyn Function, &str)> {
    let (name, arg) = body.split_once(|c: char| c == ' ' || c == '\t')?;
    let function = BY_NAME.get(name)?;
    Some((*function, arg.trim_start()))
}

#[test]
fn test_split_call() {
    let (function, arg) = split_call("shell ls -1").unwrap();
    assert_eq!(function.name(), "shell");
    assert_eq!(arg, "ls -1");

    let (function, arg) = split_call("env\tHOME").unwrap();
    assert_eq!(function.name(), "env");
    assert_eq!(arg, "HOME");

    assert!(split_call("shell").is_none());
    assert!(split_call("CFLAGS").is_none());
    assert!(split_call("unknown thing").is_none());
}

#[test]
fn test_functions_unique() {
    assert_eq!(BY_NAME.len(), functions().len());
}
