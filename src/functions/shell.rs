use super::*;

/// `$(shell command)`: the captured standard output of `command`.
pub struct ShellFunction;

impl Function for ShellFunction {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn call(&self, arg: &str, runner: &dyn CommandRunner) -> Result<String, Error> {
        runner.run(arg, true)
    }
}

#[test]
fn test_shell_function() {
    use crate::runner::RecordingRunner;

    let runner = RecordingRunner::new().with_output("date +%Y", "2026\n");
    assert_eq!(ShellFunction.call("date +%Y", &runner).unwrap(), "2026\n");
    assert_eq!(runner.runs(), vec!["date +%Y"]);

    let runner = RecordingRunner::new().failing("false");
    assert!(ShellFunction.call("false", &runner).is_err());
}
