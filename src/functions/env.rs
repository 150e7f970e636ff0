use super::*;
use std::env;

/// `$(env NAME)`: reads the process environment, skipping the variable table.
pub struct EnvFunction;

impl Function for EnvFunction {
    fn name(&self) -> &'static str {
        "env"
    }

    fn call(&self, arg: &str, _runner: &dyn CommandRunner) -> Result<String, Error> {
        Ok(env::var(arg.trim()).unwrap_or_default())
    }
}

#[test]
fn test_env_function() {
    use crate::runner::RecordingRunner;

    env::set_var("MINIMAKE_TEST_ENV_FUNCTION", "from env");
    let runner = RecordingRunner::new();
    assert_eq!(
        EnvFunction.call("MINIMAKE_TEST_ENV_FUNCTION", &runner).unwrap(),
        "from env"
    );
    assert_eq!(EnvFunction.call("MINIMAKE_TEST_UNSET_VARIABLE", &runner).unwrap(), "");
    assert!(runner.runs().is_empty());
}
