//! IaC tool sub-commands and their fixed flag sets.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::runner::CommandRequest;

/// Name of the plan artifact `plan` writes and `apply` consumes.
pub const PLAN_FILE: &str = "tfplan";

/// A tool sub-command the pipelines invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCommand {
    /// `init`
    Init,
    /// `plan`
    Plan,
    /// `apply`
    Apply,
    /// `destroy`
    Destroy,
    /// `output`
    Output,
}

impl ToolCommand {
    /// The sub-command name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
        }
    }

    /// The fixed arguments. Only `apply` and `destroy` auto-approve.
    #[must_use]
    pub fn args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Init => &["-input=false", "-no-color"],
            Self::Plan => &["-input=false", "-no-color", "-out=tfplan"],
            Self::Apply => &["-input=false", "-no-color", "-auto-approve", PLAN_FILE],
            Self::Destroy => &["-input=false", "-no-color", "-auto-approve"],
            Self::Output => &["-no-color", "-json"],
        };
        args.iter().map(|a| (*a).to_string()).collect()
    }

    /// Builds the runner request for this command.
    #[must_use]
    pub fn request(
        self,
        work_dir: &Path,
        env_vars: &HashMap<String, String>,
        cancel: &Arc<CancellationToken>,
    ) -> CommandRequest {
        let request = CommandRequest::new(self.name(), work_dir)
            .with_args(self.args())
            .with_env(env_vars.clone())
            .with_cancellation(Arc::clone(cancel));
        if self == Self::Output {
            request.capturing_stdout()
        } else {
            request
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_sets() {
        assert_eq!(ToolCommand::Init.args(), vec!["-input=false", "-no-color"]);
        assert_eq!(ToolCommand::Plan.args(), vec!["-input=false", "-no-color", "-out=tfplan"]);
        assert!(ToolCommand::Apply.args().contains(&"-auto-approve".to_string()));
        assert_eq!(ToolCommand::Apply.args().last().map(String::as_str), Some(PLAN_FILE));
        assert!(ToolCommand::Destroy.args().contains(&"-auto-approve".to_string()));
        assert!(!ToolCommand::Plan.args().contains(&"-auto-approve".to_string()));
        assert!(!ToolCommand::Init.args().contains(&"-auto-approve".to_string()));
    }

    #[test]
    fn test_output_request_captures_stdout() {
        let token = Arc::new(CancellationToken::new());
        let env = HashMap::new();
        let output = ToolCommand::Output.request(Path::new("/w"), &env, &token);
        let plan = ToolCommand::Plan.request(Path::new("/w"), &env, &token);

        assert!(output.capture_stdout);
        assert!(!plan.capture_stdout);
        assert_eq!(plan.command, "plan");
        assert!(plan.cancel.is_some());
    }
}
