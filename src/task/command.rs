//! Command task: run ad-hoc commands, optionally gated on a probe
//!
//! A command task is the escape hatch: it cannot probe convergence on
//! its own, so it reports changed whenever it runs. The optional
//! `condition` command restores idempotence by checking an arbitrary
//! exit code first.

use anyhow::Result;
use std::path::PathBuf;

use super::args::TaskArgs;
use super::Action;
use crate::context::Context;
use crate::shell;

struct Command {
    commands: Vec<String>,
    condition: Option<String>,
    condition_code: i64,
    become_user: Option<String>,
    directory: Option<PathBuf>,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    let commands = args
        .take_string_list("command")?
        .unwrap_or_default();
    if commands.is_empty() {
        anyhow::bail!("Missing required field 'command'");
    }

    Ok(Box::new(Command {
        commands,
        condition: args.take_string("condition")?,
        condition_code: args.take_int("condition_code")?.unwrap_or(0),
        become_user: args.take_string("become")?,
        directory: args.take_string("directory")?.map(PathBuf::from),
    }))
}

impl Action for Command {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        if let Some(condition) = &self.condition {
            let result = shell::run_sh(condition, self.directory.as_deref(), None, shell::ANY)?;
            if i64::from(result.return_code) != self.condition_code {
                context.explain_skip(&format!(
                    "Condition command returned with code {}, required return code {}",
                    result.return_code, self.condition_code
                ));
                return Ok(false);
            }
        }

        for command in &self.commands {
            let mut message = format!("Running command {command}");
            if let Some(directory) = &self.directory {
                message.push_str(&format!(" from directory '{}'", directory.display()));
            }
            if let Some(user) = &self.become_user {
                message.push_str(&format!(" as user '{user}'"));
            }
            context.explain_change(&message);

            if !context.dry_run {
                let result = shell::run_sh(
                    command,
                    self.directory.as_deref(),
                    self.become_user.as_deref(),
                    shell::OK,
                )?;
                context.explain_change(&format!("  -> {}", result.stdout));
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use crate::task::tests::build_args;
    use serde_yaml::Value as Yaml;

    #[test]
    fn test_requires_command() {
        let mut args = build_args(&[]);
        assert!(build(&mut args).is_err());
    }

    #[test]
    fn test_runs_and_reports_changed() {
        let mut args = build_args(&[("command", Yaml::String("true".to_string()))]);
        let action = build(&mut args).unwrap();
        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
        // converged or not, commands always count as a change
        assert!(action.apply(&mut context).unwrap());
    }

    #[test]
    fn test_condition_code_mismatch_skips() {
        let mut args = build_args(&[
            ("command", Yaml::String("echo ran".to_string())),
            ("condition", Yaml::String("exit 1".to_string())),
        ]);
        let action = build(&mut args).unwrap();
        let mut context = test_context(false, false, false);
        assert!(!action.apply(&mut context).unwrap());
    }

    #[test]
    fn test_condition_code_match_runs() {
        let mut args = build_args(&[
            ("command", Yaml::String("true".to_string())),
            ("condition", Yaml::String("exit 4".to_string())),
            ("condition_code", Yaml::Number(4.into())),
        ]);
        let action = build(&mut args).unwrap();
        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
    }

    #[test]
    fn test_dry_run_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut args = build_args(&[(
            "command",
            Yaml::String(format!("touch {}", marker.display())),
        )]);
        let action = build(&mut args).unwrap();
        let mut context = test_context(true, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert!(!marker.exists());
    }
}
