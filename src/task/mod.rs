//! Task variants and the shared run protocol
//!
//! Each variant module exposes one or more `build` constructors that
//! consume rendered [`TaskArgs`] and return a boxed [`Action`]. The
//! [`VARIANTS`] table maps descriptor keys to those constructors; the
//! loader scans it in order, so earlier entries win when a descriptor
//! could match more than one key (a `command` task may carry a
//! `directory` field, for example).

pub mod args;
pub mod command;
pub mod copy;
pub mod debug;
pub mod file;
pub mod git;
pub mod group;
pub mod metadata;
pub mod pacman;
pub mod service;
pub mod user;

use anyhow::{Context as _, Result};
use std::fmt;

use crate::context::Context;
use args::TaskArgs;

/// A single idempotent operation: inspect the live system, change it
/// only where it disagrees with the description, and report whether
/// anything changed.
pub trait Action {
    fn apply(&self, context: &mut Context) -> Result<bool>;
}

type BuildFn = fn(&mut TaskArgs) -> Result<Box<dyn Action>>;

/// Descriptor keys in resolution order.
pub const VARIANTS: &[(&str, BuildFn)] = &[
    ("command", command::build),
    ("copy", copy::build),
    ("template", copy::build_template),
    ("get_url", copy::build_get_url),
    ("debug", debug::build),
    ("file", file::build),
    ("directory", file::build_directory),
    ("symlink", file::build_symlink),
    ("hard_link", file::build_hard_link),
    ("git", git::build),
    ("group", group::build),
    ("pacman", pacman::build),
    ("aur", pacman::build_aur),
    ("service", service::build),
    ("user", user::build),
];

pub struct Task {
    pub name: String,
    pub when: Option<String>,
    pub register: Option<String>,
    pub action: Box<dyn Action>,
}

// boxed actions are opaque, so derive is unavailable
impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("when", &self.when)
            .field("register", &self.register)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Run the task to completion: announce it, evaluate its guard,
    /// apply the action, then record the outcome. Skipped tasks still
    /// register, with `changed: false`.
    pub fn run(&self, context: &mut Context) -> Result<bool> {
        context.begin_task(&self.name);

        let changed = match &self.when {
            Some(when) if context.when_skips(when)? => {
                context.explain_skip("Condition evaluated to false");
                false
            }
            _ => self
                .action
                .apply(context)
                .with_context(|| format!("Error running task '{}'", self.name))?,
        };

        context.finish_task(changed);
        if let Some(name) = &self.register {
            context.register(name, changed)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use serde_yaml::Value as Yaml;

    pub(crate) fn build_args(pairs: &[(&str, Yaml)]) -> TaskArgs {
        TaskArgs::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    struct Fixed(bool);

    impl Action for Fixed {
        fn apply(&self, _context: &mut Context) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn task(when: Option<&str>, register: Option<&str>, changed: bool) -> Task {
        Task {
            name: "fixture".to_string(),
            when: when.map(str::to_string),
            register: register.map(str::to_string),
            action: Box::new(Fixed(changed)),
        }
    }

    #[test]
    fn test_command_resolves_before_directory() {
        let command = VARIANTS.iter().position(|(key, _)| *key == "command");
        let directory = VARIANTS.iter().position(|(key, _)| *key == "directory");
        assert!(command.unwrap() < directory.unwrap());
    }

    #[test]
    fn test_false_guard_skips_action() {
        let mut context = test_context(false, false, false);
        let changed = task(Some("false"), None, true).run(&mut context).unwrap();
        assert!(!changed);
        assert_eq!(context.skipped, 1);
        assert_eq!(context.changed, 0);
    }

    #[test]
    fn test_guarded_command_never_executes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("guarded");
        let mut args = build_args(&[(
            "command",
            Yaml::String(format!("touch {}", marker.display())),
        )]);
        let guarded = Task {
            name: "guarded".to_string(),
            when: Some("1 == 2".to_string()),
            register: None,
            action: command::build(&mut args).unwrap(),
        };

        let mut context = test_context(false, false, false);
        assert!(!guarded.run(&mut context).unwrap());
        assert!(!marker.exists());
        assert_eq!(context.skipped, 1);
    }

    #[test]
    fn test_register_records_outcome() {
        let mut context = test_context(false, false, false);
        task(None, Some("result"), true).run(&mut context).unwrap();
        // booleans render Python-style
        assert_eq!(
            context.render_str("{{ result.changed }}", None).unwrap(),
            "True"
        );
    }

    #[test]
    fn test_skipped_task_registers_unchanged() {
        let mut context = test_context(false, false, false);
        task(Some("false"), Some("result"), true)
            .run(&mut context)
            .unwrap();
        assert_eq!(
            context.render_str("{{ result.changed }}", None).unwrap(),
            "False"
        );
    }

    #[test]
    fn test_register_conflict_fails() {
        let mut context = test_context(false, false, false);
        task(None, Some("result"), false)
            .run(&mut context)
            .unwrap();
        assert!(task(None, Some("result"), false).run(&mut context).is_err());
    }
}
