//! User task: ensure a user account exists with its groups and shell

use anyhow::Result;
use std::collections::HashSet;

use super::Action;
use super::args::TaskArgs;
use crate::context::Context;
use crate::shell;

struct User {
    user: String,
    system: bool,
    create_home: bool,
    password: Option<String>,
    shell: Option<String>,
    groups: Vec<String>,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(User {
        user: args.require_string("user")?,
        system: args.take_bool("system"),
        create_home: args.take_bool("create_home"),
        password: args.take_string("password")?,
        shell: args.take_string("shell")?,
        groups: args.take_string_list("groups")?.unwrap_or_default(),
    }))
}

impl Action for User {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        let mut updated = false;

        let exists = user_exists(&self.user)?;
        let missing_groups: Vec<String> = if exists {
            let current: HashSet<String> = list_groups(&self.user)?.into_iter().collect();
            self.groups
                .iter()
                .filter(|g| !current.contains(*g))
                .cloned()
                .collect()
        } else {
            context.explain_change(&format!("User '{}' does not exist", self.user));
            if !context.dry_run {
                self.create_user()?;
            }
            updated = true;
            self.groups.clone()
        };

        if !missing_groups.is_empty() {
            context.explain_change(&format!(
                "User '{}' does not have the following groups: {}",
                self.user,
                missing_groups.join(", ")
            ));
            if !context.dry_run {
                self.add_groups()?;
            }
            updated = true;
        }

        if let Some(wanted) = &self.shell {
            // a user created during this dry-run has no shell to probe
            let current = if exists { Some(get_shell(&self.user)?) } else { None };
            if current.as_ref() != Some(wanted) {
                if let Some(current) = &current {
                    context.explain_change(&format!(
                        "User '{}' has the shell {current}, should be {wanted}",
                        self.user
                    ));
                }
                if !context.dry_run {
                    shell::run_argv(&["usermod", "-s", wanted, &self.user], None, None, shell::OK)?;
                }
                updated = true;
            }
        }

        if !updated {
            context.explain_skip(&format!(
                "User '{}' is already in the correct state",
                self.user
            ));
        }

        Ok(updated)
    }
}

impl User {
    fn create_user(&self) -> Result<()> {
        let mut command = vec!["useradd", &self.user];
        if self.system {
            command.push("--system");
        }
        if self.create_home {
            command.push("--create-home");
        }
        if let Some(password) = &self.password {
            command.extend(["--password", password]);
        }
        shell::run_argv(&command, None, None, shell::OK)?;
        Ok(())
    }

    fn add_groups(&self) -> Result<()> {
        let group_list = self.groups.join(",");
        shell::run_argv(
            &["usermod", "-a", "-G", &group_list, &self.user],
            None,
            None,
            shell::OK,
        )?;
        Ok(())
    }
}

fn user_exists(user: &str) -> Result<bool> {
    let result = shell::run_argv(&["getent", "passwd", user], None, None, Some(&[0, 2]))?;
    Ok(result.return_code == 0)
}

fn list_groups(user: &str) -> Result<Vec<String>> {
    let result = shell::run_argv(&["groups", user], None, None, shell::OK)?;
    Ok(result
        .stdout
        .split_whitespace()
        .filter(|part| *part != ":" && *part != user)
        .map(str::to_string)
        .collect())
}

fn get_shell(user: &str) -> Result<String> {
    let result = shell::run_argv(&["getent", "passwd", user], None, None, shell::OK)?;
    Ok(result.stdout.rsplit(':').next().unwrap_or_default().to_string())
}
