//! Git task: clone once, fast-forward thereafter
//!
//! A missing destination is cloned; an existing one must already be a
//! repo pointing at the same remote. Whether a pull is needed comes
//! from a dry-run fetch, so the probe itself never moves the tree.

use anyhow::{Result, bail};
use std::path::PathBuf;

use super::Action;
use super::args::TaskArgs;
use crate::context::Context;
use crate::shell;

struct Git {
    repo: String,
    dest: PathBuf,
    depth: Option<i64>,
    become_user: Option<String>,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(Git {
        repo: args.require_string("repo")?,
        dest: PathBuf::from(args.require_string("dest")?),
        depth: args.take_int("depth")?,
        become_user: args.take_string("become")?,
    }))
}

impl Action for Git {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        if !self.dest.exists() {
            context.explain_change(&format!(
                "Cloning {} into {}",
                self.repo,
                self.dest.display()
            ));
            if !context.dry_run {
                self.clone_repo()?;
            }
            return Ok(true);
        }

        if !self.dest.join(".git").exists() {
            bail!(
                "Git destination directory exists, but is not a git repo: {}",
                self.dest.display()
            );
        }

        if self.remote_url()? != self.repo {
            bail!(
                "Git remote does not match current local git repo: {}",
                self.dest.display()
            );
        }

        if self.should_pull()? {
            context.explain_change(&format!(
                "Repository {} is behind its remote",
                self.dest.display()
            ));
            if !context.dry_run {
                self.pull()?;
            }
            return Ok(true);
        }

        context.explain_skip(&format!(
            "Repository {} is already up to date",
            self.dest.display()
        ));
        Ok(false)
    }
}

impl Git {
    fn clone_repo(&self) -> Result<()> {
        let depth = self.depth.map(|d| d.to_string());
        let dest = self.dest.display().to_string();

        let mut command = vec!["git", "clone", &self.repo];
        if let Some(depth) = &depth {
            command.extend(["--depth", depth]);
        }
        command.push(&dest);

        shell::run_argv(&command, None, self.become_user.as_deref(), shell::OK)?;
        Ok(())
    }

    fn remote_url(&self) -> Result<String> {
        let result = shell::run_argv(
            &["git", "config", "--get", "remote.origin.url"],
            Some(&self.dest),
            self.become_user.as_deref(),
            shell::OK,
        )?;
        Ok(result.stdout)
    }

    /// A dry-run fetch prints nothing when there is nothing to pull.
    fn should_pull(&self) -> Result<bool> {
        let result = shell::run_argv(
            &["git", "fetch", "--dry-run"],
            Some(&self.dest),
            self.become_user.as_deref(),
            shell::OK,
        )?;
        Ok(!result.stdout.is_empty() || !result.stderr.is_empty())
    }

    fn pull(&self) -> Result<()> {
        let branch = shell::run_argv(
            &["git", "branch", "--show-current"],
            Some(&self.dest),
            self.become_user.as_deref(),
            shell::OK,
        )?
        .stdout;
        shell::run_argv(
            &["git", "pull", "origin", &branch],
            Some(&self.dest),
            self.become_user.as_deref(),
            shell::OK,
        )?;
        Ok(())
    }
}
