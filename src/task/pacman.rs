//! Package installation through pacman, with an AUR helper variant

use anyhow::{Result, bail};

use super::Action;
use super::args::TaskArgs;
use crate::context::Context;
use crate::shell;

struct Pacman {
    packages: Vec<String>,
    aur: bool,
    become_user: Option<String>,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(Pacman {
        packages: require_packages(args)?,
        aur: false,
        become_user: None,
    }))
}

/// AUR installs run through yay under a non-root builder account.
pub fn build_aur(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(Pacman {
        packages: require_packages(args)?,
        aur: true,
        become_user: args.take_string("become")?,
    }))
}

fn require_packages(args: &mut TaskArgs) -> Result<Vec<String>> {
    match args.take_string_list("packages")? {
        Some(packages) if !packages.is_empty() => Ok(packages),
        _ => bail!("Missing required field 'packages'"),
    }
}

impl Action for Pacman {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        let mut missing = Vec::new();
        for package in &self.packages {
            if !installed(package)? {
                missing.push(package.as_str());
            }
        }

        if missing.is_empty() {
            context.explain_skip("All packages are already installed");
            return Ok(false);
        }

        context.explain_change(&format!("Packages to install: {}", missing.join(", ")));
        if !context.dry_run {
            let mut argv: Vec<&str> = if self.aur {
                vec!["yay", "-Sy", "--noconfirm", "--needed", "--cleanafter"]
            } else {
                vec!["pacman", "-Sy", "--noconfirm", "--noprogressbar", "--needed"]
            };
            argv.extend(&missing);
            shell::run_argv(&argv, None, self.become_user.as_deref(), shell::OK)?;
        }
        Ok(true)
    }
}

// -Qi exits 1 when the name is not an installed package; it may still
// be a package group, so fall back to asking for the group's members.
fn installed(package: &str) -> Result<bool> {
    let query = shell::run_argv(&["pacman", "-Qi", package], None, None, Some(&[0, 1]))?;
    if query.return_code == 0 {
        return Ok(true);
    }

    let group = shell::run_argv(&["pacman", "-Qg", package], None, None, Some(&[0, 1]))?;
    Ok(group.return_code == 0)
}
