//! Service task: converge a systemd unit to started/enabled flags

use anyhow::Result;

use super::Action;
use super::args::TaskArgs;
use crate::context::Context;
use crate::shell;

struct Service {
    service: String,
    started: bool,
    enabled: bool,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(Service {
        service: args.require_string("service")?,
        started: args.take_bool("started"),
        enabled: args.take_bool("enabled"),
    }))
}

impl Action for Service {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        let mut updated = false;

        if self.started && !self.is_started()? {
            context.explain_change(&format!("Service '{}' is not active", self.service));
            if !context.dry_run {
                self.systemctl("start")?;
            }
            updated = true;
        }

        let enabled = self.is_enabled()?;
        if self.enabled && !enabled {
            context.explain_change(&format!("Service '{}' is not enabled", self.service));
            if !context.dry_run {
                self.systemctl("enable")?;
            }
            updated = true;
        } else if !self.enabled && enabled {
            context.explain_change(&format!("Service '{}' should be disabled", self.service));
            if !context.dry_run {
                self.systemctl("disable")?;
            }
            updated = true;
        }

        if !updated {
            context.explain_skip(&format!(
                "Service '{}' is already in the correct state",
                self.service
            ));
        }

        Ok(updated)
    }
}

impl Service {
    // is-active exits 3 for inactive units
    fn is_started(&self) -> Result<bool> {
        let result = shell::run_argv(
            &["systemctl", "is-active", &self.service],
            None,
            None,
            Some(&[0, 3]),
        )?;
        Ok(result.stdout == "active")
    }

    // is-enabled exits 1 for disabled or unknown units
    fn is_enabled(&self) -> Result<bool> {
        let result = shell::run_argv(
            &["systemctl", "is-enabled", &self.service],
            None,
            None,
            Some(&[0, 1]),
        )?;
        Ok(result.stdout == "enabled")
    }

    fn systemctl(&self, verb: &str) -> Result<()> {
        shell::run_argv(&["systemctl", verb, &self.service], None, None, shell::OK)?;
        Ok(())
    }
}
