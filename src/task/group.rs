//! Group task: ensure a system group exists

use anyhow::Result;

use super::Action;
use super::args::TaskArgs;
use crate::context::Context;
use crate::shell;

struct Group {
    group: String,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(Group {
        group: args.require_string("group")?,
    }))
}

impl Action for Group {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        if self.group_exists()? {
            context.explain_skip(&format!("Group '{}' already exists", self.group));
            return Ok(false);
        }

        context.explain_change(&format!("Group '{}' does not yet exist", self.group));
        if !context.dry_run {
            shell::run_argv(&["groupadd", &self.group], None, None, shell::OK)?;
        }

        Ok(true)
    }
}

impl Group {
    // getent exits 2 when the key is unknown
    fn group_exists(&self) -> Result<bool> {
        let result = shell::run_argv(&["getent", "group", &self.group], None, None, Some(&[0, 2]))?;
        Ok(result.return_code == 0)
    }
}
