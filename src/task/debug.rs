//! Debug task: print a rendered message, never reporting a change

use anyhow::Result;
use colored::Colorize;

use super::Action;
use super::args::TaskArgs;
use crate::context::Context;

struct Debug {
    message: String,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    Ok(Box::new(Debug {
        message: args.require_string("debug")?,
    }))
}

impl Action for Debug {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        context.emit(self.message.white().bold().to_string());
        Ok(false)
    }
}
