mod cli;
mod context;
mod diff;
mod loader;
mod shell;
mod task;
mod template;

use anyhow::{Result, bail};
use clap::Parser;
use colored::Colorize;
use std::collections::HashSet;
use std::path::Path;
use std::process::ExitCode;

use cli::Cli;
use context::Context;

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log::LevelFilter::Warn
        })
        .format_timestamp(None)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", format!("{error:#}").red());
            eprintln!("{}", "Exiting...".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let setup_file = shellexpand::tilde(&cli.setup_file).into_owned();
    let setup_file = Path::new(&setup_file);
    if !setup_file.exists() {
        bail!("Setup file does not exist: {}", setup_file.display());
    }

    let overrides = cli::parse_variables(cli.vars.as_deref())?;
    let root_directory = setup_file.parent().unwrap_or_else(|| Path::new("."));
    let tags: HashSet<String> = cli.tags.iter().cloned().collect();

    let mut context = Context::new(
        root_directory,
        overrides.clone(),
        tags,
        cli.dry_run,
        cli.quiet,
        cli.explain,
    );
    context.print_start(setup_file, &overrides);

    let tasks = loader::load(setup_file, &mut context)?;
    if cli.skip_tasks {
        return Ok(());
    }

    for task in &tasks {
        let changed = task.run(&mut context)?;
        if changed || !context.quiet {
            println!();
        }
    }

    context.print_summary();
    Ok(())
}
