//! Execution context: the single mutable state of a run
//!
//! Owns the variable store, mode flags, and the changed/skipped
//! counters. All task output funnels through here so quiet mode can
//! buffer a task's lines and decide at the end whether to show them:
//! flushed in order when the task changed, discarded when it skipped.

use anyhow::{Result, bail};
use colored::Colorize;
use serde_yaml::Value as Yaml;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::diff;
use crate::template::Templates;

/// Lines of context around each explain-diff hunk.
const DIFF_CONTEXT_LINES: usize = 1;

pub struct Context {
    pub root_directory: PathBuf,
    pub tags: HashSet<String>,
    pub dry_run: bool,
    pub quiet: bool,
    pub explain: bool,
    pub variables: BTreeMap<String, Yaml>,
    pub changed: usize,
    pub skipped: usize,
    templates: Templates,
    buffer: Vec<String>,
    buffering: bool,
    start: Instant,
}

impl Context {
    pub fn new(
        root_directory: &Path,
        overrides: BTreeMap<String, Yaml>,
        tags: HashSet<String>,
        dry_run: bool,
        quiet: bool,
        explain: bool,
    ) -> Self {
        let mut variables = overrides;
        let absolute = root_directory
            .canonicalize()
            .unwrap_or_else(|_| root_directory.to_path_buf());
        variables.insert(
            "settler_dir".to_string(),
            Yaml::String(absolute.to_string_lossy().into_owned()),
        );

        Self {
            root_directory: root_directory.to_path_buf(),
            tags,
            dry_run,
            quiet,
            explain,
            variables,
            changed: 0,
            skipped: 0,
            templates: Templates::new(),
            buffer: Vec::new(),
            buffering: false,
            start: Instant::now(),
        }
    }

    // ========================================================================
    // Template rendering
    // ========================================================================

    /// Render a string against the variable store plus call-local
    /// extras, extras taking precedence.
    pub fn render_str(
        &self,
        template: &str,
        extra_vars: Option<&BTreeMap<String, Yaml>>,
    ) -> Result<String> {
        let mut merged: BTreeMap<&str, &Yaml> = self
            .variables
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        if let Some(extras) = extra_vars {
            for (k, v) in extras {
                merged.insert(k.as_str(), v);
            }
        }
        self.templates.render_str(template, &merged)
    }

    /// Render a YAML value: strings render, sequences render
    /// element-wise, everything else passes through unchanged.
    pub fn render_object(
        &self,
        value: &Yaml,
        extra_vars: Option<&BTreeMap<String, Yaml>>,
    ) -> Result<Yaml> {
        match value {
            Yaml::String(template) => {
                Ok(Yaml::String(self.render_str(template, extra_vars)?))
            }
            Yaml::Sequence(items) => Ok(Yaml::Sequence(
                items
                    .iter()
                    .map(|item| self.render_object(item, extra_vars))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(other.clone()),
        }
    }

    /// Evaluate a `when` guard against the variable store. Truthiness
    /// of the result is left entirely to the template engine; a falsy
    /// value means skip.
    pub fn when_skips(&self, when: &str) -> Result<bool> {
        let merged: BTreeMap<&str, &Yaml> = self
            .variables
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        Ok(!self.templates.eval_expr(when, &merged)?)
    }

    // ========================================================================
    // Task output
    // ========================================================================

    pub fn begin_task(&mut self, name: &str) {
        self.buffering = self.quiet;
        self.buffer.clear();
        let header = format!("TASK [{name}]").black().bold().on_blue().to_string();
        self.emit(header);
    }

    /// Print a line, or hold it in the per-task buffer under quiet mode.
    pub fn emit(&mut self, line: String) {
        if self.buffering {
            self.buffer.push(line);
        } else {
            println!("{line}");
        }
    }

    /// Explain why a task is about to change. Computed regardless of
    /// dry-run so simulated runs describe the same work.
    pub fn explain_change(&mut self, message: &str) {
        if self.explain {
            self.emit(format!("  {message}"));
        }
    }

    /// Explain why a task made no changes.
    pub fn explain_skip(&mut self, message: &str) {
        if self.explain {
            self.emit(format!("  {}", message.dimmed()));
        }
    }

    /// Explain a content change with a unified diff of old vs new.
    pub fn explain_change_diff(&mut self, old: &str, new: &str, old_label: &str, new_label: &str) {
        if self.explain {
            let rendered = diff::unified_diff(old, new, old_label, new_label, DIFF_CONTEXT_LINES);
            for line in rendered.lines() {
                self.emit(line.to_string());
            }
        }
    }

    /// Close out a task: update counters, settle the quiet buffer, and
    /// print the verdict.
    pub fn finish_task(&mut self, changed: bool) {
        if changed {
            self.changed += 1;
            if self.buffering {
                for line in self.buffer.drain(..) {
                    println!("{line}");
                }
            }
            println!("{}", "changed".yellow().bold());
        } else {
            self.skipped += 1;
            self.buffer.clear();
            if !self.quiet {
                println!("{}", "skipped".blue());
            }
        }
        self.buffering = false;
    }

    /// Store a task's outcome under `register`. The name must not
    /// collide with an existing variable.
    pub fn register(&mut self, name: &str, changed: bool) -> Result<()> {
        if self.variables.contains_key(name) {
            bail!("Task registered as {name} conflicts with an existing variable");
        }

        let mut outcome = serde_yaml::Mapping::new();
        outcome.insert(Yaml::String("changed".to_string()), Yaml::Bool(changed));
        self.variables.insert(name.to_string(), Yaml::Mapping(outcome));
        Ok(())
    }

    // ========================================================================
    // Run banners
    // ========================================================================

    pub fn print_start(&self, setup_file: &Path, overrides: &BTreeMap<String, Yaml>) {
        println!(
            "{}",
            format!("Beginning execution from {}", setup_file.display())
                .green()
                .bold()
        );

        if !self.tags.is_empty() {
            let mut tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            tags.sort_unstable();
            println!(
                "{} {}",
                "Only executing specified tags:".blue(),
                tags.join(", ").bold()
            );
        }

        if !overrides.is_empty() {
            let formatted: Vec<String> = overrides
                .iter()
                .map(|(key, value)| format!("{key}={}", display_value(value)))
                .collect();
            println!("{} {}", "Overridden variables:".blue(), formatted.join(" "));
        }

        println!();
    }

    pub fn print_summary(&self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        println!(
            "{} {}",
            "Summary".bold(),
            format!("({elapsed:.3}s):").white()
        );
        println!("{}", format!("  skipped: {}", self.skipped).blue());
        println!("{}", format!("  changed: {}", self.changed).yellow());
    }
}

fn display_value(value: &Yaml) -> String {
    match value {
        Yaml::String(s) => format!("'{s}'"),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
