//! Command-line interface definition

use anyhow::{Result, bail};
use clap::Parser;
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;

/// Converge a machine to a declarative YAML description.
#[derive(Debug, Parser)]
#[command(name = "settler", version, about)]
pub struct Cli {
    /// Root setup document to execute
    #[arg(default_value = "setup.yml")]
    pub setup_file: String,

    /// Only run tasks carrying one of these tags
    #[arg(long, num_args = 0..)]
    pub tags: Vec<String>,

    /// Variable overrides: a JSON object or key=value[;key=value] pairs
    #[arg(long)]
    pub vars: Option<String>,

    /// Load and validate the setup document without running any task
    #[arg(long)]
    pub skip_tasks: bool,

    /// Report what would change without touching the system
    #[arg(long)]
    pub dry_run: bool,

    /// Describe why each task changed or skipped
    #[arg(long)]
    pub explain: bool,

    /// Only show output for tasks that changed
    #[arg(short, long)]
    pub quiet: bool,
}

/// Parse `--vars`. A leading `{` means a JSON object; anything else is
/// the `key=value;key=value` shorthand.
pub fn parse_variables(vars: Option<&str>) -> Result<BTreeMap<String, Yaml>> {
    let Some(vars) = vars else {
        return Ok(BTreeMap::new());
    };

    if vars.trim_start().starts_with('{') {
        let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(vars)?;
        return parsed
            .into_iter()
            .map(|(key, value)| Ok((key, serde_yaml::to_value(value)?)))
            .collect();
    }

    let mut variables = BTreeMap::new();
    for pair in vars.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid variable assignment '{pair}', expected key=value");
        };
        variables.insert(key.trim().to_string(), Yaml::String(value.to_string()));
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_vars() {
        assert!(parse_variables(None).unwrap().is_empty());
    }

    #[test]
    fn test_shorthand_pairs() {
        let vars = parse_variables(Some("color=red;size=10")).unwrap();
        assert_eq!(vars.get("color"), Some(&Yaml::String("red".to_string())));
        assert_eq!(vars.get("size"), Some(&Yaml::String("10".to_string())));
    }

    #[test]
    fn test_json_object() {
        let vars = parse_variables(Some(r#"{"count": 3, "debug": true}"#)).unwrap();
        assert_eq!(vars.get("count"), Some(&Yaml::Number(3.into())));
        assert_eq!(vars.get("debug"), Some(&Yaml::Bool(true)));
    }

    #[test]
    fn test_malformed_pair_fails() {
        assert!(parse_variables(Some("colorred")).is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
