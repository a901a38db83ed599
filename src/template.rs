//! Template and expression rendering
//!
//! A thin wrapper over a Jinja2-compatible engine. Guard truthiness,
//! string interpolation, and the custom filters tasks rely on all live
//! here; callers hand in a fully merged variable context.

use anyhow::{Context as _, Result};
use minijinja::value::Value;
use minijinja::{Environment, Error, ErrorKind};
use serde::Serialize;
use serde_yaml::Value as Yaml;
use sha_crypt::{Sha512Params, sha512_simple};
use std::path::Path;

pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("password_hash", password_hash);
        env.add_filter("filename", filename);
        env.add_filter("bool", truthy);
        Self { env }
    }

    /// Render a template string against the given variable context.
    pub fn render_str<S: Serialize>(&self, template: &str, vars: &S) -> Result<String> {
        self.env
            .render_str(template, Value::from_serialize(vars))
            .with_context(|| format!("Failed to render template '{template}'"))
    }

    /// Evaluate a bare expression (no `{{ }}` delimiters) and reduce
    /// the result to the engine's truthiness.
    pub fn eval_expr<S: Serialize>(&self, expr: &str, vars: &S) -> Result<bool> {
        let compiled = self
            .env
            .compile_expression(expr)
            .with_context(|| format!("Failed to parse expression '{expr}'"))?;
        let value = compiled
            .eval(Value::from_serialize(vars))
            .with_context(|| format!("Failed to evaluate expression '{expr}'"))?;
        Ok(value.is_true())
    }
}

impl Default for Templates {
    fn default() -> Self {
        Self::new()
    }
}

/// One-way salted password hash, sha512-crypt format.
fn password_hash(password: String, hashtype: Option<String>) -> Result<String, Error> {
    let hashtype = hashtype.unwrap_or_else(|| "sha512".to_string());
    if hashtype != "sha512" {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("password_hash hashtype must be sha512, found '{hashtype}'"),
        ));
    }

    let params = Sha512Params::new(5_000)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("{e:?}")))?;
    sha512_simple(&password, &params)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("{e:?}")))
}

/// Basename of a path without its last extension.
fn filename(path: String) -> String {
    let base = Path::new(&path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    match base.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => base,
    }
}

fn truthy(value: Value) -> bool {
    value.is_true()
}

/// Coerce rendered text back into a number where possible: integer
/// first, then float, otherwise the text itself.
pub fn coerce_number(rendered: &str) -> Yaml {
    let trimmed = rendered.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        Yaml::Number(int.into())
    } else if let Ok(float) = trimmed.parse::<f64>() {
        Yaml::Number(serde_yaml::Number::from(float))
    } else {
        Yaml::String(rendered.to_string())
    }
}
