//! Resolved keyword fields for task construction
//!
//! The loader renders every descriptor value before a task is built;
//! this wrapper hands those values to variant constructors with
//! validation: required fields, type coercion, and a final check that
//! nothing unrecognized was left behind.

use anyhow::{Result, bail};
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;

use crate::template;

pub struct TaskArgs {
    values: BTreeMap<String, Yaml>,
}

impl TaskArgs {
    pub fn new(values: BTreeMap<String, Yaml>) -> Self {
        Self { values }
    }

    /// Optional string field; scalar numbers and booleans are accepted
    /// and stringified.
    pub fn take_string(&mut self, key: &str) -> Result<Option<String>> {
        match self.values.remove(key) {
            None | Some(Yaml::Null) => Ok(None),
            Some(value) => Ok(Some(stringify(key, &value)?)),
        }
    }

    /// Required string field.
    pub fn require_string(&mut self, key: &str) -> Result<String> {
        match self.take_string(key)? {
            Some(value) => Ok(value),
            None => bail!("Missing required field '{key}'"),
        }
    }

    /// Boolean field with loose coercion: absent, `false`, `0`, the
    /// empty string, and the strings no/false/0 are all false.
    pub fn take_bool(&mut self, key: &str) -> bool {
        self.take_bool_opt(key).unwrap_or(false)
    }

    pub fn take_bool_opt(&mut self, key: &str) -> Option<bool> {
        match self.values.remove(key)? {
            Yaml::Null => None,
            value => Some(truthy(&value)),
        }
    }

    /// String-or-list field, normalized to a list.
    pub fn take_string_list(&mut self, key: &str) -> Result<Option<Vec<String>>> {
        match self.values.remove(key) {
            None | Some(Yaml::Null) => Ok(None),
            Some(Yaml::Sequence(items)) => Ok(Some(
                items
                    .iter()
                    .map(|item| stringify(key, item))
                    .collect::<Result<_>>()?,
            )),
            Some(value) => Ok(Some(vec![stringify(key, &value)?])),
        }
    }

    /// Integer field; rendered text is coerced back to a number.
    pub fn take_int(&mut self, key: &str) -> Result<Option<i64>> {
        let value = match self.values.remove(key) {
            None | Some(Yaml::Null) => return Ok(None),
            Some(Yaml::String(text)) => template::coerce_number(&text),
            Some(value) => value,
        };

        match value.as_i64() {
            Some(int) => Ok(Some(int)),
            None => bail!("Field '{key}' must be an integer"),
        }
    }

    /// Permission bits: YAML integers are taken as-is, strings are
    /// parsed as octal text ("0644").
    pub fn take_mode(&mut self, key: &str) -> Result<Option<u32>> {
        match self.values.remove(key) {
            None | Some(Yaml::Null) => Ok(None),
            Some(Yaml::Number(n)) => match n.as_u64() {
                Some(bits) if bits <= 0o7777 => Ok(Some(bits as u32)),
                _ => bail!("Field '{key}' is not a valid file mode"),
            },
            Some(Yaml::String(text)) => match u32::from_str_radix(&text, 8) {
                Ok(bits) => Ok(Some(bits)),
                Err(_) => bail!("Field '{key}' must be octal text, found '{text}'"),
            },
            Some(_) => bail!("Field '{key}' is not a valid file mode"),
        }
    }

    /// Construction ends here; leftover keys mean the descriptor named
    /// fields this variant does not understand.
    pub fn finish(self) -> Result<()> {
        if self.values.is_empty() {
            return Ok(());
        }

        let keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        bail!("Unrecognized fields: {}", keys.join(", "));
    }
}

fn stringify(key: &str, value: &Yaml) -> Result<String> {
    match value {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        _ => bail!("Field '{key}' must be a string"),
    }
}

/// The loose truthiness task fields use for yes/no style flags.
pub fn truthy(value: &Yaml) -> bool {
    match value {
        Yaml::Null => false,
        Yaml::Bool(b) => *b,
        Yaml::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Yaml::String(s) => {
            !s.is_empty() && !matches!(s.to_lowercase().as_str(), "no" | "false" | "0")
        }
        Yaml::Sequence(items) => !items.is_empty(),
        Yaml::Mapping(map) => !map.is_empty(),
        Yaml::Tagged(tagged) => truthy(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Yaml)]) -> TaskArgs {
        TaskArgs::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_require_string_missing() {
        let mut a = args(&[]);
        let err = a.require_string("dest").unwrap_err();
        assert!(err.to_string().contains("dest"));
    }

    #[test]
    fn test_take_string_stringifies_scalars() {
        let mut a = args(&[("port", Yaml::Number(8080.into()))]);
        assert_eq!(a.take_string("port").unwrap(), Some("8080".to_string()));
    }

    #[test]
    fn test_take_bool_coercions() {
        let mut a = args(&[
            ("a", Yaml::String("yes".to_string())),
            ("b", Yaml::String("no".to_string())),
            ("c", Yaml::String("False".to_string())),
            ("d", Yaml::Bool(true)),
        ]);
        assert!(a.take_bool("a"));
        assert!(!a.take_bool("b"));
        assert!(!a.take_bool("c"));
        assert!(a.take_bool("d"));
        assert!(!a.take_bool("missing"));
    }

    #[test]
    fn test_take_string_list_accepts_scalar() {
        let mut a = args(&[("packages", Yaml::String("git".to_string()))]);
        assert_eq!(
            a.take_string_list("packages").unwrap(),
            Some(vec!["git".to_string()])
        );
    }

    #[test]
    fn test_take_mode_octal_text_and_int() {
        let mut a = args(&[
            ("text", Yaml::String("0644".to_string())),
            ("num", Yaml::Number(0o755.into())),
        ]);
        assert_eq!(a.take_mode("text").unwrap(), Some(0o644));
        assert_eq!(a.take_mode("num").unwrap(), Some(0o755));
    }

    #[test]
    fn test_take_int_coerces_rendered_text() {
        let mut a = args(&[("depth", Yaml::String("3".to_string()))]);
        assert_eq!(a.take_int("depth").unwrap(), Some(3));
    }

    #[test]
    fn test_finish_rejects_leftovers() {
        let a = args(&[("bogus", Yaml::Bool(true))]);
        let err = a.finish().unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
