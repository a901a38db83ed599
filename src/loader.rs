//! Setup document loading
//!
//! Parses the root YAML document, collects variables (prompted and
//! from files), and expands the task list into ready-to-run [`Task`]
//! values. All rendering happens here, before any task executes, so a
//! broken descriptor fails the run up front.

use anyhow::{Context as _, Result, anyhow, bail};
use dialoguer::{Input, Password};
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::context::Context;
use crate::task::args::{TaskArgs, truthy};
use crate::task::{Task, VARIANTS};

/// Included files may include further files; past this depth the chain
/// is assumed to be circular.
const MAX_INCLUDE_DEPTH: usize = 32;

pub fn load(setup_file: &Path, context: &mut Context) -> Result<Vec<Task>> {
    let text = fs::read_to_string(setup_file)
        .with_context(|| format!("Could not read {}", setup_file.display()))?;
    let mut document: Yaml = serde_yaml::from_str(&text)
        .with_context(|| format!("Could not parse {}", setup_file.display()))?;

    if let Yaml::Sequence(items) = document {
        if items.len() > 1 {
            bail!(
                "Cannot specify multiple root list items in {}",
                setup_file.display()
            );
        }
        document = items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Setup file is empty: {}", setup_file.display()))?;
    }

    let root = match document {
        Yaml::Mapping(map) => map,
        _ => bail!("Setup file must be a mapping: {}", setup_file.display()),
    };

    prompt_variables(root.get("vars_prompt"), context)?;
    file_variables(root.get("vars_files"), context)?;

    let mut tasks = Vec::new();
    load_task_list(root.get("tasks"), context, &[], &mut tasks, 0)?;
    Ok(tasks)
}

// ============================================================================
// Variables
// ============================================================================

fn prompt_variables(prompts: Option<&Yaml>, context: &mut Context) -> Result<()> {
    for entry in as_list(prompts) {
        let (name, settings) = match entry {
            Yaml::String(name) => (name.clone(), None),
            Yaml::Mapping(map) => {
                let name = map
                    .get("name")
                    .and_then(Yaml::as_str)
                    .ok_or_else(|| anyhow!("Missing 'name' in vars_prompt"))?;
                (name.to_string(), Some(map))
            }
            _ => bail!("Missing 'name' in vars_prompt"),
        };

        // Overrides from the command line take priority and suppress
        // the prompt entirely.
        if context.variables.contains_key(&name) {
            continue;
        }

        let field = |key: &str| settings.and_then(|map| map.get(key));
        let prompt = field("prompt")
            .and_then(Yaml::as_str)
            .map_or_else(|| format!("Enter a value for {name}"), str::to_string);
        let private = field("private").is_some_and(truthy);
        let confirm = field("confirm").is_some_and(truthy);
        let allow_empty = field("allow_empty").is_some_and(truthy);

        let value = read_value(&prompt, private, confirm, allow_empty)?;
        context.variables.insert(name, Yaml::String(value));
    }
    Ok(())
}

fn read_value(prompt: &str, private: bool, confirm: bool, allow_empty: bool) -> Result<String> {
    if private {
        let password = Password::new()
            .with_prompt(prompt)
            .allow_empty_password(allow_empty);
        return Ok(if confirm {
            password
                .with_confirmation("Confirm", "Inputs did not match")
                .interact()?
        } else {
            password.interact()?
        });
    }

    loop {
        let value: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(allow_empty)
            .interact_text()?;
        if !confirm {
            return Ok(value);
        }

        let check: String = Input::new()
            .with_prompt("Confirm")
            .allow_empty(allow_empty)
            .interact_text()?;
        if value == check {
            return Ok(value);
        }
        println!("Inputs did not match");
    }
}

fn file_variables(files: Option<&Yaml>, context: &mut Context) -> Result<()> {
    for file in as_list(files) {
        let path = match file {
            Yaml::String(path) => context.render_str(path, None)?,
            _ => bail!("vars_files entries must be paths"),
        };
        let path = context.root_directory.join(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Could not read variable file {}", path.display()))?;
        let values: serde_yaml::Mapping = serde_yaml::from_str(&text)
            .with_context(|| format!("Could not parse variable file {}", path.display()))?;

        // Values render in file order, so later entries may reference
        // earlier ones.
        for (key, value) in values {
            let Yaml::String(name) = key else {
                bail!("Variable names in {} must be strings", path.display());
            };
            let rendered = context.render_object(&value, None)?;
            context.variables.insert(name, rendered);
        }
    }
    Ok(())
}

// ============================================================================
// Tasks
// ============================================================================

fn load_task_list(
    task_list: Option<&Yaml>,
    context: &Context,
    extra_tags: &[String],
    tasks: &mut Vec<Task>,
    depth: usize,
) -> Result<()> {
    let items = match task_list {
        None | Some(Yaml::Null) => return Ok(()),
        Some(Yaml::Sequence(items)) => items,
        Some(_) => bail!("Task definitions must be in a list"),
    };

    for item in items {
        let Yaml::Mapping(map) = item else {
            bail!("Task definitions must be mappings");
        };

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            let Yaml::String(key) = key else {
                bail!("Task fields must have string names");
            };
            fields.insert(key.clone(), value.clone());
        }

        let mut tags = match fields.remove("tags") {
            None | Some(Yaml::Null) => Vec::new(),
            Some(Yaml::String(tag)) => vec![tag],
            Some(Yaml::Sequence(items)) => items
                .into_iter()
                .map(|tag| match tag {
                    Yaml::String(tag) => Ok(tag),
                    _ => bail!("Tags must be strings"),
                })
                .collect::<Result<_>>()?,
            Some(_) => bail!("Tags must be strings"),
        };
        tags.extend(extra_tags.iter().cloned());

        for loop_item in expand_loop(&mut fields)? {
            load_task_item(fields.clone(), context, &tags, &loop_item, tasks, depth)?;
        }
    }
    Ok(())
}

/// Expand `with_fileglob` into one variable binding per matched path.
/// The pattern is used verbatim, so a pattern with no matches loads
/// zero tasks.
fn expand_loop(fields: &mut BTreeMap<String, Yaml>) -> Result<Vec<BTreeMap<String, Yaml>>> {
    match fields.remove("with_fileglob") {
        None | Some(Yaml::Null) => Ok(vec![BTreeMap::new()]),
        Some(Yaml::String(pattern)) => {
            let paths = glob::glob(&pattern)
                .with_context(|| format!("Invalid fileglob pattern '{pattern}'"))?;
            let mut items = Vec::new();
            for path in paths {
                let path = path?;
                let mut item = BTreeMap::new();
                item.insert(
                    "item".to_string(),
                    Yaml::String(path.to_string_lossy().into_owned()),
                );
                items.push(item);
            }
            Ok(items)
        }
        Some(_) => bail!("with_fileglob must be a pattern string"),
    }
}

fn load_task_item(
    mut fields: BTreeMap<String, Yaml>,
    context: &Context,
    tags: &[String],
    loop_item: &BTreeMap<String, Yaml>,
    tasks: &mut Vec<Task>,
    depth: usize,
) -> Result<()> {
    let tags: Vec<String> = tags
        .iter()
        .map(|tag| context.render_str(tag, None))
        .collect::<Result<_>>()?;

    // Includes load before the tag filter so their tasks can carry
    // their own tags.
    if fields.contains_key("include") {
        for value in fields.values_mut() {
            *value = context.render_object(value, Some(loop_item))?;
        }
        return include(fields, context, &tags, tasks, depth);
    }

    if !context.tags.is_empty() && !tags.iter().any(|tag| context.tags.contains(tag)) {
        return Ok(());
    }

    let variant = VARIANTS
        .iter()
        .find(|(key, _)| fields.contains_key(*key))
        .map(|(key, build)| (*key, *build));
    let Some((variant, build)) = variant else {
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        bail!("No task matched: {}", keys.join(", "));
    };

    // A scalar variant value is shorthand for a single field of the
    // same name; a mapping merges over the sibling fields.
    match fields.remove(variant) {
        Some(Yaml::Mapping(nested)) => {
            for (key, value) in nested {
                let Yaml::String(key) = key else {
                    bail!("Task fields must have string names");
                };
                fields.insert(key, value);
            }
        }
        Some(value) => {
            fields.insert(variant.to_string(), value);
        }
        None => {}
    }

    for value in fields.values_mut() {
        *value = context.render_object(value, Some(loop_item))?;
    }

    let mut args = TaskArgs::new(fields);
    let name = args.take_string("name")?;
    let when = args.take_string("when")?;
    let register = args.take_string("register")?;

    let label = name
        .as_ref()
        .map_or_else(|| format!("'{variant}'"), |name| format!("'{name}' ({variant})"));
    let action = build(&mut args)
        .and_then(|action| args.finish().map(|()| action))
        .with_context(|| format!("Error loading task {label}"))?;

    tasks.push(Task {
        name: name.unwrap_or_else(|| format!("Unnamed {variant}")),
        when,
        register,
        action,
    });
    Ok(())
}

fn include(
    fields: BTreeMap<String, Yaml>,
    context: &Context,
    parent_tags: &[String],
    tasks: &mut Vec<Task>,
    depth: usize,
) -> Result<()> {
    if depth >= MAX_INCLUDE_DEPTH {
        bail!("Include depth limit exceeded; is there an include cycle?");
    }

    let mut args = TaskArgs::new(fields);
    let path = args.require_string("include")?;
    let extra_tags = args.take_string_list("tags")?.unwrap_or_default();
    args.finish()?;

    let include_file = context.root_directory.join(path);
    if !include_file.exists() {
        bail!("Included file does not exist: {}", include_file.display());
    }

    let text = fs::read_to_string(&include_file)
        .with_context(|| format!("Could not read {}", include_file.display()))?;
    let included: Yaml = serde_yaml::from_str(&text)
        .with_context(|| format!("Could not parse {}", include_file.display()))?;

    let mut tags = extra_tags;
    tags.extend(parent_tags.iter().cloned());
    load_task_list(Some(&included), context, &tags, tasks, depth + 1)
}

fn as_list(value: Option<&Yaml>) -> Vec<&Yaml> {
    match value {
        None | Some(Yaml::Null) => Vec::new(),
        Some(Yaml::Sequence(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}
