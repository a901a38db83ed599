//! Copy, Template, and GetUrl tasks: converge file content
//!
//! Exactly one source feeds the destination: a path, inline content,
//! or a URL. Files are compared byte-for-byte before anything is
//! written; directories mirror file-by-file, one way. Template sources
//! pass through the rendering engine first.

use anyhow::{Context as _, Result, bail};
use std::fs;
use std::io::Write as _;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Action;
use super::args::TaskArgs;
use super::metadata::update_file_metadata;
use crate::context::Context;
use crate::shell;

struct Copy {
    src: Option<PathBuf>,
    content: Option<String>,
    url: Option<String>,
    dest: PathBuf,
    owner: Option<String>,
    group: Option<String>,
    mode: Option<u32>,
    is_template: bool,
    validate: Option<String>,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_copy(args, false, false)
}

/// `template:` is `copy:` with rendering on by default.
pub fn build_template(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_copy(args, true, false)
}

/// `get_url:` is `copy:` with a required URL source.
pub fn build_get_url(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_copy(args, false, true)
}

fn build_copy(
    args: &mut TaskArgs,
    template_default: bool,
    require_url: bool,
) -> Result<Box<dyn Action>> {
    // an empty string is no source at all
    let src = args.take_string("src")?.filter(|s| !s.is_empty());
    let content = args.take_string("content")?.filter(|c| !c.is_empty());
    let url = args.take_string("url")?.filter(|u| !u.is_empty());

    if require_url && url.is_none() {
        bail!("Missing required field 'url'");
    }

    let sources = [src.is_some(), content.is_some(), url.is_some()];
    if sources.iter().filter(|present| **present).count() != 1 {
        bail!("Must provide exactly one of src, content, or url");
    }

    let dest = args.require_string("dest")?;

    Ok(Box::new(Copy {
        src: src.map(|s| PathBuf::from(shellexpand::tilde(&s).into_owned())),
        content,
        url,
        dest: PathBuf::from(shellexpand::tilde(&dest).into_owned()),
        owner: args.take_string("owner")?,
        group: args.take_string("group")?,
        mode: args.take_mode("mode")?,
        is_template: args.take_bool_opt("is_template").unwrap_or(template_default),
        validate: args.take_string("validate")?,
    }))
}

impl Action for Copy {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        let src = self.src.as_ref().map(|src| absolute(src, context));
        let dest = absolute(&self.dest, context);

        let content = match &self.url {
            Some(url) => Some(fetch(url)?),
            None => self.content.clone(),
        };

        if let Some(src) = &src {
            if !src.exists() {
                bail!("Source to copy does not exist: {}", src.display());
            }
        }

        if content.is_some() || src.as_ref().is_some_and(|s| s.is_file()) {
            if dest.exists() && !dest.is_file() {
                bail!("Destination is a directory, expected file: {}", dest.display());
            }

            if let Some(src) = &src {
                self.update_file(src, &dest, context)
            } else {
                let mut text = content.unwrap_or_default();
                if self.is_template {
                    text = context.render_str(&text, None)?;
                }
                let updated = self.update_file_content(&text, &dest, context)?;
                if !updated {
                    context.explain_skip(&format!(
                        "File {} already has the correct content and metadata",
                        dest.display()
                    ));
                }
                Ok(updated)
            }
        } else {
            if dest.exists() && !dest.is_dir() {
                bail!("Destination is a file, expected directory: {}", dest.display());
            }

            let src = src.context("Directory copy requires a src path")?;
            self.update_dir(&src, &dest, context)
        }
    }
}

impl Copy {
    fn update_file(&self, src: &Path, dest: &Path, context: &mut Context) -> Result<bool> {
        let updated = if self.is_template {
            let raw = fs::read_to_string(src)
                .with_context(|| format!("Failed to read template {}", src.display()))?;
            let rendered = context.render_str(&raw, None)?;
            self.update_file_content(&rendered, dest, context)?
        } else {
            self.update_file_direct(src, dest, context)?
        };

        if !updated {
            context.explain_skip(&format!(
                "File {} already has the correct content and metadata",
                dest.display()
            ));
        }

        Ok(updated)
    }

    /// Byte-compare `src` against `dest` and copy on mismatch.
    fn update_file_direct(&self, src: &Path, dest: &Path, context: &mut Context) -> Result<bool> {
        let mut updated = false;

        self.validate_path(src)?;

        if !dest.exists() {
            context.explain_change(&format!("Destination file does not exist: {}", dest.display()));
            self.explain_diff(&read(src)?, dest, &src.display().to_string(), context)?;
            if !context.dry_run {
                create_parent(dest)?;
                fs::copy(src, dest)
                    .with_context(|| format!("Failed to copy to {}", dest.display()))?;
            }
            updated = true;
        } else if !same_file(src, dest)? && read(src)? != read(dest)? {
            context.explain_change(&format!(
                "Source file ({}) differs from destination file ({})",
                src.display(),
                dest.display()
            ));
            self.explain_diff(&read(src)?, dest, &src.display().to_string(), context)?;
            if !context.dry_run {
                fs::copy(src, dest)
                    .with_context(|| format!("Failed to copy to {}", dest.display()))?;
            }
            updated = true;
        }

        let metadata_updated =
            update_file_metadata(dest, self.owner.as_deref(), self.group.as_deref(), self.mode, context)?;
        Ok(updated || metadata_updated)
    }

    /// Write rendered or inline text to `dest` when it differs. Content
    /// always ends with a newline.
    fn update_file_content(&self, text: &str, dest: &Path, context: &mut Context) -> Result<bool> {
        let mut updated = false;

        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }

        if self.validate.is_some() {
            let mut staged = tempfile::NamedTempFile::new()
                .context("Failed to stage content for validation")?;
            staged.write_all(text.as_bytes())?;
            staged.flush()?;
            self.validate_path(staged.path())?;
        }

        if !dest.exists() {
            self.explain_diff(text.as_bytes(), dest, "Template", context)?;
            if !context.dry_run {
                create_parent(dest)?;
                fs::write(dest, &text)
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
            }
            updated = true;
        } else if text.as_bytes() != read(dest)?.as_slice() {
            self.explain_diff(text.as_bytes(), dest, "Template", context)?;
            if !context.dry_run {
                fs::write(dest, &text)
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
            }
            updated = true;
        }

        let metadata_updated =
            update_file_metadata(dest, self.owner.as_deref(), self.group.as_deref(), self.mode, context)?;
        Ok(updated || metadata_updated)
    }

    /// Mirror every file under `src` into `dest`. One-way: extra files
    /// already in `dest` are left alone.
    fn update_dir(&self, src: &Path, dest: &Path, context: &mut Context) -> Result<bool> {
        let mut updated = false;

        for entry in WalkDir::new(src).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to walk source directory {}", src.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(src)
                .context("walked path escaped the source directory")?;
            if self.update_file(entry.path(), &dest.join(relative), context)? {
                updated = true;
            }
        }

        Ok(updated)
    }

    /// Run the `validate` command against a candidate file before it is
    /// installed. `%s` stands in for the path.
    fn validate_path(&self, path: &Path) -> Result<()> {
        let Some(validate) = &self.validate else {
            return Ok(());
        };

        let command = validate.replace("%s", &path.display().to_string());
        shell::run_sh(&command, None, None, shell::OK)?;
        Ok(())
    }

    fn explain_diff(
        &self,
        new_content: &[u8],
        dest: &Path,
        src_label: &str,
        context: &mut Context,
    ) -> Result<()> {
        if !context.explain {
            return Ok(());
        }

        let old_content = if dest.exists() { Some(read(dest)?) } else { None };
        let old_text = match &old_content {
            Some(bytes) => std::str::from_utf8(bytes).ok(),
            None => Some(""),
        };

        match (old_text, std::str::from_utf8(new_content).ok()) {
            (Some(old), Some(new)) => {
                let dest_label = dest.display().to_string();
                context.explain_change_diff(old, new, &dest_label, src_label);
            }
            _ => context.explain_change(&format!(
                "Binary files differ: {src_label} and {}",
                dest.display()
            )),
        }

        Ok(())
    }
}

fn absolute(path: &Path, context: &Context) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        context.root_directory.join(path)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn same_file(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = fs::metadata(a)?;
    let meta_b = fs::metadata(b)?;
    Ok(meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino())
}

fn fetch(url: &str) -> Result<String> {
    let mut response = ureq::get(url)
        .call()
        .with_context(|| format!("Failed to fetch {url}"))?;
    response
        .body_mut()
        .read_to_string()
        .with_context(|| format!("Failed to read response body from {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use crate::task::tests::build_args;
    use serde_yaml::Value as Yaml;

    fn content_copy(content: &str, dest: &Path) -> Box<dyn Action> {
        let mut args = build_args(&[
            ("content", Yaml::String(content.to_string())),
            ("dest", Yaml::String(dest.display().to_string())),
        ]);
        build(&mut args).unwrap()
    }

    #[test]
    fn test_requires_exactly_one_source() {
        let mut none = build_args(&[("dest", Yaml::String("/tmp/x".to_string()))]);
        assert!(build(&mut none).is_err());

        let mut both = build_args(&[
            ("dest", Yaml::String("/tmp/x".to_string())),
            ("src", Yaml::String("a".to_string())),
            ("content", Yaml::String("b".to_string())),
        ]);
        assert!(build(&mut both).is_err());

        // an empty content string is not a source
        let mut empty = build_args(&[
            ("dest", Yaml::String("/tmp/x".to_string())),
            ("content", Yaml::String(String::new())),
        ]);
        assert!(build(&mut empty).is_err());
    }

    #[test]
    fn test_get_url_requires_url() {
        let mut args = build_args(&[("dest", Yaml::String("/tmp/x".to_string()))]);
        assert!(build_get_url(&mut args).is_err());
    }

    #[test]
    fn test_content_creates_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("greeting");
        let action = content_copy("hello", &dest);

        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello\n");

        // second run converges to no change
        assert!(!action.apply(&mut context).unwrap());
    }

    #[test]
    fn test_content_rewrites_on_difference() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("greeting");
        fs::write(&dest, "old\n").unwrap();

        let action = content_copy("hello", &dest);
        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello\n");
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("greeting");

        let action = content_copy("hello", &dest);
        let mut context = test_context(true, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert!(!dest.exists());
    }

    #[test]
    fn test_template_content_renders() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rendered");
        let mut args = build_args(&[
            ("content", Yaml::String("value={{ 2 + 2 }}".to_string())),
            ("dest", Yaml::String(dest.display().to_string())),
        ]);
        let action = build_template(&mut args).unwrap();

        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "value=4\n");
    }

    #[test]
    fn test_src_copy_and_convergence() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.conf");
        let dest = dir.path().join("dest.conf");
        fs::write(&src, "a=1\n").unwrap();

        let mut args = build_args(&[
            ("src", Yaml::String(src.display().to_string())),
            ("dest", Yaml::String(dest.display().to_string())),
        ]);
        let action = build(&mut args).unwrap();

        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "a=1\n");
        assert!(!action.apply(&mut context).unwrap());
    }

    #[test]
    fn test_missing_src_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = build_args(&[
            ("src", Yaml::String(dir.path().join("absent").display().to_string())),
            ("dest", Yaml::String(dir.path().join("out").display().to_string())),
        ]);
        let action = build(&mut args).unwrap();
        let mut context = test_context(false, false, false);
        let err = action.apply(&mut context).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_dest_directory_conflict_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("d");
        fs::create_dir(&dest).unwrap();

        let action = content_copy("hello", &dest);
        let mut context = test_context(false, false, false);
        let err = action.apply(&mut context).unwrap_err();
        assert!(err.to_string().contains("expected file"));
    }

    #[test]
    fn test_directory_mirror_one_way() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        let dest = dir.path().join("out");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a\n").unwrap();
        fs::write(src.join("nested/b.txt"), "b\n").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("extra.txt"), "keep me\n").unwrap();

        let mut args = build_args(&[
            ("src", Yaml::String(src.display().to_string())),
            ("dest", Yaml::String(dest.display().to_string())),
        ]);
        let action = build(&mut args).unwrap();

        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).unwrap());
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "a\n");
        assert_eq!(fs::read_to_string(dest.join("nested/b.txt")).unwrap(), "b\n");
        assert!(dest.join("extra.txt").exists());

        assert!(!action.apply(&mut context).unwrap());
    }

    #[test]
    fn test_validate_rejects_bad_content() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("checked");
        let mut args = build_args(&[
            ("content", Yaml::String("data".to_string())),
            ("dest", Yaml::String(dest.display().to_string())),
            ("validate", Yaml::String("grep -q expected %s".to_string())),
        ]);
        let action = build(&mut args).unwrap();

        let mut context = test_context(false, false, false);
        assert!(action.apply(&mut context).is_err());
        assert!(!dest.exists());
    }
}
