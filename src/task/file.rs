//! File, Directory, Symlink, and HardLink tasks
//!
//! Converge a path to exist as one specific kind. An existing path of
//! the wrong kind is an error, never silently replaced; metadata is
//! fixed afterward like every other file-producing task.

use anyhow::{Context as _, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use super::Action;
use super::args::TaskArgs;
use super::metadata::update_file_metadata;
use crate::context::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    File,
    Directory,
    Symlink,
    HardLink,
}

struct File {
    path: PathBuf,
    target: Option<PathBuf>,
    owner: Option<String>,
    group: Option<String>,
    mode: Option<u32>,
    kind: FileKind,
}

pub fn build(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_kind(args, None)
}

pub fn build_directory(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_kind(args, Some(FileKind::Directory))
}

pub fn build_symlink(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_kind(args, Some(FileKind::Symlink))
}

pub fn build_hard_link(args: &mut TaskArgs) -> Result<Box<dyn Action>> {
    build_kind(args, Some(FileKind::HardLink))
}

fn build_kind(args: &mut TaskArgs, forced: Option<FileKind>) -> Result<Box<dyn Action>> {
    let mut directory = args.take_bool("directory");
    let mut symlink = args.take_bool("symlink");
    let mut hard_link = args.take_bool("hard_link");
    match forced {
        Some(FileKind::Directory) => directory = true,
        Some(FileKind::Symlink) => symlink = true,
        Some(FileKind::HardLink) => hard_link = true,
        _ => {}
    }

    if [directory, symlink, hard_link].iter().filter(|f| **f).count() > 1 {
        bail!("Must only provide one of directory, symlink, or hard_link");
    }

    let kind = if directory {
        FileKind::Directory
    } else if symlink {
        FileKind::Symlink
    } else if hard_link {
        FileKind::HardLink
    } else {
        FileKind::File
    };

    let path = args.require_string("path")?;
    let target = args.take_string("target")?;
    if target.is_some() && !matches!(kind, FileKind::Symlink | FileKind::HardLink) {
        bail!("Must provide a target with symlink/hard_link");
    }
    if target.is_none() && matches!(kind, FileKind::Symlink | FileKind::HardLink) {
        bail!("Missing required field 'target' for symlink/hard_link");
    }

    Ok(Box::new(File {
        path: PathBuf::from(shellexpand::tilde(&path).into_owned()),
        target: target.map(|t| PathBuf::from(shellexpand::tilde(&t).into_owned())),
        owner: args.take_string("owner")?,
        group: args.take_string("group")?,
        mode: args.take_mode("mode")?,
        kind,
    }))
}

impl Action for File {
    fn apply(&self, context: &mut Context) -> Result<bool> {
        let mut updated = false;

        // exists() follows symlinks; is_symlink() catches dangling links
        if !self.path.exists() && !self.path.is_symlink() {
            context.explain_change(&format!("Path {} does not exist", self.path.display()));
            if !context.dry_run {
                self.create()?;
            }
            updated = true;
        } else {
            self.check_kind()?;
        }

        let metadata_updated = update_file_metadata(
            &self.path,
            self.owner.as_deref(),
            self.group.as_deref(),
            self.mode,
            context,
        )?;

        let updated = updated || metadata_updated;
        if !updated {
            context.explain_skip(&format!(
                "Path {} is already in the correct state",
                self.path.display()
            ));
        }

        Ok(updated)
    }
}

impl File {
    fn create(&self) -> Result<()> {
        match self.kind {
            FileKind::File => {
                create_parent(&self.path)?;
                fs::File::create(&self.path)
                    .with_context(|| format!("Failed to create {}", self.path.display()))?;
            }
            FileKind::Directory => {
                fs::create_dir_all(&self.path)
                    .with_context(|| format!("Failed to create {}", self.path.display()))?;
            }
            FileKind::Symlink => {
                let target = self.required_target()?;
                std::os::unix::fs::symlink(target, &self.path).with_context(|| {
                    format!(
                        "Failed to create symlink {} -> {}",
                        self.path.display(),
                        target.display()
                    )
                })?;
            }
            FileKind::HardLink => {
                let target = self.required_target()?;
                fs::hard_link(target, &self.path).with_context(|| {
                    format!(
                        "Failed to create hard link {} -> {}",
                        self.path.display(),
                        target.display()
                    )
                })?;
            }
        }
        Ok(())
    }

    fn check_kind(&self) -> Result<()> {
        match self.kind {
            FileKind::Symlink if !self.path.is_symlink() => {
                bail!("Path exists but is not a symlink: {}", self.path.display());
            }
            FileKind::Directory if !self.path.is_dir() => {
                bail!("Path exists but is not a directory: {}", self.path.display());
            }
            FileKind::File if !self.path.is_file() => {
                bail!("Path exists but is not a file: {}", self.path.display());
            }
            // a hard link is indistinguishable from its file
            _ => Ok(()),
        }
    }

    fn required_target(&self) -> Result<&Path> {
        self.target
            .as_deref()
            .context("symlink/hard_link requires a target")
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
