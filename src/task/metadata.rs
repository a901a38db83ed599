//! Shared file metadata convergence
//!
//! File-producing tasks finish by fixing owner, group, and mode on
//! their destination. Only differing attributes are touched; under
//! dry-run a not-yet-existing target optimistically counts as a change
//! (a stat would fail before the simulated create).

use anyhow::{Context as _, Result, bail};
use nix::unistd::{Gid, Group, Uid, User, chown};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use crate::context::Context;

pub fn update_file_metadata(
    path: &Path,
    owner: Option<&str>,
    group: Option<&str>,
    mode: Option<u32>,
    context: &mut Context,
) -> Result<bool> {
    if context.dry_run && !path.exists() {
        return Ok(true);
    }

    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    let mut updated = false;
    let mut chown_needed = false;

    if let Some(owner) = owner {
        let current = owner_name(&metadata)?;
        if current != owner {
            context.explain_change(&format!(
                "Owner of file {} should be '{owner}', found '{current}'",
                path.display()
            ));
            chown_needed = true;
        }
    }

    if let Some(group) = group {
        let current = group_name(&metadata)?;
        if current != group {
            context.explain_change(&format!(
                "Group of file {} should be '{group}', found '{current}'",
                path.display()
            ));
            chown_needed = true;
        }
    }

    if chown_needed {
        if !context.dry_run {
            chown(path, lookup_uid(owner)?, lookup_gid(group)?)
                .with_context(|| format!("Failed to chown {}", path.display()))?;
        }
        updated = true;
    }

    if let Some(mode) = mode {
        let current = metadata.permissions().mode() & 0o7777;
        if current != mode {
            context.explain_change(&format!(
                "Mode of file {} should be '{mode:o}', found '{current:o}'",
                path.display()
            ));
            if !context.dry_run {
                fs::set_permissions(path, fs::Permissions::from_mode(mode))
                    .with_context(|| format!("Failed to chmod {}", path.display()))?;
            }
            updated = true;
        }
    }

    Ok(updated)
}

fn owner_name(metadata: &fs::Metadata) -> Result<String> {
    let uid = Uid::from_raw(metadata.uid());
    match User::from_uid(uid).context("Failed to look up file owner")? {
        Some(user) => Ok(user.name),
        None => Ok(uid.to_string()),
    }
}

fn group_name(metadata: &fs::Metadata) -> Result<String> {
    let gid = Gid::from_raw(metadata.gid());
    match Group::from_gid(gid).context("Failed to look up file group")? {
        Some(group) => Ok(group.name),
        None => Ok(gid.to_string()),
    }
}

fn lookup_uid(owner: Option<&str>) -> Result<Option<Uid>> {
    let Some(owner) = owner else { return Ok(None) };
    match User::from_name(owner).with_context(|| format!("Failed to look up user '{owner}'"))? {
        Some(user) => Ok(Some(user.uid)),
        None => bail!("No such user: {owner}"),
    }
}

fn lookup_gid(group: Option<&str>) -> Result<Option<Gid>> {
    let Some(group) = group else { return Ok(None) };
    match Group::from_name(group).with_context(|| format!("Failed to look up group '{group}'"))? {
        Some(group) => Ok(Some(group.gid)),
        None => bail!("No such group: {group}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use std::io::Write as _;

    #[test]
    fn test_mode_mismatch_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::File::create(&path)
            .unwrap()
            .write_all(b"x")
            .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let mut context = test_context(false, false, false);
        let updated = update_file_metadata(&path, None, None, Some(0o644), &mut context).unwrap();
        assert!(updated);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_matching_mode_is_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::File::create(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let mut context = test_context(false, false, false);
        let updated = update_file_metadata(&path, None, None, Some(0o644), &mut context).unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_dry_run_reports_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::File::create(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let mut context = test_context(true, false, false);
        let updated = update_file_metadata(&path, None, None, Some(0o644), &mut context).unwrap();
        assert!(updated);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_dry_run_missing_target_would_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = test_context(true, false, false);
        let updated =
            update_file_metadata(&dir.path().join("absent"), None, None, Some(0o644), &mut context)
                .unwrap();
        assert!(updated);
    }
}
