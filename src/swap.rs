// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Store link swapping.
//!
//! Files managed by the package manager are symbolic links into the
//! immutable store. Editing them in place is impossible, and rebuilding the
//! whole system for every experimental tweak is slow. A __swap__ replaces a
//! store link with an independent, editable copy of its content while keeping
//! the original link as a backup right beside it. Swapping the same path
//! again puts the original link back and throws the copy away.
//!
//! # Swap Pairs
//!
//! A live path `P` and its backup `P.nix-store-backup` form a __swap pair__.
//! The pair is in exactly one of the following states:
//!
//! - __Linked__: `P` links into the store and no backup exists.
//! - __Swapped__: a backup exists, `P` is the editable copy.
//! - __Unrelated__: `P` exists, but is not a store link and has no backup.
//!
//! The state is derived purely from what is on disk. There is no database,
//! and no lock file. The state of each path is probed once, and the rest of
//! the operation works off that snapshot.
//!
//! # Directories
//!
//! Swapping a directory switches the whole directory at once. If any backup
//! exists anywhere below it, every backup is restored and store links without
//! a backup are left alone. Otherwise, every store link below it is swapped.

use crate::{
    probe::{classify, read_target, store_target, Kind, ProbeError},
    prompt::{InquirePrompt, Prompt, PromptError},
};

use ignore::WalkBuilder;
use std::{
    fs::{copy, metadata, rename, set_permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Suffix appended to the file name of a backup.
pub const BACKUP_SUFFIX: &str = ".nix-store-backup";

/// Determine backup path of a live path.
pub fn backup_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

/// Determine live path that a backup belongs to.
///
/// Returns `None` if the path is not a backup.
pub fn live_path(path: impl AsRef<Path>) -> Option<PathBuf> {
    let path = path.as_ref();
    let name = path.file_name()?.to_str()?;
    match name.strip_suffix(BACKUP_SUFFIX) {
        Some(stem) if !stem.is_empty() => Some(path.with_file_name(stem)),
        _ => None,
    }
}

/// State of a swap pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapState {
    /// Live path links into the store, no backup exists.
    Linked { store_target: PathBuf },

    /// Backup exists, live path is whatever `live` says.
    Swapped { live: Kind },

    /// Live path exists, but is not managed by the store.
    Unrelated { kind: Kind },

    /// Neither live path nor backup exist.
    Missing,
}

impl SwapState {
    /// Probe state of swap pair at live path.
    ///
    /// # Errors
    ///
    /// - Return [`ProbeError`] if either path cannot be inspected.
    pub fn probe(path: impl AsRef<Path>, store_root: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let path = path.as_ref();
        let live = classify(path)?;

        if classify(backup_path(path))? != Kind::Missing {
            return Ok(Self::Swapped { live });
        }

        let state = match live {
            Kind::Missing => Self::Missing,
            Kind::Symlink => match store_target(path, store_root) {
                Some(store_target) => Self::Linked { store_target },
                None => Self::Unrelated { kind: live },
            },
            kind => Self::Unrelated { kind },
        };

        Ok(state)
    }
}

/// Swap store links with editable copies and back again.
#[derive(Debug, Clone)]
pub struct SwapEngine<P = InquirePrompt>
where
    P: Prompt,
{
    store_root: PathBuf,
    prompt: P,
}

impl<P> SwapEngine<P>
where
    P: Prompt,
{
    /// Construct new swap engine.
    ///
    /// Paths are only treated as store links if they resolve somewhere below
    /// `store_root`.
    pub fn new(store_root: impl Into<PathBuf>, prompt: P) -> Self {
        Self {
            store_root: store_root.into(),
            prompt,
        }
    }

    /// Toggle swap state of each target in order.
    ///
    /// Stops at the first target that fails, leaving the remaining targets
    /// untouched.
    ///
    /// # Errors
    ///
    /// - Return [`SwapError::InvalidTarget`] if a target has neither a live
    ///   path nor a backup.
    /// - Return other [`SwapError`] variants for I/O failures.
    pub fn swap(&self, targets: impl IntoIterator<Item = impl AsRef<Path>>) -> Result<()> {
        for target in targets {
            self.swap_target(target.as_ref())?;
        }

        Ok(())
    }

    fn swap_target(&self, path: &Path) -> Result<()> {
        match classify(path)? {
            Kind::Directory => self.swap_directory(path),
            _ => self.swap_leaf(path),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn swap_directory(&self, dir: &Path) -> Result<()> {
        let mut swapped = Vec::new();
        let mut linked = Vec::new();

        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        for entry in walker {
            let entry = entry?;
            let Some(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                continue;
            }

            // INVARIANT: Backup detection comes before store link detection.
            if let Some(live) = live_path(entry.path()) {
                swapped.push(live);
            } else if file_type.is_symlink()
                && store_target(entry.path(), &self.store_root).is_some()
            {
                linked.push(entry.into_path());
            }
        }

        if swapped.is_empty() {
            debug!("swap {} store links under {:?}", linked.len(), dir.display());
            for path in linked {
                self.swap_leaf(&path)?;
            }

            return Ok(());
        }

        // INVARIANT: Store links without backup are files already restored.
        let unswapped = linked
            .iter()
            .filter(|path| !swapped.contains(path))
            .count();
        if unswapped != 0 {
            warn!(
                "{unswapped} store links under {:?} have no backup, leaving them alone",
                dir.display()
            );
        }

        debug!("restore {} backups under {:?}", swapped.len(), dir.display());
        for path in swapped {
            self.swap_leaf(&path)?;
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn swap_leaf(&self, path: &Path) -> Result<()> {
        match SwapState::probe(path, &self.store_root)? {
            SwapState::Swapped { live } => self.restore(path, live),
            SwapState::Linked { store_target } => {
                debug!("{:?} links to {:?}", path.display(), store_target.display());
                self.detach(path)
            }
            SwapState::Unrelated { kind } if kind.is_leaf() => {
                warn!("{:?} is not a store link, swapping anyway", path.display());
                self.detach(path)
            }
            SwapState::Unrelated { .. } | SwapState::Missing => Err(SwapError::InvalidTarget {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Move live path to its backup, and put an editable copy in its place.
    fn detach(&self, path: &Path) -> Result<()> {
        let backup = backup_path(path);
        rename(path, &backup).map_err(|err| SwapError::Rename {
            source: err,
            from: path.to_path_buf(),
            to: backup.clone(),
        })?;

        if let Err(err) = copy(&backup, path) {
            // INVARIANT: Never leave a backup without a live path behind.
            if let Err(undo) = rename(&backup, path) {
                warn!("failed to move {:?} back: {undo}", backup.display());
            }

            return Err(SwapError::Copy {
                source: err,
                from: backup,
                to: path.to_path_buf(),
            });
        }

        // INVARIANT: Store content is read-only, but the copy must be editable.
        let mut permissions = metadata(path)
            .map_err(|err| SwapError::Permissions {
                source: err,
                path: path.to_path_buf(),
            })?
            .permissions();
        permissions.set_mode(permissions.mode() | 0o200);
        set_permissions(path, permissions).map_err(|err| SwapError::Permissions {
            source: err,
            path: path.to_path_buf(),
        })?;

        info!("swapped {:?}", path.display());

        Ok(())
    }

    /// Move backup over live path, discarding the editable copy.
    fn restore(&self, path: &Path, live: Kind) -> Result<()> {
        let backup = backup_path(path);
        if live != Kind::Missing {
            let message = format!("discard changes to {} and restore it?", path.display());
            if !self.prompt.confirm(&message)? {
                warn!("leave {:?} swapped", path.display());
                return Ok(());
            }
        }

        rename(&backup, path).map_err(|err| SwapError::Rename {
            source: err,
            from: backup.clone(),
            to: path.to_path_buf(),
        })?;

        match read_target(path) {
            Ok(target) => info!("restored {:?} -> {:?}", path.display(), target.display()),
            Err(_) => info!("restored {:?}", path.display()),
        }

        Ok(())
    }
}

/// Swap error types.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// Target is neither a live file nor a backup.
    #[error("invalid target {:?}: nothing to swap or restore", path.display())]
    InvalidTarget { path: PathBuf },

    /// Target cannot be inspected.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Rename between live path and backup fails.
    #[error("failed to move {:?} to {:?}", from.display(), to.display())]
    Rename {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Editable copy cannot be created.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Editable copy cannot be made writable.
    #[error("failed to make {:?} writable", path.display())]
    Permissions {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// User cannot be asked for confirmation.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = SwapError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::AssumeAnswer;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::Cell,
        env::current_dir,
        fs::{create_dir_all, read_to_string, symlink_metadata, write},
        os::unix::fs::symlink,
    };

    /// Place file in fake store, and link to it from `link`.
    fn store_link(name: &str, content: &str, link: &str) -> anyhow::Result<PathBuf> {
        let root = current_dir()?.canonicalize()?;
        let target = root.join("store").join(name);
        create_dir_all(root.join("store"))?;
        write(&target, content)?;
        set_permissions(&target, std::fs::Permissions::from_mode(0o444))?;

        let link = root.join(link);
        if let Some(parent) = link.parent() {
            create_dir_all(parent)?;
        }
        symlink(&target, &link)?;

        Ok(target)
    }

    fn engine(answer: bool) -> anyhow::Result<SwapEngine<AssumeAnswer>> {
        Ok(SwapEngine::new(
            current_dir()?.join("store"),
            AssumeAnswer(answer),
        ))
    }

    fn is_symlink(path: impl AsRef<Path>) -> bool {
        symlink_metadata(path)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false)
    }

    #[test]
    fn backup_and_live_path_mapping() {
        assert_eq!(
            backup_path("/etc/cfg"),
            PathBuf::from("/etc/cfg.nix-store-backup")
        );
        assert_eq!(
            live_path("/etc/cfg.nix-store-backup"),
            Some(PathBuf::from("/etc/cfg"))
        );
        assert_eq!(live_path("/etc/cfg"), None);
        assert_eq!(live_path("/etc/.nix-store-backup"), None);
    }

    #[sealed_test]
    fn swap_then_restore_store_link() -> anyhow::Result<()> {
        let target = store_link("abc-cfg", "hello", "etc/cfg")?;
        let engine = engine(true)?;

        engine.swap(["etc/cfg"])?;
        assert!(is_symlink("etc/cfg.nix-store-backup"));
        assert_eq!(read_target("etc/cfg.nix-store-backup")?, target);
        assert!(!is_symlink("etc/cfg"));
        assert_eq!(read_to_string("etc/cfg")?, "hello");

        engine.swap(["etc/cfg"])?;
        assert!(is_symlink("etc/cfg"));
        assert_eq!(read_target("etc/cfg")?, target);
        assert_eq!(classify("etc/cfg.nix-store-backup")?, Kind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn swapped_copy_is_independent_and_writable() -> anyhow::Result<()> {
        store_link("abc-cfg", "hello", "etc/cfg")?;
        engine(true)?.swap(["etc/cfg"])?;

        write("etc/cfg", "goodbye")?;
        assert_eq!(read_to_string("etc/cfg")?, "goodbye");
        assert_eq!(read_to_string("etc/cfg.nix-store-backup")?, "hello");

        Ok(())
    }

    #[sealed_test]
    fn declined_restore_changes_nothing() -> anyhow::Result<()> {
        store_link("abc-cfg", "hello", "etc/cfg")?;
        engine(true)?.swap(["etc/cfg"])?;
        write("etc/cfg", "edited")?;

        engine(false)?.swap(["etc/cfg"])?;
        assert!(!is_symlink("etc/cfg"));
        assert_eq!(read_to_string("etc/cfg")?, "edited");
        assert!(is_symlink("etc/cfg.nix-store-backup"));

        Ok(())
    }

    #[sealed_test]
    fn restore_without_live_file_needs_no_confirmation() -> anyhow::Result<()> {
        let target = store_link("abc-cfg", "hello", "etc/cfg")?;
        engine(true)?.swap(["etc/cfg"])?;
        std::fs::remove_file("etc/cfg")?;

        engine(false)?.swap(["etc/cfg"])?;
        assert_eq!(read_target("etc/cfg")?, target);
        assert_eq!(classify("etc/cfg.nix-store-backup")?, Kind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn invalid_target_is_rejected_untouched() -> anyhow::Result<()> {
        let result = engine(true)?.swap(["does/not/exist"]);
        assert!(matches!(result, Err(SwapError::InvalidTarget { .. })));
        assert_eq!(classify("does/not/exist.nix-store-backup")?, Kind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn first_failure_stops_remaining_targets() -> anyhow::Result<()> {
        store_link("a-first", "first", "etc/first")?;
        store_link("b-last", "last", "etc/last")?;

        let result = engine(true)?.swap(["etc/first", "etc/missing", "etc/last"]);
        assert!(matches!(result, Err(SwapError::InvalidTarget { .. })));
        assert!(!is_symlink("etc/first"));
        assert!(is_symlink("etc/last"));
        assert_eq!(classify("etc/last.nix-store-backup")?, Kind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn unrelated_leaf_is_swapped_verbatim() -> anyhow::Result<()> {
        write("plain", "blah")?;
        engine(true)?.swap(["plain"])?;

        assert_eq!(read_to_string("plain")?, "blah");
        assert_eq!(read_to_string("plain.nix-store-backup")?, "blah");

        Ok(())
    }

    #[sealed_test]
    fn directory_swaps_all_store_links_then_restores_all() -> anyhow::Result<()> {
        let one = store_link("a-one", "one", "conf/one")?;
        let two = store_link("b-two", "two", "conf/nested/two")?;
        write("conf/local", "mine")?;
        let engine = engine(true)?;

        engine.swap(["conf"])?;
        assert!(!is_symlink("conf/one"));
        assert!(!is_symlink("conf/nested/two"));
        assert!(is_symlink("conf/one.nix-store-backup"));
        assert!(is_symlink("conf/nested/two.nix-store-backup"));
        assert_eq!(classify("conf/local.nix-store-backup")?, Kind::Missing);

        write("conf/one", "edited")?;

        engine.swap(["conf"])?;
        assert_eq!(read_target("conf/one")?, one);
        assert_eq!(read_target("conf/nested/two")?, two);
        assert_eq!(classify("conf/one.nix-store-backup")?, Kind::Missing);
        assert_eq!(classify("conf/nested/two.nix-store-backup")?, Kind::Missing);
        assert_eq!(read_to_string("conf/local")?, "mine");

        Ok(())
    }

    #[sealed_test]
    fn partly_swapped_directory_restores_backups_only() -> anyhow::Result<()> {
        let one = store_link("a-one", "one", "conf/one")?;
        let two = store_link("b-two", "two", "conf/two")?;
        let engine = engine(true)?;
        engine.swap(["conf/one"])?;

        engine.swap(["conf"])?;
        assert_eq!(read_target("conf/one")?, one);
        assert_eq!(classify("conf/one.nix-store-backup")?, Kind::Missing);
        assert_eq!(read_target("conf/two")?, two);
        assert_eq!(classify("conf/two.nix-store-backup")?, Kind::Missing);

        Ok(())
    }

    /// Decline the first question, agree to everything after.
    #[derive(Default)]
    struct DeclineFirst {
        asked: Cell<bool>,
    }

    impl Prompt for DeclineFirst {
        fn confirm(&self, _message: &str) -> crate::prompt::Result<bool> {
            Ok(self.asked.replace(true))
        }
    }

    #[sealed_test]
    fn declined_directory_restore_can_be_retried() -> anyhow::Result<()> {
        let one = store_link("a-one", "one", "conf/one")?;
        let two = store_link("b-two", "two", "conf/two")?;
        engine(true)?.swap(["conf"])?;

        let store = current_dir()?.join("store");
        SwapEngine::new(&store, DeclineFirst::default()).swap(["conf"])?;
        assert!(!is_symlink("conf/one"));
        assert!(is_symlink("conf/one.nix-store-backup"));
        assert_eq!(read_target("conf/two")?, two);

        engine(true)?.swap(["conf"])?;
        assert_eq!(read_target("conf/one")?, one);
        assert_eq!(classify("conf/one.nix-store-backup")?, Kind::Missing);
        assert_eq!(read_target("conf/two")?, two);

        Ok(())
    }

    #[sealed_test]
    fn directory_without_store_links_is_left_alone() -> anyhow::Result<()> {
        create_dir_all("conf")?;
        write("conf/local", "mine")?;

        engine(true)?.swap(["conf"])?;
        assert_eq!(read_to_string("conf/local")?, "mine");
        assert_eq!(classify("conf/local.nix-store-backup")?, Kind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn probe_reports_each_state() -> anyhow::Result<()> {
        let target = store_link("abc-cfg", "hello", "linked")?;
        store_link("def-cfg", "hello", "swapped")?;
        write("plain", "blah")?;
        let store = current_dir()?.join("store");
        engine(true)?.swap(["swapped"])?;

        assert_eq!(
            SwapState::probe("linked", &store)?,
            SwapState::Linked {
                store_target: target
            }
        );
        assert_eq!(
            SwapState::probe("swapped", &store)?,
            SwapState::Swapped {
                live: Kind::RegularFile
            }
        );
        assert_eq!(
            SwapState::probe("plain", &store)?,
            SwapState::Unrelated {
                kind: Kind::RegularFile
            }
        );
        assert_eq!(SwapState::probe("nothing", &store)?, SwapState::Missing);

        Ok(())
    }
}
