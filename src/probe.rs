// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Filesystem probing.
//!
//! Read-only inspection of paths. Nothing in here mutates the filesystem, and
//! symbolic links are never followed unless explicitly asked for.

use std::{
    fs::{canonicalize, read_link, symlink_metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// What a path currently is on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Directory,
    RegularFile,
    Symlink,
    Missing,
}

impl Kind {
    /// Path exists as something that can be renamed and copied as a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::RegularFile | Self::Symlink)
    }
}

/// Classify path without following symbolic links.
///
/// # Errors
///
/// - Return [`ProbeError::Inspect`] for any I/O failure other than the path
///   not existing.
pub fn classify(path: impl AsRef<Path>) -> Result<Kind> {
    let path = path.as_ref();
    let metadata = match symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Kind::Missing),
        Err(err) => {
            return Err(ProbeError::Inspect {
                source: err,
                path: path.to_path_buf(),
            })
        }
    };

    let file_type = metadata.file_type();
    let kind = if file_type.is_symlink() {
        Kind::Symlink
    } else if file_type.is_dir() {
        Kind::Directory
    } else {
        // INVARIANT: Sockets, fifos, and devices are treated as plain files.
        Kind::RegularFile
    };

    Ok(kind)
}

/// Read target of symbolic link verbatim.
///
/// # Errors
///
/// - Return [`ProbeError::ReadLink`] if path is not a symbolic link or
///   cannot be read.
pub fn read_target(path: impl AsRef<Path>) -> Result<PathBuf> {
    read_link(path.as_ref()).map_err(|err| ProbeError::ReadLink {
        source: err,
        path: path.as_ref().to_path_buf(),
    })
}

/// Fully resolve symbolic link and check that it lands inside the store.
///
/// Follows the whole chain of links, so `/etc/foo -> /etc/static/foo ->
/// /nix/store/...` counts as a store link. Dangling links resolve to
/// nothing, and thus are never considered store links.
///
/// Returns the resolved store path if the link points into the store.
pub fn store_target(path: impl AsRef<Path>, store_root: impl AsRef<Path>) -> Option<PathBuf> {
    let resolved = canonicalize(path.as_ref()).ok()?;
    let store_root =
        canonicalize(store_root.as_ref()).unwrap_or_else(|_| store_root.as_ref().to_path_buf());

    resolved.starts_with(&store_root).then_some(resolved)
}

/// Filesystem probing error types.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Path metadata cannot be read.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Symbolic link target cannot be read.
    #[error("failed to read link {:?}", path.display())]
    ReadLink {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        fs::{create_dir_all, write},
        os::unix::fs::symlink,
    };

    #[sealed_test]
    fn classify_each_kind() -> anyhow::Result<()> {
        create_dir_all("dir")?;
        write("file", "blah")?;
        symlink("file", "link")?;

        assert_eq!(classify("dir")?, Kind::Directory);
        assert_eq!(classify("file")?, Kind::RegularFile);
        assert_eq!(classify("link")?, Kind::Symlink);
        assert_eq!(classify("nothing")?, Kind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn classify_dangling_link_as_symlink() -> anyhow::Result<()> {
        symlink("gone", "dangling")?;
        assert_eq!(classify("dangling")?, Kind::Symlink);
        assert_eq!(read_target("dangling")?, PathBuf::from("gone"));

        Ok(())
    }

    #[sealed_test]
    fn read_target_of_plain_file_fails() -> anyhow::Result<()> {
        write("file", "blah")?;
        assert!(matches!(
            read_target("file"),
            Err(ProbeError::ReadLink { .. })
        ));

        Ok(())
    }

    #[sealed_test]
    fn store_target_follows_link_chain() -> anyhow::Result<()> {
        let root = std::env::current_dir()?.canonicalize()?;
        create_dir_all("store")?;
        create_dir_all("static")?;
        write("store/abc-cfg", "blah")?;
        symlink(root.join("store/abc-cfg"), "static/cfg")?;
        symlink(root.join("static/cfg"), "cfg")?;
        write("outside", "blah")?;
        symlink(root.join("outside"), "unrelated")?;
        symlink(root.join("store/gone"), "dangling")?;

        assert_eq!(
            store_target("cfg", "store"),
            Some(root.join("store/abc-cfg"))
        );
        assert_eq!(store_target("unrelated", "store"), None);
        assert_eq!(store_target("dangling", "store"), None);

        Ok(())
    }
}
