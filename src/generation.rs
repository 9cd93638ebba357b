// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System generation management.
//!
//! Every rebuild that gets activated leaves behind a __generation__: a
//! numbered, immutable snapshot of the system profile. Generations form an
//! append-only log ordered by number, and the profile link points at the one
//! that is currently active.
//!
//! Nixwrap can list generations, compare the store paths that two
//! generations depend on, and remove generations that are no longer needed.
//! Removal is the only operation that changes anything, and it cannot be
//! undone, so it always asks first.
//!
//! # Rolling Back
//!
//! Switching to an arbitrary past generation is deliberately not supported.
//! Going back to the previous generation is the job of the `rollback`
//! subcommand, which leaves it to nixos-rebuild.
//!
//! # See Also
//!
//! 1. [NixOS manual - Rolling back changes](https://nixos.org/manual/nixos/stable/#sec-rollback)
//! 2. [`profile`]

pub mod profile;

use crate::{
    exec::ExecError,
    generation::profile::NixProfile,
    probe::ProbeError,
    prompt::{Prompt, PromptError},
};

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{info, instrument, warn};

/// A numbered snapshot of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Generation number.
    pub number: u32,

    /// Store path the generation link resolves to, if readable.
    pub store_path: Option<PathBuf>,

    /// Profile currently points at this generation.
    pub current: bool,
}

impl Display for Generation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{:>5}", self.number)?;
        if let Some(store_path) = &self.store_path {
            write!(fmt, "  {}", store_path.display())?;
        }
        if self.current {
            write!(fmt, "  (current)")?;
        }

        Ok(())
    }
}

/// Which generations to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every generation except the current one.
    Old,

    /// Explicit listing of generation numbers.
    Numbers(Vec<u32>),
}

impl Selector {
    /// Parse selector from command line words.
    ///
    /// Either the single word `old`, or one or more generation numbers.
    ///
    /// # Errors
    ///
    /// - Return [`GenerationError::InvalidSelector`] for anything else.
    pub fn parse(words: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let words = words
            .into_iter()
            .map(|word| word.as_ref().to_string())
            .collect::<Vec<_>>();

        match words.as_slice() {
            [] => Err(GenerationError::InvalidSelector {
                selector: String::new(),
            }),
            [word] if word == "old" => Ok(Self::Old),
            _ => words
                .iter()
                .map(|word| {
                    word.parse::<u32>()
                        .map_err(|_| GenerationError::InvalidSelector {
                            selector: word.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Numbers),
        }
    }

    /// Arguments understood by `nix-env --delete-generations`.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Old => vec!["old".into()],
            Self::Numbers(numbers) => numbers.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Display for Selector {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Old => fmt.write_str("all old generations"),
            Self::Numbers(numbers) => {
                let numbers = numbers
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                write!(fmt, "generations {}", numbers.join(", "))
            }
        }
    }
}

/// Role of a store path in a generation diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Change {
    /// Only in the newer side.
    Added,

    /// Only in the older side.
    Removed,
}

/// One differing store path between two generations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiffEntry {
    pub path: String,
    pub change: Change,
}

impl Display for DiffEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let marker = match self.change {
            Change::Added => '+',
            Change::Removed => '-',
        };
        write!(fmt, "{marker} {}", self.path)
    }
}

/// Compare two reference sets.
///
/// Sorts and deduplicates both sides, then walks them in lock step. Paths
/// only in `from` are [`Change::Removed`], paths only in `to` are
/// [`Change::Added`]. Result is ordered by path.
pub fn diff_references(
    from: impl IntoIterator<Item = String>,
    to: impl IntoIterator<Item = String>,
) -> Vec<DiffEntry> {
    let mut from = from.into_iter().collect::<Vec<_>>();
    let mut to = to.into_iter().collect::<Vec<_>>();
    from.sort();
    from.dedup();
    to.sort();
    to.dedup();

    let mut entries = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < from.len() && j < to.len() {
        match from[i].cmp(&to[j]) {
            Ordering::Less => {
                entries.push(removed(&from[i]));
                i += 1;
            }
            Ordering::Greater => {
                entries.push(added(&to[j]));
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    entries.extend(from[i..].iter().map(|path| removed(path)));
    entries.extend(to[j..].iter().map(|path| added(path)));

    entries
}

fn added(path: &str) -> DiffEntry {
    DiffEntry {
        path: path.to_string(),
        change: Change::Added,
    }
}

fn removed(path: &str) -> DiffEntry {
    DiffEntry {
        path: path.to_string(),
        change: Change::Removed,
    }
}

/// Layer of indirection for the store holding generations.
pub trait GenerationStore {
    /// List all generations.
    fn list(&self) -> Result<Vec<Generation>>;

    /// Store paths that generation depends on.
    fn references(&self, number: u32) -> Result<Vec<String>>;

    /// Delete generations for good.
    fn delete(&self, selector: &Selector) -> Result<()>;
}

/// List, compare, and remove generations of one profile.
#[derive(Debug)]
pub struct GenerationManager<S = NixProfile>
where
    S: GenerationStore,
{
    store: S,
}

impl<S> GenerationManager<S>
where
    S: GenerationStore,
{
    /// Construct new generation manager.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// List generations as reported by the store.
    pub fn list(&self) -> Result<Vec<Generation>> {
        self.store.list()
    }

    /// Compare reference sets of two generations.
    ///
    /// # Errors
    ///
    /// - Return whatever the store reports for unknown generations.
    #[instrument(skip(self), level = "debug")]
    pub fn diff(&self, from: u32, to: u32) -> Result<Vec<DiffEntry>> {
        let from = self.store.references(from)?;
        let to = self.store.references(to)?;

        Ok(diff_references(from, to))
    }

    /// Remove generations after confirmation.
    ///
    /// Returns `false` if the user declined.
    ///
    /// # Errors
    ///
    /// - Return [`GenerationError::Prompt`] if user cannot be asked.
    /// - Return whatever the store reports if deletion fails.
    #[instrument(skip(self, prompt), level = "debug")]
    pub fn remove(&self, selector: &Selector, prompt: impl Prompt) -> Result<bool> {
        if !prompt.confirm(&format!("permanently delete {selector}?"))? {
            warn!("keep {selector}");
            return Ok(false);
        }

        self.store.delete(selector)?;
        info!("deleted {selector}");

        Ok(true)
    }

    /// Switch to arbitrary generation.
    ///
    /// # Errors
    ///
    /// - Always return [`GenerationError::SwitchUnsupported`].
    pub fn switch_to(&self, number: u32) -> Result<()> {
        Err(GenerationError::SwitchUnsupported { number })
    }
}

/// Generation management error types.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Removal selector is neither `old` nor generation numbers.
    #[error("invalid generation selector {selector:?}, expected \"old\" or generation numbers")]
    InvalidSelector { selector: String },

    /// Switching to an arbitrary generation was requested.
    #[error("cannot switch to generation {number}, use rollback to return to the previous one")]
    SwitchUnsupported { number: u32 },

    /// Generation does not exist.
    #[error("generation {number} does not exist")]
    UnknownGeneration { number: u32 },

    /// Profile path has no usable file name.
    #[error("invalid profile path {:?}", path.display())]
    InvalidProfile { path: PathBuf },

    /// External tool failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Generation link pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Generation link cannot be read while listing.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// Generation link cannot be inspected.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// User cannot be asked for confirmation.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = GenerationError> = std::result::Result<T, E>;
