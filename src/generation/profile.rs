// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Generations of a Nix profile.
//!
//! A profile such as `/nix/var/nix/profiles/system` is a symbolic link to one
//! of its numbered generation links, which sit right beside it:
//!
//! ```text
//! /nix/var/nix/profiles/system -> system-142-link
//! /nix/var/nix/profiles/system-141-link -> /nix/store/...-nixos-system-tower-...
//! /nix/var/nix/profiles/system-142-link -> /nix/store/...-nixos-system-tower-...
//! ```
//!
//! Listing is done by reading those links directly. Reference queries and
//! deletion are handed to `nix-store` and `nix-env`.

use crate::{
    exec::{Invocation, Runner, SystemRunner},
    generation::{Generation, GenerationError, GenerationStore, Result, Selector},
    probe::{classify, read_target, Kind},
};

use glob::{glob, Pattern};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Profiles below this directory belong to the whole system.
const SYSTEM_PROFILES: &str = "/nix/var/nix/profiles";

/// Generation store backed by a profile on disk.
#[derive(Debug, Clone)]
pub struct NixProfile<R = SystemRunner>
where
    R: Runner,
{
    profile: PathBuf,
    runner: R,
    privileged: bool,
}

impl<R> NixProfile<R>
where
    R: Runner,
{
    /// Construct new profile generation store.
    ///
    /// Deletion runs through sudo if the profile is system-wide, i.e., lives
    /// below `/nix/var/nix/profiles` but not inside `per-user`.
    pub fn new(profile: impl Into<PathBuf>, runner: R) -> Self {
        let profile = profile.into();
        let privileged = is_system_profile(&profile);

        Self {
            profile,
            runner,
            privileged,
        }
    }

    /// Path to the link of a generation.
    pub fn generation_link(&self, number: u32) -> Result<PathBuf> {
        let name = self.profile_name()?;
        Ok(self.profile.with_file_name(format!("{name}-{number}-link")))
    }

    fn profile_name(&self) -> Result<&str> {
        self.profile
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| GenerationError::InvalidProfile {
                path: self.profile.clone(),
            })
    }
}

impl<R> GenerationStore for NixProfile<R>
where
    R: Runner,
{
    #[instrument(skip(self), level = "debug")]
    fn list(&self) -> Result<Vec<Generation>> {
        let name = self.profile_name()?;
        let pattern = format!(
            "{}-*-link",
            Pattern::escape(self.profile.to_string_lossy().as_ref())
        );

        // INVARIANT: Profile link is relative, so only its file name matters.
        let current = match classify(&self.profile)? {
            Kind::Symlink => read_target(&self.profile)?
                .file_name()
                .map(ToOwned::to_owned),
            _ => None,
        };

        let mut generations = Vec::new();
        for entry in glob(&pattern)? {
            let path = entry?;
            let Some(number) = parse_generation_number(&path, name) else {
                debug!("skip {:?}", path.display());
                continue;
            };

            generations.push(Generation {
                number,
                store_path: read_target(&path).ok(),
                current: current.as_deref() == path.file_name(),
            });
        }
        generations.sort_by_key(|generation| generation.number);

        Ok(generations)
    }

    #[instrument(skip(self), level = "debug")]
    fn references(&self, number: u32) -> Result<Vec<String>> {
        let link = self.generation_link(number)?;
        if classify(&link)? == Kind::Missing {
            return Err(GenerationError::UnknownGeneration { number });
        }

        let output = self.runner.output(
            &Invocation::new("nix-store")
                .args(["--query", "--requisites"])
                .arg(link.to_string_lossy()),
        )?;

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    fn delete(&self, selector: &Selector) -> Result<()> {
        let mut invocation = Invocation::new("nix-env")
            .arg("--profile")
            .arg(self.profile.to_string_lossy())
            .arg("--delete-generations")
            .args(selector.to_args());
        if self.privileged {
            invocation = invocation.privileged();
        }

        Ok(self.runner.run(&invocation)?)
    }
}

/// Parse number out of generation link name like `system-142-link`.
fn parse_generation_number(path: &Path, profile_name: &str) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(profile_name)?
        .strip_prefix('-')?
        .strip_suffix("-link")?
        .parse()
        .ok()
}

fn is_system_profile(profile: &Path) -> bool {
    let system = Path::new(SYSTEM_PROFILES);
    profile.starts_with(system) && !profile.starts_with(system.join("per-user"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecError;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{cell::RefCell, fs::create_dir_all, os::unix::fs::symlink};

    #[derive(Default)]
    struct RecordingRunner {
        output: String,
        calls: RefCell<Vec<String>>,
    }

    impl Runner for RecordingRunner {
        fn run(&self, invocation: &Invocation) -> Result<(), ExecError> {
            self.calls.borrow_mut().push(invocation.to_string());
            Ok(())
        }

        fn output(&self, invocation: &Invocation) -> Result<String, ExecError> {
            self.calls.borrow_mut().push(invocation.to_string());
            Ok(self.output.clone())
        }
    }

    fn profile_fixture() -> anyhow::Result<PathBuf> {
        create_dir_all("profiles")?;
        symlink("/nix/store/aaa-nixos-system-tower-1", "profiles/system-1-link")?;
        symlink("/nix/store/bbb-nixos-system-tower-2", "profiles/system-2-link")?;
        symlink("/nix/store/ccc-nixos-system-tower-10", "profiles/system-10-link")?;
        symlink("/nix/store/ddd-other", "profiles/system-foo-link")?;
        symlink("system-2-link", "profiles/system")?;

        Ok(std::env::current_dir()?.join("profiles/system"))
    }

    #[sealed_test]
    fn list_reads_generation_links() -> anyhow::Result<()> {
        let profile = NixProfile::new(profile_fixture()?, RecordingRunner::default());

        let result = profile.list()?;
        let expect = vec![
            Generation {
                number: 1,
                store_path: Some("/nix/store/aaa-nixos-system-tower-1".into()),
                current: false,
            },
            Generation {
                number: 2,
                store_path: Some("/nix/store/bbb-nixos-system-tower-2".into()),
                current: true,
            },
            Generation {
                number: 10,
                store_path: Some("/nix/store/ccc-nixos-system-tower-10".into()),
                current: false,
            },
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test]
    fn references_query_nix_store() -> anyhow::Result<()> {
        let runner = RecordingRunner {
            output: "/nix/store/aaa-glibc\n\n/nix/store/bbb-bash\n".into(),
            ..RecordingRunner::default()
        };
        let path = profile_fixture()?;
        let profile = NixProfile::new(&path, runner);

        let result = profile.references(2)?;
        assert_eq!(result, vec!["/nix/store/aaa-glibc", "/nix/store/bbb-bash"]);
        assert_eq!(
            *profile.runner.calls.borrow(),
            vec![format!(
                "nix-store --query --requisites {}",
                path.with_file_name("system-2-link").display()
            )]
        );

        Ok(())
    }

    #[sealed_test]
    fn references_of_unknown_generation_fail() -> anyhow::Result<()> {
        let profile = NixProfile::new(profile_fixture()?, RecordingRunner::default());
        let result = profile.references(42);
        assert!(matches!(
            result,
            Err(GenerationError::UnknownGeneration { number: 42 })
        ));
        assert!(profile.runner.calls.borrow().is_empty());

        Ok(())
    }

    #[test]
    fn delete_system_generations_through_sudo() -> anyhow::Result<()> {
        let profile = NixProfile::new("/nix/var/nix/profiles/system", RecordingRunner::default());
        profile.delete(&Selector::Numbers(vec![140, 141]))?;
        profile.delete(&Selector::Old)?;

        assert_eq!(
            *profile.runner.calls.borrow(),
            vec![
                "sudo nix-env --profile /nix/var/nix/profiles/system --delete-generations 140 141",
                "sudo nix-env --profile /nix/var/nix/profiles/system --delete-generations old",
            ]
        );

        Ok(())
    }

    #[test]
    fn delete_user_generations_without_sudo() -> anyhow::Result<()> {
        let profile = NixProfile::new(
            "/nix/var/nix/profiles/per-user/blah/profile",
            RecordingRunner::default(),
        );
        profile.delete(&Selector::Old)?;

        assert_eq!(
            *profile.runner.calls.borrow(),
            vec!["nix-env --profile /nix/var/nix/profiles/per-user/blah/profile --delete-generations old"]
        );

        Ok(())
    }

    #[test]
    fn parse_generation_link_names() {
        assert_eq!(
            parse_generation_number(Path::new("/p/system-142-link"), "system"),
            Some(142)
        );
        assert_eq!(
            parse_generation_number(Path::new("/p/system-foo-link"), "system"),
            None
        );
        assert_eq!(
            parse_generation_number(Path::new("/p/systemd-1-link"), "system"),
            None
        );
    }
}
