// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Delegated command table.
//!
//! Most subcommands are nothing more than a translation into one or more
//! external tool invocations. Each such subcommand is a row in [`DELEGATES`]:
//! a name, its short aliases, and a function that turns the configuration and
//! the trailing arguments into a plan of [`Invocation`]s. Dispatching is a
//! table lookup, nothing more.

use crate::{config::Config, exec::Invocation};

/// Turn configuration and trailing arguments into invocations.
pub type Planner = fn(&Config, &[String]) -> Result<Vec<Invocation>>;

/// A subcommand that is handed off to external tools.
#[derive(Debug, Clone, Copy)]
pub struct Delegate {
    /// Canonical name.
    pub name: &'static str,

    /// Short aliases.
    pub aliases: &'static [&'static str],

    /// Argument synopsis for usage text.
    pub synopsis: &'static str,

    /// One line description for usage text.
    pub about: &'static str,

    planner: Planner,
}

impl Delegate {
    /// Check if token names this delegate.
    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.aliases.contains(&token)
    }

    /// Plan invocations for trailing arguments.
    ///
    /// # Errors
    ///
    /// - Return [`DispatchError`] if arguments are missing or unexpected.
    pub fn plan(&self, config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
        (self.planner)(config, args)
    }
}

/// Every delegated subcommand.
pub const DELEGATES: &[Delegate] = &[
    Delegate {
        name: "check",
        aliases: &["ch"],
        synopsis: "",
        about: "Check the flake",
        planner: plan_check,
    },
    Delegate {
        name: "show",
        aliases: &["sh"],
        synopsis: "",
        about: "Show flake outputs",
        planner: plan_show,
    },
    Delegate {
        name: "update",
        aliases: &["u"],
        synopsis: "[input]...",
        about: "Update the whole lock file, or only the given inputs",
        planner: plan_update,
    },
    Delegate {
        name: "rebuild",
        aliases: &["re"],
        synopsis: "[action] [arg]...",
        about: "Rebuild the system, action defaults to build",
        planner: plan_rebuild,
    },
    Delegate {
        name: "test",
        aliases: &["t"],
        synopsis: "[arg]...",
        about: "Quickly activate the configuration without a boot entry",
        planner: plan_test,
    },
    Delegate {
        name: "theme",
        aliases: &[],
        synopsis: "<name>",
        about: "Test the configuration with another theme",
        planner: plan_theme,
    },
    Delegate {
        name: "rollback",
        aliases: &[],
        synopsis: "",
        about: "Switch back to the previous generation",
        planner: plan_rollback,
    },
    Delegate {
        name: "vm",
        aliases: &[],
        synopsis: "",
        about: "Build a virtual machine of the configuration",
        planner: plan_vm,
    },
    Delegate {
        name: "upgrade",
        aliases: &["up"],
        synopsis: "",
        about: "Update the lock file, then rebuild and switch",
        planner: plan_upgrade,
    },
    Delegate {
        name: "search",
        aliases: &["s"],
        synopsis: "<term>...",
        about: "Search for packages",
        planner: plan_search,
    },
    Delegate {
        name: "gc",
        aliases: &[],
        synopsis: "[--system]",
        about: "Collect garbage and optimise the store",
        planner: plan_gc,
    },
    Delegate {
        name: "push",
        aliases: &[],
        synopsis: "[remote]",
        about: "Copy the flake to a remote host and switch it there",
        planner: plan_push,
    },
];

/// Find delegate by name or alias.
pub fn lookup(token: &str) -> Option<&'static Delegate> {
    DELEGATES.iter().find(|delegate| delegate.matches(token))
}

/// Hand raw arguments to the environment management tool.
pub fn passthrough(args: &[String]) -> Invocation {
    Invocation::new("nix-env").args(args.iter().cloned())
}

/// Usage text listing every delegate.
pub fn usage() -> String {
    let mut rows = DELEGATES
        .iter()
        .map(|delegate| {
            let mut names = vec![delegate.name];
            names.extend(delegate.aliases);
            (
                format!("{} {}", names.join(", "), delegate.synopsis),
                delegate.about,
            )
        })
        .collect::<Vec<_>>();
    rows.push((
        "-<flag> [arg]...".into(),
        "Pass everything through to nix-env",
    ));
    let width = rows.iter().map(|(left, _)| left.len()).max().unwrap_or(0);

    let mut out = String::from("Delegated commands:\n");
    for (left, about) in rows {
        out.push_str(&format!("  {left:<width$}  {about}\n"));
    }

    out
}

fn plan_check(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    Ok(vec![flake("check", config).args(args.iter().cloned())])
}

fn plan_show(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    Ok(vec![flake("show", config).args(args.iter().cloned())])
}

fn plan_update(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    Ok(vec![update(config, args)])
}

fn plan_rebuild(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    let (action, extra) = match args.split_first() {
        Some((action, extra)) => (action.as_str(), extra),
        None => ("build", args),
    };

    Ok(vec![rebuild(config, action, extra)])
}

fn plan_test(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    let mut extra = vec!["--fast".to_string()];
    extra.extend(args.iter().cloned());

    Ok(vec![rebuild(config, "test", &extra)])
}

fn plan_theme(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    let Some((name, rest)) = args.split_first() else {
        return Err(DispatchError::MissingArgument {
            command: "theme",
            argument: "name",
        });
    };

    // INVARIANT: Environment variables are only visible to impure evaluation.
    let mut extra = vec!["--fast".to_string(), "--impure".to_string()];
    extra.extend(rest.iter().cloned());
    let invocation = rebuild(config, "test", &extra).env(&config.theme_variable, name);

    Ok(vec![invocation])
}

fn plan_rollback(_config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    let invocation = Invocation::new("nixos-rebuild")
        .args(["switch", "--rollback"])
        .args(args.iter().cloned())
        .privileged();

    Ok(vec![invocation])
}

fn plan_vm(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    Ok(vec![rebuild(config, "build-vm", args)])
}

fn plan_upgrade(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    Ok(vec![update(config, &[]), rebuild(config, "switch", args)])
}

fn plan_search(_config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    if args.is_empty() {
        return Err(DispatchError::MissingArgument {
            command: "search",
            argument: "term",
        });
    }

    let invocation = Invocation::new("nix")
        .args(["search", "nixpkgs"])
        .args(args.iter().cloned());

    Ok(vec![invocation])
}

fn plan_gc(_config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    match args {
        [] => Ok(vec![
            Invocation::new("nix-collect-garbage"),
            Invocation::new("nix-store").arg("--optimise"),
        ]),
        [flag] if flag == "--system" => Ok(vec![
            Invocation::new("nix-collect-garbage")
                .arg("--delete-old")
                .privileged(),
            Invocation::new("nix-store").arg("--optimise").privileged(),
            // INVARIANT: Reinstalling the boot loader drops entries of deleted generations.
            Invocation::new("/run/current-system/bin/switch-to-configuration")
                .arg("boot")
                .privileged(),
        ]),
        [unexpected, ..] => Err(DispatchError::UnexpectedArgument {
            command: "gc",
            argument: unexpected.clone(),
        }),
    }
}

fn plan_push(config: &Config, args: &[String]) -> Result<Vec<Invocation>> {
    let remote = match args {
        [] => config.remote.clone(),
        [remote] => Some(remote.clone()),
        [_, unexpected, ..] => {
            return Err(DispatchError::UnexpectedArgument {
                command: "push",
                argument: unexpected.clone(),
            })
        }
    };
    let Some(remote) = remote else {
        return Err(DispatchError::MissingArgument {
            command: "push",
            argument: "remote",
        });
    };

    // INVARIANT: Trailing slash makes rsync copy the content, not the directory.
    let source = format!("{}/", config.flake.to_string_lossy().trim_end_matches('/'));
    let destination = format!("{remote}:{}", config.remote_flake);

    Ok(vec![
        Invocation::new("rsync").args(["-a", "--delete", source.as_str(), destination.as_str()]),
        Invocation::new("ssh").args([
            "-t",
            remote.as_str(),
            "sudo",
            "nixos-rebuild",
            "switch",
            "--flake",
            config.remote_flake.as_str(),
        ]),
    ])
}

fn flake(subcommand: &str, config: &Config) -> Invocation {
    Invocation::new("nix")
        .args(["flake", subcommand])
        .arg(config.flake.to_string_lossy())
}

fn update(config: &Config, inputs: &[String]) -> Invocation {
    Invocation::new("nix")
        .args(["flake", "update"])
        .args(inputs.iter().cloned())
        .arg("--flake")
        .arg(config.flake.to_string_lossy())
}

fn rebuild(config: &Config, action: &str, extra: &[String]) -> Invocation {
    let invocation = Invocation::new("nixos-rebuild")
        .arg(action)
        .args(["--flake".to_string(), config.flake_ref()])
        .args(extra.iter().cloned());

    // INVARIANT: Only actions that activate the system need root.
    match action {
        "switch" | "boot" | "test" => invocation.privileged(),
        _ => invocation,
    }
}

/// Command dispatch error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Required argument is missing.
    #[error("{command}: missing <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    /// Argument is not understood.
    #[error("{command}: unexpected argument {argument:?}")]
    UnexpectedArgument {
        command: &'static str,
        argument: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
