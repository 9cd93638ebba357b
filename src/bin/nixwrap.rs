// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use nixwrap::{
    config::Config,
    dispatch::{lookup, passthrough, usage},
    exec::{run_all, ExecError, Runner, SystemRunner},
    generation::{profile::NixProfile, GenerationError, GenerationManager, Selector},
    prompt::{AssumeAnswer, InquirePrompt, Prompt},
    swap::SwapEngine,
};

use anyhow::{anyhow, Result};
use clap::{error::ErrorKind, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::{env, iter::once, path::PathBuf, process::exit};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  nixwrap <command> [args]...\n  nixwrap -<nix-env-flag> [args]...",
    subcommand_help_heading = "Commands",
    disable_help_subcommand = true,
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn run(self, config: &Config, runner: &SystemRunner) -> Result<()> {
        match self.command {
            None | Some(Command::Help) => run_help(),
            Some(Command::Swap(opts)) => run_swap(opts, config),
            Some(Command::Generations(opts)) => run_generations(opts, config, runner),
            Some(Command::Delegate(args)) => run_delegate(args, config, runner),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Swap store links for editable copies, or restore them.
    #[command(override_usage = "nixwrap swap [options] <path>...")]
    Swap(SwapOptions),

    /// List, compare, or remove system generations.
    #[command(
        visible_alias = "gen",
        override_usage = "nixwrap generations [list | diff <from> <to> | remove <old | number...>]"
    )]
    Generations(GenerationsOptions),

    /// Show this usage text.
    #[command(visible_alias = "h")]
    Help,

    /// Hand command off to external tools.
    #[command(external_subcommand)]
    Delegate(Vec<String>),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SwapOptions {
    /// Files or directories to swap or restore.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<PathBuf>,

    /// Discard edits of swapped files without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GenerationsOptions {
    #[command(subcommand)]
    pub action: Option<GenerationAction>,
}

#[derive(Debug, Clone, Subcommand)]
enum GenerationAction {
    /// List generations of the profile.
    List,

    /// Show store paths that differ between two generations.
    Diff {
        #[arg(value_name = "from")]
        from: u32,

        #[arg(value_name = "to")]
        to: u32,
    },

    /// Remove all old generations, or the given ones.
    Remove(RemoveOptions),

    /// Switching to an arbitrary generation is not supported.
    #[command(hide = true)]
    Switch {
        #[arg(value_name = "number")]
        number: u32,
    },
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Either "old", or generation numbers.
    #[arg(required = true, value_name = "old | number")]
    pub selectors: Vec<String>,

    /// Delete without asking.
    #[arg(short, long)]
    pub yes: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(exit_code(&error));
    }

    exit(0)
}

fn run() -> Result<()> {
    let args = env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    let config = Config::load()?;
    let runner = SystemRunner::new(config.dry_run);

    // INVARIANT: Leading flags belong to nix-env, not to nixwrap.
    if args.first().is_some_and(|arg| arg.starts_with('-')) {
        runner.run(&passthrough(&args))?;
        return Ok(());
    }

    let matches = match cli().try_get_matches_from(once("nixwrap".to_string()).chain(args)) {
        Ok(matches) => matches,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.print()?;
            return Ok(());
        }
        Err(err) => {
            err.print()?;
            exit(1);
        }
    };

    Cli::from_arg_matches(&matches)?.run(&config, &runner)
}

fn cli() -> clap::Command {
    Cli::command().after_help(usage())
}

/// Delegated tools keep their exit code, everything else is a plain failure.
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(err) = error.downcast_ref::<ExecError>() {
        return err.exit_code();
    }

    if let Some(GenerationError::Exec(err)) = error.downcast_ref::<GenerationError>() {
        return err.exit_code();
    }

    1
}

fn run_help() -> Result<()> {
    cli().print_help()?;
    Ok(())
}

fn run_swap(opts: SwapOptions, config: &Config) -> Result<()> {
    let assume = AssumeAnswer(true);
    let ask = InquirePrompt::new();
    let prompt: &dyn Prompt = if opts.yes { &assume } else { &ask };

    SwapEngine::new(&config.store_root, prompt).swap(&opts.paths)?;

    Ok(())
}

fn run_generations(
    opts: GenerationsOptions,
    config: &Config,
    runner: &SystemRunner,
) -> Result<()> {
    let manager = GenerationManager::new(NixProfile::new(&config.profile, runner));
    match opts.action.unwrap_or(GenerationAction::List) {
        GenerationAction::List => {
            for generation in manager.list()? {
                println!("{generation}");
            }
        }
        GenerationAction::Diff { from, to } => {
            for entry in manager.diff(from, to)? {
                println!("{entry}");
            }
        }
        GenerationAction::Remove(opts) => {
            let selector = Selector::parse(&opts.selectors)?;
            let assume = AssumeAnswer(true);
            let ask = InquirePrompt::new();
            let prompt: &dyn Prompt = if opts.yes { &assume } else { &ask };
            manager.remove(&selector, prompt)?;
        }
        GenerationAction::Switch { number } => manager.switch_to(number)?,
    }

    Ok(())
}

fn run_delegate(args: Vec<String>, config: &Config, runner: &SystemRunner) -> Result<()> {
    let (name, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("missing command"))?;
    let delegate =
        lookup(name).ok_or_else(|| anyhow!("unknown command {name:?}, see `nixwrap help`"))?;

    let plan = delegate.plan(config, rest)?;
    run_all(runner, &plan)?;

    Ok(())
}
