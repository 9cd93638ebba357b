// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Small command vocabulary over the NixOS tool chain.
//!
//! Nixwrap wraps the usual rebuild, update, and garbage collection chores
//! behind short subcommands. Two parts carry real logic of their own:
//!
//! - [`swap`]: trade store links for editable copies and back again.
//! - [`generation`]: list, compare, and remove system generations.
//!
//! Everything else is a row in the [`dispatch`] table that turns into plain
//! external tool [`exec::Invocation`]s.

pub mod config;
pub mod dispatch;
pub mod exec;
pub mod generation;
pub mod path;
pub mod probe;
pub mod prompt;
pub mod swap;
