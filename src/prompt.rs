// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User confirmation for destructive operations.
//!
//! Overwriting an edited file or deleting generations cannot be undone, so the
//! user always gets the final say. Declining is never an error, it just means
//! that nothing happens.

use inquire::{Confirm, InquireError};
use tracing::{debug, instrument};

/// Ask the user to confirm something.
pub trait Prompt {
    /// Ask yes or no question.
    ///
    /// Returns `true` only if the user explicitly agrees.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if the prompt itself cannot be displayed.
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Prompt through the terminal via inquire.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompt;

impl InquirePrompt {
    /// Construct new terminal prompt.
    pub fn new() -> Self {
        Self
    }
}

impl Prompt for InquirePrompt {
    #[instrument(skip(self), level = "debug")]
    fn confirm(&self, message: &str) -> Result<bool> {
        match Confirm::new(message).with_default(false).prompt() {
            Ok(answer) => Ok(answer),
            // INVARIANT: Escape and Ctrl-C count as a plain "no".
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                debug!("prompt dismissed by user");
                Ok(false)
            }
            Err(err) => Err(PromptError(err)),
        }
    }
}

/// Answer every prompt the same way without asking.
///
/// Handy for scripted use and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssumeAnswer(pub bool);

impl Prompt for AssumeAnswer {
    fn confirm(&self, message: &str) -> Result<bool> {
        debug!("assume {} for {message:?}", self.0);
        Ok(self.0)
    }
}

impl<P> Prompt for &P
where
    P: Prompt + ?Sized,
{
    fn confirm(&self, message: &str) -> Result<bool> {
        (**self).confirm(message)
    }
}

/// Prompt cannot be displayed, e.g., stdin is not a terminal.
#[derive(Debug, thiserror::Error)]
#[error("failed to prompt for confirmation")]
pub struct PromptError(#[source] pub InquireError);

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
