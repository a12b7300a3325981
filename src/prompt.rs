//! Operator prompts.
//!
//! Key provisioning and interpreter disambiguation block on an answer from
//! the operator. [`Prompter`] is the seam; [`TerminalPrompter`] asks on the
//! controlling terminal through `dialoguer`.

use dialoguer::{Confirm, Select};
use thiserror::Error;

/// Errors raised while asking the operator a question.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PromptError {
    /// Raised when the terminal interaction fails.
    #[error("prompt failed: {message}")]
    Terminal {
        /// Error reported by the terminal layer.
        message: String,
    },
    /// Raised when a selection is requested from an empty list.
    #[error("nothing to choose from for: {question}")]
    NoChoices {
        /// Question that was about to be asked.
        question: String,
    },
    /// Raised when the operator dismisses the prompt without answering.
    #[error("no answer given for: {question}")]
    Cancelled {
        /// Question that went unanswered.
        question: String,
    },
}

/// Asks the operator questions.
pub trait Prompter {
    /// Asks a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when no answer can be obtained.
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool, PromptError>;

    /// Asks the operator to pick one of `choices`, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when no answer can be obtained.
    fn select(&mut self, question: &str, choices: &[String]) -> Result<usize, PromptError>;
}

/// Prompter that talks to the controlling terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool, PromptError> {
        Confirm::new()
            .with_prompt(question)
            .default(default)
            .interact_opt()
            .map_err(|err| PromptError::Terminal {
                message: err.to_string(),
            })?
            .ok_or_else(|| PromptError::Cancelled {
                question: question.to_owned(),
            })
    }

    fn select(&mut self, question: &str, choices: &[String]) -> Result<usize, PromptError> {
        if choices.is_empty() {
            return Err(PromptError::NoChoices {
                question: question.to_owned(),
            });
        }
        Select::new()
            .with_prompt(question)
            .items(choices)
            .default(0)
            .interact_opt()
            .map_err(|err| PromptError::Terminal {
                message: err.to_string(),
            })?
            .ok_or_else(|| PromptError::Cancelled {
                question: question.to_owned(),
            })
    }
}
