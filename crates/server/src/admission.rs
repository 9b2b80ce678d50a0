//! Admission control for incoming socket connections.

use std::fmt;
use std::io::{self, BufRead, Write};

/// Decides whether an accepted socket becomes a connection.
///
/// Pipe connections never consult the policy.
#[derive(Default)]
pub enum AdmissionPolicy {
    /// Ask on the terminal for every incoming connection.
    #[default]
    Prompt,
    Callback(Box<dyn FnMut() -> bool>),
}

impl AdmissionPolicy {
    pub fn callback(allow: impl FnMut() -> bool + 'static) -> Self {
        AdmissionPolicy::Callback(Box::new(allow))
    }

    pub fn allow_all() -> Self {
        Self::callback(|| true)
    }

    pub fn deny_all() -> Self {
        Self::callback(|| false)
    }

    pub(crate) fn decide(&mut self) -> PromptAnswer {
        match self {
            AdmissionPolicy::Prompt => {
                prompt_for_connection(io::stdin().lock(), io::stderr()).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "could not prompt for connection, refusing it");
                    PromptAnswer::Deny
                })
            }
            AdmissionPolicy::Callback(allow) => {
                if allow() {
                    PromptAnswer::Allow
                } else {
                    PromptAnswer::Deny
                }
            }
        }
    }
}

impl fmt::Debug for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionPolicy::Prompt => f.write_str("Prompt"),
            AdmissionPolicy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// The user's answer to an incoming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Allow,
    Deny,
    /// Refuse, stop listening and turn remote debugging off.
    Disable,
}

impl PromptAnswer {
    /// Anything other than yes or disable refuses the connection.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => PromptAnswer::Allow,
            "d" | "disable" => PromptAnswer::Disable,
            _ => PromptAnswer::Deny,
        }
    }
}

pub fn prompt_for_connection(
    mut input: impl BufRead,
    mut output: impl Write,
) -> io::Result<PromptAnswer> {
    write!(
        output,
        "An incoming request to permit a remote debugging connection was detected. \
         Allow the connection? [y]es / [N]o / [d]isable: "
    )?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(PromptAnswer::parse(&line))
}
