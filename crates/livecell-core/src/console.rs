//! Console feedback bridge
//!
//! Forwards a run's text output into the host input box, optionally
//! submitting it.

use crate::host::{HostError, HostInputSurface};
use livecell_magic::{ConsoleMode, MagicCommandSet};
use livecell_runtime::ExecutionResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static EMBED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<svg\b.*?</svg>|<img\b[^>]*>|<div\b[^>]*plot[^>]*>.*?</div>|data:image/[a-z0-9.+-]+;base64,[A-Za-z0-9+/=]+",
    )
    .expect("embedded artifact pattern")
});

/// Plain text of an output, without artifact markup, trimmed
#[must_use]
pub fn extract_console_text(text: &str) -> String {
    EMBED_RE.replace_all(text, "").trim().to_string()
}

/// Message placed into the host input
///
/// `prompt` alone when there is no text, `prompt`, a blank line and the
/// text otherwise.
#[must_use]
pub fn compose_message(prompt: Option<&str>, text: &str) -> String {
    match prompt.filter(|p| !p.is_empty()) {
        Some(prompt) if text.is_empty() => prompt.to_string(),
        Some(prompt) => format!("{prompt}\n\n{text}"),
        None => text.to_string(),
    }
}

/// What a forward did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Cell has no console directive
    NoCommand,
    /// Nothing to insert
    Empty { mode: ConsoleMode },
    /// Text inserted, and submitted for `Send`
    Inserted {
        mode: ConsoleMode,
        text: String,
        submitted: bool,
    },
    /// Host input refused the change
    Failed { mode: ConsoleMode, error: HostError },
}

impl ForwardOutcome {
    /// A console directive was present, whatever happened to it
    #[must_use]
    pub fn had_command(&self) -> bool {
        !matches!(self, Self::NoCommand)
    }
}

/// Writes console output into the host input
#[derive(Debug, Clone)]
pub struct ConsoleBridge {
    input: Arc<dyn HostInputSurface>,
}

impl ConsoleBridge {
    /// Create new bridge
    #[must_use]
    pub fn new(input: Arc<dyn HostInputSurface>) -> Self {
        Self { input }
    }

    /// Forward `result` according to the cell's console directive
    ///
    /// `#%send_console` wins over `#%copy_console`.
    pub async fn forward(&self, result: &ExecutionResult, commands: &MagicCommandSet) -> ForwardOutcome {
        let Some((mode, directive)) = commands.console_command() else {
            return ForwardOutcome::NoCommand;
        };

        let text = extract_console_text(result.text.full());
        let message = compose_message(directive.prompt.as_deref(), &text);
        if message.is_empty() {
            tracing::debug!("Console {:?}: nothing to forward", mode);
            return ForwardOutcome::Empty { mode };
        }

        if let Err(error) = self.input.append(&message).await {
            tracing::warn!("Console {:?} failed: {}", mode, error);
            return ForwardOutcome::Failed { mode, error };
        }

        let submitted = match mode {
            ConsoleMode::Copy => false,
            // append resolved, so the host has committed the text
            ConsoleMode::Send => match self.input.submit().await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!("Console submit failed: {}", error);
                    return ForwardOutcome::Failed { mode, error };
                }
            },
        };

        ForwardOutcome::Inserted {
            mode,
            text: message,
            submitted,
        }
    }
}
