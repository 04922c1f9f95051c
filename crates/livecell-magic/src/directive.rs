//! Structured directive set extracted from a cell's text

use serde::{Deserialize, Serialize};

/// Argument of a console directive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleDirective {
    /// Text placed before the console output, if any
    pub prompt: Option<String>,
}

impl ConsoleDirective {
    /// Directive without a prompt
    #[inline]
    #[must_use]
    pub fn bare() -> Self {
        Self::default()
    }

    /// Directive with a prompt
    #[inline]
    #[must_use]
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
        }
    }
}

/// How console output reaches the host input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleMode {
    /// Insert only; the user submits
    Copy,
    /// Insert and submit
    Send,
}

/// All directives recognized in one cell text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicCommandSet {
    /// `#%autorun`
    pub autorun: bool,
    /// `#%collapse`
    pub collapse: bool,
    /// `#%load="<url>"` (first valid occurrence)
    pub load_url: Option<String>,
    /// `#%copy_console`
    pub copy_console: Option<ConsoleDirective>,
    /// `#%send_console`
    pub send_console: Option<ConsoleDirective>,
}

/// One-shot behaviors that already fired for a cell
///
/// Merging newly discovered directives never touches a consumed field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumedFlags {
    /// Autorun already dispatched
    pub autorun: bool,
    /// Collapse already applied
    pub collapse: bool,
    /// Console command already handled
    pub console: bool,
}

impl MagicCommandSet {
    /// No directive present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Console command to execute, `send` winning over `copy`
    #[must_use]
    pub fn console_command(&self) -> Option<(ConsoleMode, &ConsoleDirective)> {
        self.send_console
            .as_ref()
            .map(|c| (ConsoleMode::Send, c))
            .or_else(|| self.copy_console.as_ref().map(|c| (ConsoleMode::Copy, c)))
    }

    /// Merge directives discovered in spliced template text
    ///
    /// Only fields whose one-shot behavior has not fired yet are updated,
    /// and existing values are never replaced. `load_url` is kept as is.
    pub fn merge_discovered(&mut self, discovered: &MagicCommandSet, consumed: ConsumedFlags) {
        if !consumed.autorun {
            self.autorun |= discovered.autorun;
        }
        if !consumed.collapse {
            self.collapse |= discovered.collapse;
        }
        if !consumed.console {
            if self.copy_console.is_none() {
                self.copy_console.clone_from(&discovered.copy_console);
            }
            if self.send_console.is_none() {
                self.send_console.clone_from(&discovered.send_console);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_wins_over_copy() {
        let set = MagicCommandSet {
            copy_console: Some(ConsoleDirective::with_prompt("copy")),
            send_console: Some(ConsoleDirective::bare()),
            ..Default::default()
        };
        let (mode, directive) = set.console_command().unwrap();
        assert_eq!(mode, ConsoleMode::Send);
        assert!(directive.prompt.is_none());
    }

    #[test]
    fn copy_used_alone() {
        let set = MagicCommandSet {
            copy_console: Some(ConsoleDirective::with_prompt("copy")),
            ..Default::default()
        };
        assert_eq!(set.console_command().unwrap().0, ConsoleMode::Copy);
        assert!(MagicCommandSet::default().console_command().is_none());
    }

    #[test]
    fn merge_skips_consumed_fields() {
        let mut set = MagicCommandSet::default();
        let discovered = MagicCommandSet {
            autorun: true,
            collapse: true,
            send_console: Some(ConsoleDirective::bare()),
            ..Default::default()
        };
        set.merge_discovered(
            &discovered,
            ConsumedFlags {
                autorun: true,
                collapse: false,
                console: true,
            },
        );
        assert!(!set.autorun);
        assert!(set.collapse);
        assert!(set.send_console.is_none());
    }

    #[test]
    fn merge_keeps_existing_prompt() {
        let mut set = MagicCommandSet {
            copy_console: Some(ConsoleDirective::with_prompt("mine")),
            ..Default::default()
        };
        let discovered = MagicCommandSet {
            copy_console: Some(ConsoleDirective::with_prompt("template")),
            ..Default::default()
        };
        set.merge_discovered(&discovered, ConsumedFlags::default());
        assert_eq!(
            set.copy_console.unwrap().prompt.as_deref(),
            Some("mine")
        );
    }
}
