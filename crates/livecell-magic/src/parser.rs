//! Line-oriented magic command parser
//!
//! A line is a directive only if, after trimming, it starts with one of
//! the recognized tokens. Directives carrying an argument are matched with
//! anchored regular expressions; a malformed argument is reported as a
//! [`ParseWarning`] and the directive is ignored.

use crate::directive::{ConsoleDirective, ConsoleMode, MagicCommandSet};
use once_cell::sync::Lazy;
use regex::Regex;

/// `#%autorun`
pub const AUTORUN: &str = "#%autorun";
/// `#%collapse`
pub const COLLAPSE: &str = "#%collapse";
/// `#%load=`
pub const LOAD: &str = "#%load=";
/// `#%copy_console`
pub const COPY_CONSOLE: &str = "#%copy_console";
/// `#%send_console`
pub const SEND_CONSOLE: &str = "#%send_console";

pub(crate) static LOAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^#%load=\s*(?:"([^"]+)"|'([^']+)')$"#).expect("load directive pattern")
});

static COPY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^#%copy_console(?:="([^"]*)")?$"#).expect("copy_console directive pattern")
});

static SEND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^#%send_console(?:="([^"]*)")?$"#).expect("send_console directive pattern")
});

/// Non-fatal problem found while scanning directives
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseWarning {
    /// `#%load=` without a quoted URL
    #[error("line {line}: malformed #%load directive, expected #%load=\"<url>\"")]
    MalformedLoad { line: usize, text: String },

    /// Console directive with a broken argument
    #[error("line {line}: malformed {directive} directive, expected {directive} or {directive}=\"<prompt>\"")]
    MalformedConsole {
        line: usize,
        directive: &'static str,
        text: String,
    },

    /// Second `#%load`; only the first one is honored
    #[error("line {line}: duplicate #%load directive ignored")]
    DuplicateLoad { line: usize },

    /// `#%load` placed after other directives
    #[error("line {line}: #%load should precede the other directives")]
    LoadAfterDirectives { line: usize },

    /// Both console directives present; `#%send_console` wins
    #[error("line {line}: both #%copy_console and #%send_console present, #%send_console takes priority")]
    ConflictingConsole { line: usize },
}

impl ParseWarning {
    /// Line the warning refers to
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::MalformedLoad { line, .. }
            | Self::MalformedConsole { line, .. }
            | Self::DuplicateLoad { line }
            | Self::LoadAfterDirectives { line }
            | Self::ConflictingConsole { line } => *line,
        }
    }

    /// Whether the offending directive was dropped entirely
    #[must_use]
    pub fn directive_ignored(&self) -> bool {
        matches!(
            self,
            Self::MalformedLoad { .. } | Self::MalformedConsole { .. } | Self::DuplicateLoad { .. }
        )
    }
}

/// Parsed directives plus the warnings raised on the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Recognized directives
    pub commands: MagicCommandSet,
    /// Problems found, in line order
    pub warnings: Vec<ParseWarning>,
}

/// Parse directives, discarding warnings
#[must_use]
pub fn parse(raw_text: &str) -> MagicCommandSet {
    parse_report(raw_text).commands
}

/// Parse directives and collect warnings
#[must_use]
pub fn parse_report(raw_text: &str) -> ParseReport {
    let mut report = ParseReport::default();
    let mut seen_other_directive = false;

    for (idx, raw_line) in raw_text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if line.starts_with(AUTORUN) {
            report.commands.autorun = true;
            seen_other_directive = true;
        } else if line.starts_with(COLLAPSE) {
            report.commands.collapse = true;
            seen_other_directive = true;
        } else if line.starts_with(LOAD) {
            parse_load(line, line_no, seen_other_directive, &mut report);
        } else if line.starts_with(COPY_CONSOLE) {
            if parse_console(line, line_no, ConsoleMode::Copy, &mut report) {
                seen_other_directive = true;
            }
        } else if line.starts_with(SEND_CONSOLE) {
            if parse_console(line, line_no, ConsoleMode::Send, &mut report) {
                seen_other_directive = true;
            }
        }
    }

    for warning in &report.warnings {
        tracing::warn!("magic command: {}", warning);
    }

    report
}

fn parse_load(line: &str, line_no: usize, after_other: bool, report: &mut ParseReport) {
    let Some(caps) = LOAD_RE.captures(line) else {
        report.warnings.push(ParseWarning::MalformedLoad {
            line: line_no,
            text: line.to_string(),
        });
        return;
    };

    if report.commands.load_url.is_some() {
        report
            .warnings
            .push(ParseWarning::DuplicateLoad { line: line_no });
        return;
    }

    let url = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string());
    report.commands.load_url = url;

    if after_other {
        report
            .warnings
            .push(ParseWarning::LoadAfterDirectives { line: line_no });
    }
}

/// Returns `true` when the directive was recognized
fn parse_console(line: &str, line_no: usize, mode: ConsoleMode, report: &mut ParseReport) -> bool {
    let (re, token) = match mode {
        ConsoleMode::Copy => (&*COPY_RE, COPY_CONSOLE),
        ConsoleMode::Send => (&*SEND_RE, SEND_CONSOLE),
    };

    let Some(caps) = re.captures(line) else {
        report.warnings.push(ParseWarning::MalformedConsole {
            line: line_no,
            directive: token,
            text: line.to_string(),
        });
        return false;
    };

    let prompt = caps
        .get(1)
        .map(|m| m.as_str())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let directive = ConsoleDirective { prompt };

    let other_present = match mode {
        ConsoleMode::Copy => {
            report.commands.copy_console = Some(directive);
            report.commands.send_console.is_some()
        }
        ConsoleMode::Send => {
            report.commands.send_console = Some(directive);
            report.commands.copy_console.is_some()
        }
    };

    if other_present
        && !report
            .warnings
            .iter()
            .any(|w| matches!(w, ParseWarning::ConflictingConsole { .. }))
    {
        report
            .warnings
            .push(ParseWarning::ConflictingConsole { line: line_no });
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parses_flags() {
        let set = parse("#%autorun\n  #%collapse  \nprint(1)");
        assert!(set.autorun);
        assert!(set.collapse);
        assert!(set.load_url.is_none());
    }

    #[test]
    fn flags_anywhere_in_text() {
        let set = parse("print(1)\n#%collapse\nprint(2)\n#%autorun");
        assert!(set.autorun);
        assert!(set.collapse);
    }

    #[test]
    fn plain_comments_are_not_directives() {
        let set = parse("# %autorun\n#autorun\nx = '#%autorun'");
        assert!(set.is_empty());
    }

    #[test]
    fn parses_load_url() {
        let set = parse("#%load=\"/static/template/plot.py\"\n#%autorun");
        assert_eq!(set.load_url.as_deref(), Some("/static/template/plot.py"));

        let single = parse("#%load='https://example.com/t.py'");
        assert_eq!(single.load_url.as_deref(), Some("https://example.com/t.py"));
    }

    #[test]
    fn malformed_load_is_warning_not_error() {
        let report = parse_report("#%load=/no/quotes.py\nprint(1)");
        assert!(report.commands.load_url.is_none());
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0],
            ParseWarning::MalformedLoad { line: 1, .. }
        ));
        assert!(report.warnings[0].directive_ignored());
    }

    #[test]
    fn duplicate_load_keeps_first() {
        let report = parse_report("#%load=\"/a.py\"\n#%load=\"/b.py\"");
        assert_eq!(report.commands.load_url.as_deref(), Some("/a.py"));
        assert_eq!(report.warnings, vec![ParseWarning::DuplicateLoad { line: 2 }]);
    }

    #[test]
    fn load_after_directives_is_flagged() {
        let report = parse_report("#%autorun\n#%load=\"/a.py\"");
        assert_eq!(report.commands.load_url.as_deref(), Some("/a.py"));
        assert_eq!(
            report.warnings,
            vec![ParseWarning::LoadAfterDirectives { line: 2 }]
        );
    }

    #[test]
    fn console_prompts() {
        let set = parse("#%copy_console=\"Explain:\"\n#%send_console");
        assert_eq!(
            set.copy_console,
            Some(ConsoleDirective::with_prompt("Explain:"))
        );
        assert_eq!(set.send_console, Some(ConsoleDirective::bare()));
    }

    #[test]
    fn empty_prompt_is_no_prompt() {
        let set = parse("#%send_console=\"\"");
        assert_eq!(set.send_console, Some(ConsoleDirective::bare()));
    }

    #[test]
    fn malformed_console_not_recognized() {
        let report = parse_report("#%send_console=Result:\n#%copy_console=\"open");
        assert!(report.commands.send_console.is_none());
        assert!(report.commands.copy_console.is_none());
        assert_eq!(report.warnings.len(), 2);
        assert!(matches!(
            report.warnings[0],
            ParseWarning::MalformedConsole {
                line: 1,
                directive: SEND_CONSOLE,
                ..
            }
        ));
    }

    #[test]
    fn both_console_directives_warn_once() {
        let report = parse_report("#%copy_console\n#%send_console\n#%send_console=\"x\"");
        let conflicts = report
            .warnings
            .iter()
            .filter(|w| matches!(w, ParseWarning::ConflictingConsole { .. }))
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(
            report.commands.console_command().map(|(m, _)| m),
            Some(ConsoleMode::Send)
        );
    }

    #[test]
    fn warning_messages_name_expected_syntax() {
        let report = parse_report("#%load=nope");
        let msg = report.warnings[0].to_string();
        assert!(msg.contains("#%load=\"<url>\""));
    }

    proptest! {
        #[test]
        fn prop_parse_is_deterministic(text in ".{0,200}") {
            prop_assert_eq!(parse_report(&text), parse_report(&text));
        }

        #[test]
        fn prop_lines_without_marker_yield_nothing(
            lines in proptest::collection::vec("[a-zA-Z0-9 =()'\"+]{0,40}", 0..20)
        ) {
            let text = lines.join("\n");
            let report = parse_report(&text);
            prop_assert!(report.commands.is_empty());
            prop_assert!(report.warnings.is_empty());
        }
    }
}
