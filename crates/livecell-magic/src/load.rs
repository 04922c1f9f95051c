//! `#%load` support: URL resolution, template splicing, inline annotation

use crate::parser::{ParseWarning, LOAD, LOAD_RE};

/// Location and argument of the first valid `#%load` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadLine {
    /// 0-based line index
    pub index: usize,
    /// URL exactly as written
    pub url: String,
}

/// URL resolution failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// Empty URL
    #[error("empty url")]
    Empty,

    /// URL could not be parsed
    #[error("invalid url '{0}'")]
    Invalid(String),

    /// Origin is not http(s)://host
    #[error("invalid host origin '{0}', expected http(s)://host")]
    InvalidOrigin(String),
}

/// Find the first well-formed `#%load` line
#[must_use]
pub fn find_load_line(text: &str) -> Option<LoadLine> {
    text.split('\n').enumerate().find_map(|(index, line)| {
        let caps = LOAD_RE.captures(line.trim())?;
        let url = caps.get(1).or_else(|| caps.get(2))?.as_str().to_string();
        Some(LoadLine { index, url })
    })
}

/// Resolve a `#%load` argument against the host origin
///
/// - `http(s)://...` is used as is
/// - `/path` is resolved against the origin
/// - anything else is resolved relative to the origin root
///
/// # Errors
/// Returns [`UrlError`] for empty or whitespace-containing URLs and for
/// origins that are not `http(s)://`.
pub fn resolve_url(raw: &str, origin: &str) -> Result<String, UrlError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(UrlError::Empty);
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(UrlError::Invalid(url.to_string()));
    }

    if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        if rest.is_empty() || rest.starts_with('/') {
            return Err(UrlError::Invalid(url.to_string()));
        }
        return Ok(url.to_string());
    }

    let origin = origin.trim().trim_end_matches('/');
    let host = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .unwrap_or_default();
    if host.is_empty() || host.contains('/') {
        return Err(UrlError::InvalidOrigin(origin.to_string()));
    }

    if url.starts_with('/') {
        Ok(format!("{origin}{url}"))
    } else {
        Ok(format!("{origin}/{url}"))
    }
}

/// Insert template text right after the `#%load` line at `line_index`
///
/// `#%load` lines inside the template are dropped so a template cannot
/// pull in further templates.
#[must_use]
pub fn splice_template(text: &str, line_index: usize, template: &str) -> String {
    let filtered = template
        .split('\n')
        .filter(|line| !line.trim().starts_with(LOAD))
        .collect::<Vec<_>>()
        .join("\n");

    let mut lines: Vec<&str> = text.split('\n').collect();
    let at = (line_index + 1).min(lines.len());
    lines.insert(at, &filtered);
    lines.join("\n")
}

/// Append a `# <comment>` line after the line at `line_index`
#[must_use]
pub fn annotate_line(text: &str, line_index: usize, comment: &str) -> String {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if let Some(line) = lines.get_mut(line_index) {
        line.push('\n');
        line.push_str("# ");
        line.push_str(comment);
    }
    lines.join("\n")
}

/// Annotate every directive that was dropped because of a warning
#[must_use]
pub fn annotate_warnings(text: &str, warnings: &[ParseWarning]) -> String {
    let mut ignored: Vec<&ParseWarning> = warnings.iter().filter(|w| w.directive_ignored()).collect();
    // bottom-up so earlier indices stay valid
    ignored.sort_by_key(|w| std::cmp::Reverse(w.line()));

    ignored.into_iter().fold(text.to_string(), |acc, warning| {
        annotate_line(&acc, warning.line() - 1, &format!("directive ignored: {warning}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_report;
    use pretty_assertions::assert_eq;

    const ORIGIN: &str = "https://chat.example.com";

    #[test]
    fn resolve_absolute() {
        assert_eq!(
            resolve_url("http://cdn.example.com/t.py", ORIGIN).unwrap(),
            "http://cdn.example.com/t.py"
        );
    }

    #[test]
    fn resolve_rooted_and_relative() {
        assert_eq!(
            resolve_url("/static/t.py", ORIGIN).unwrap(),
            "https://chat.example.com/static/t.py"
        );
        assert_eq!(
            resolve_url("static/t.py", "https://chat.example.com/").unwrap(),
            "https://chat.example.com/static/t.py"
        );
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert_eq!(resolve_url("  ", ORIGIN), Err(UrlError::Empty));
        assert!(matches!(
            resolve_url("/a b.py", ORIGIN),
            Err(UrlError::Invalid(_))
        ));
        assert!(matches!(
            resolve_url("/a.py", "file:///tmp"),
            Err(UrlError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn finds_first_valid_load() {
        let text = "#%load=broken\n#%load=\"/t.py\"\nprint(1)";
        assert_eq!(
            find_load_line(text),
            Some(LoadLine {
                index: 1,
                url: "/t.py".into()
            })
        );
        assert_eq!(find_load_line("print(1)"), None);
    }

    #[test]
    fn splice_after_load_line_and_strip_nested_loads() {
        let text = "#%load=\"/t.py\"\n#%autorun";
        let template = "#%collapse\n#%load=\"/other.py\"\nprint('hi')";
        let spliced = splice_template(text, 0, template);
        assert_eq!(
            spliced,
            "#%load=\"/t.py\"\n#%collapse\nprint('hi')\n#%autorun"
        );
    }

    #[test]
    fn annotate_malformed_directives() {
        let text = "#%load=oops\n#%send_console=bad\nprint(1)";
        let report = parse_report(text);
        let annotated = annotate_warnings(text, &report.warnings);
        let lines: Vec<&str> = annotated.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "#%load=oops");
        assert!(lines[1].starts_with("# directive ignored: line 1"));
        assert_eq!(lines[2], "#%send_console=bad");
        assert!(lines[3].starts_with("# directive ignored: line 2"));
        assert_eq!(lines[4], "print(1)");
    }

    #[test]
    fn annotate_ignores_advisory_warnings() {
        let text = "#%autorun\n#%load=\"/t.py\"";
        let report = parse_report(text);
        assert_eq!(annotate_warnings(text, &report.warnings), text);
    }
}
