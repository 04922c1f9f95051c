//! Template document runtime
//!
//! A docgen cell names a template with `#%load` and carries its data as a
//! `json_data_for_template = { ... }` object. Running the cell fetches the
//! template, fills its placeholders and returns the document both as an
//! artifact and as the binary result of the run.
//!
//! Placeholder syntax:
//! - `{name}` / `{a.b.c}` - value lookup, missing values render empty
//! - `{#items}...{/items}` - section, repeated per array element, rendered
//!   once for a truthy value, skipped otherwise

use crate::adapter::{
    BinaryPayload, ExecutionRequest, RawArtifact, RawOutput, RuntimeAdapter, TemplateMode,
};
use crate::error::{FailureCategory, RuntimeError, RuntimeFault};
use crate::fetch::TemplateFetcher;
use crate::kind::RuntimeKind;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Name of the data variable inside a cell
pub const DATA_VARIABLE: &str = "json_data_for_template";

static DATA_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"json_data_for_template\s*=\s*\{").expect("data block pattern")
});

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([#/]?)([A-Za-z_][\w.]*)\}").expect("placeholder pattern"));

const LOAD_HINT: &str =
    "Add the template reference on the first line, e.g.\n#%load=\"/static/template/docx/report.md\"";

const DATA_HINT: &str = "Describe the data as a JSON object, e.g.\njson_data_for_template = {\n    \"title\": \"Quarterly report\",\n    \"items\": [{\"name\": \"alpha\"}]\n}";

/// Extract the `json_data_for_template` object
///
/// # Errors
/// Returns a `missing-data` fault when the block is absent, unterminated
/// or not valid JSON.
pub fn extract_template_data(code: &str) -> Result<Value, RuntimeFault> {
    let start = DATA_START_RE.find(code).ok_or_else(|| {
        RuntimeFault::new(
            FailureCategory::MissingData,
            format!("no {DATA_VARIABLE} block found"),
        )
        .with_hint(DATA_HINT)
    })?;

    let open = start.end() - 1;
    let end = matching_brace(code, open).ok_or_else(|| {
        RuntimeFault::new(
            FailureCategory::MissingData,
            format!("no closing brace for the {DATA_VARIABLE} object"),
        )
        .with_hint(DATA_HINT)
    })?;

    serde_json::from_str(&code[open..=end]).map_err(|err| {
        RuntimeFault::new(
            FailureCategory::MissingData,
            format!("invalid JSON in {DATA_VARIABLE}: {err}"),
        )
        .with_hint(DATA_HINT)
    })
}

/// Byte index of the brace closing the one at `open`; string-aware
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[open..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fill a template with data
#[must_use]
pub fn render_template(template: &str, data: &Value) -> String {
    render_scoped(template, &[data])
}

fn render_scoped(template: &str, scopes: &[&Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(caps) = TOKEN_RE.captures(rest) {
        let (Some(whole), Some(sigil), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            break;
        };
        out.push_str(&rest[..whole.start()]);
        let name = name.as_str();

        match sigil.as_str() {
            "#" => {
                let after = &rest[whole.end()..];
                let Some((body, close_end)) = section_body(after, name) else {
                    // unterminated section renders as text
                    out.push_str(whole.as_str());
                    rest = after;
                    continue;
                };
                render_section(body, name, scopes, &mut out);
                rest = &after[close_end..];
            }
            // stray close tag
            "/" => rest = &rest[whole.end()..],
            _ => {
                out.push_str(&lookup(scopes, name).map(value_text).unwrap_or_default());
                rest = &rest[whole.end()..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Body of a section and the offset just past its close tag
fn section_body<'a>(text: &'a str, name: &str) -> Option<(&'a str, usize)> {
    let mut depth = 1usize;
    for caps in TOKEN_RE.captures_iter(text) {
        let (whole, sigil, tag) = (caps.get(0)?, caps.get(1)?, caps.get(2)?);
        if tag.as_str() != name {
            continue;
        }
        match sigil.as_str() {
            "#" => depth += 1,
            "/" => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[..whole.start()], whole.end()));
                }
            }
            _ => {}
        }
    }
    None
}

fn render_section(body: &str, name: &str, scopes: &[&Value], out: &mut String) {
    let Some(value) = lookup(scopes, name) else {
        return;
    };
    match value {
        Value::Array(items) => {
            for item in items {
                let mut inner = scopes.to_vec();
                inner.push(item);
                out.push_str(&render_scoped(body, &inner));
            }
        }
        Value::Object(_) => {
            let mut inner = scopes.to_vec();
            inner.push(value);
            out.push_str(&render_scoped(body, &inner));
        }
        Value::Null | Value::Bool(false) => {}
        Value::String(s) if s.is_empty() => {}
        _ => out.push_str(&render_scoped(body, scopes)),
    }
}

/// Innermost scope wins
fn lookup<'a>(scopes: &[&'a Value], path: &str) -> Option<&'a Value> {
    scopes.iter().rev().find_map(|scope| {
        path.split('.')
            .try_fold(*scope, |value, key| value.as_object()?.get(key))
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn file_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("document.txt")
        .to_string()
}

/// Runtime that fills fetched templates with cell data
#[derive(Debug)]
pub struct TemplateRuntime {
    fetcher: Arc<dyn TemplateFetcher>,
    origin: String,
    languages: Vec<String>,
    ready: AtomicBool,
}

impl TemplateRuntime {
    /// Create new runtime resolving relative template URLs against `origin`
    #[must_use]
    pub fn new(fetcher: Arc<dyn TemplateFetcher>, origin: impl Into<String>) -> Self {
        Self {
            fetcher,
            origin: origin.into(),
            languages: vec!["docgen".into(), "docx".into(), "template".into()],
            ready: AtomicBool::new(false),
        }
    }

    /// Override fence languages
    #[must_use]
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }
}

#[async_trait]
impl RuntimeAdapter for TemplateRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::new("docgen")
    }

    fn languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    async fn load_core(&self) -> Result<(), RuntimeError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn template_mode(&self) -> TemplateMode {
        TemplateMode::Reference
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<RawOutput, RuntimeFault> {
        let load = livecell_magic::find_load_line(&request.code).ok_or_else(|| {
            RuntimeFault::new(
                FailureCategory::MissingDirective,
                "no #%load directive, the template to fill is unknown",
            )
            .with_hint(LOAD_HINT)
        })?;

        let data = extract_template_data(&request.code)?;

        let url = livecell_magic::resolve_url(&load.url, &self.origin).map_err(|err| {
            RuntimeFault::new(FailureCategory::TemplateLoadError, err.to_string())
                .with_hint(LOAD_HINT)
        })?;
        let template = self.fetcher.fetch(&url).await?;

        let rendered = render_template(&template, &data);
        let name = file_name(&url);
        let artifact = RawArtifact::from_file(name.clone(), rendered.into_bytes());
        tracing::info!("Generated document {} ({} bytes)", name, artifact.bytes.len());

        Ok(RawOutput {
            stdout: format!("Document generated: {name} ({} bytes)", artifact.bytes.len()),
            stderr: String::new(),
            binary: Some(BinaryPayload {
                file_name: name,
                mime: artifact.mime.clone(),
                bytes: artifact.bytes.clone(),
            }),
            artifacts: vec![artifact],
        })
    }
}
