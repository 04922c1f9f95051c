//! Testing utilities for the livecell workspace
//!
//! Scripted runtime, recording host input and in-memory template fetcher.

#![allow(missing_docs)]

use async_trait::async_trait;
use livecell_core::host::{HostError, HostInputSurface};
use livecell_runtime::{
    ExecutionRequest, FetchError, RawArtifact, RawOutput, RuntimeAdapter, RuntimeError,
    RuntimeFault, RuntimeKind, TemplateFetcher, TemplateMode,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Install a test tracing subscriber once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Poll `condition` every 10ms for up to 5s
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// In-memory runtime understanding a tiny script language
///
/// Recognized lines:
/// - `print(<int expr>)` / `print("text")` / `print()`
/// - `eprint("text")` - write to stderr
/// - `raise <message>` - fail the run
/// - `image("<name>")` - emit a PNG artifact
///
/// Anything else is accepted and ignored.
#[derive(Debug)]
pub struct ScriptedRuntime {
    kind: RuntimeKind,
    languages: Vec<String>,
    libraries: Vec<String>,
    failing_libraries: Vec<String>,
    core_failure: Option<String>,
    gate: Option<Semaphore>,
    run_delay: Option<Duration>,
    template_mode: TemplateMode,
    ready: AtomicBool,
    core_loads: AtomicUsize,
    resets: AtomicUsize,
    runs: Mutex<Vec<String>>,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new("python")
    }
}

impl ScriptedRuntime {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: RuntimeKind::new(kind),
            languages: vec![kind.to_string()],
            libraries: Vec::new(),
            failing_libraries: Vec::new(),
            core_failure: None,
            gate: None,
            run_delay: None,
            template_mode: TemplateMode::Splice,
            ready: AtomicBool::new(false),
            core_loads: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Python-flavored runtime answering `python` and `py` fences
    pub fn python() -> Self {
        Self::new("python").with_languages(&["python", "py"])
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| (*l).to_string()).collect();
        self
    }

    pub fn with_libraries(mut self, libraries: &[&str]) -> Self {
        self.libraries = libraries.iter().map(|l| (*l).to_string()).collect();
        self
    }

    pub fn with_failing_library(mut self, name: &str) -> Self {
        self.failing_libraries.push(name.to_string());
        self
    }

    pub fn with_core_failure(mut self, reason: &str) -> Self {
        self.core_failure = Some(reason.to_string());
        self
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    pub fn with_template_mode(mut self, mode: TemplateMode) -> Self {
        self.template_mode = mode;
        self
    }

    /// Block `load_core` until [`Self::release_bootstrap`]
    pub fn held(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release_bootstrap(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn core_loads(&self) -> usize {
        self.core_loads.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn interpret(code: &str) -> Result<RawOutput, RuntimeFault> {
        let mut out = RawOutput::default();

        for (idx, raw) in code.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(message) = line.strip_prefix("raise ") {
                return Err(RuntimeFault::runtime(message.trim().to_string())
                    .with_trace(format!("line {}: {line}", idx + 1)));
            }
            if let Some(arg) = call_arg(line, "print") {
                let value = if arg.is_empty() {
                    String::new()
                } else if let Some(text) = quoted(arg) {
                    text.to_string()
                } else {
                    eval(arg)
                        .map_err(|msg| {
                            RuntimeFault::runtime(msg)
                                .with_trace(format!("line {}: {line}", idx + 1))
                        })?
                        .to_string()
                };
                out.stdout.push_str(&value);
                out.stdout.push('\n');
            } else if let Some(arg) = call_arg(line, "eprint") {
                out.stderr.push_str(quoted(arg).unwrap_or(arg));
                out.stderr.push('\n');
            } else if let Some(arg) = call_arg(line, "image") {
                let name = quoted(arg).unwrap_or(arg);
                out.artifacts
                    .push(RawArtifact::from_file(name, name.as_bytes().to_vec()));
            }
        }

        Ok(out)
    }
}

fn call_arg<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

fn quoted(arg: &str) -> Option<&str> {
    arg.strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .or_else(|| arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')))
}

/// Integer arithmetic with `+ - * /` and parentheses
fn eval(expr: &str) -> Result<i64, String> {
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0;
    let value = eval_sum(&tokens, &mut pos)?;
    if pos == tokens.len() {
        Ok(value)
    } else {
        Err(format!("SyntaxError: invalid expression '{expr}'"))
    }
}

fn eval_sum(t: &[char], pos: &mut usize) -> Result<i64, String> {
    let mut acc = eval_product(t, pos)?;
    while let Some(op @ ('+' | '-')) = t.get(*pos).copied() {
        *pos += 1;
        let rhs = eval_product(t, pos)?;
        acc = if op == '+' { acc + rhs } else { acc - rhs };
    }
    Ok(acc)
}

fn eval_product(t: &[char], pos: &mut usize) -> Result<i64, String> {
    let mut acc = eval_atom(t, pos)?;
    while let Some(op @ ('*' | '/')) = t.get(*pos).copied() {
        *pos += 1;
        let rhs = eval_atom(t, pos)?;
        acc = if op == '*' {
            acc * rhs
        } else if rhs == 0 {
            return Err("ZeroDivisionError: division by zero".into());
        } else {
            acc / rhs
        };
    }
    Ok(acc)
}

fn eval_atom(t: &[char], pos: &mut usize) -> Result<i64, String> {
    match t.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = eval_sum(t, pos)?;
            if t.get(*pos) != Some(&')') {
                return Err("SyntaxError: unbalanced parenthesis".into());
            }
            *pos += 1;
            Ok(value)
        }
        Some('-') => {
            *pos += 1;
            Ok(-eval_atom(t, pos)?)
        }
        Some(c) if c.is_ascii_digit() => {
            let start = *pos;
            while t.get(*pos).is_some_and(char::is_ascii_digit) {
                *pos += 1;
            }
            t[start..*pos]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|e| format!("ValueError: {e}"))
        }
        Some(c) => Err(format!("NameError: unexpected '{c}'")),
        None => Err("SyntaxError: unexpected end of expression".into()),
    }
}

#[async_trait]
impl RuntimeAdapter for ScriptedRuntime {
    fn kind(&self) -> RuntimeKind {
        self.kind.clone()
    }

    fn languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    async fn load_core(&self) -> Result<(), RuntimeError> {
        self.core_loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| RuntimeError::CoreLoad(e.to_string()))?
                .forget();
        }
        if let Some(reason) = &self.core_failure {
            return Err(RuntimeError::CoreLoad(reason.clone()));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn libraries(&self) -> Vec<String> {
        self.libraries.clone()
    }

    async fn load_library(&self, name: &str) -> Result<(), RuntimeError> {
        if self.failing_libraries.iter().any(|l| l == name) {
            Err(RuntimeError::LibraryLoad {
                name: name.to_string(),
                reason: "not available".into(),
            })
        } else {
            Ok(())
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<RawOutput, RuntimeFault> {
        self.runs.lock().push(request.code.clone());
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        Self::interpret(&request.code)
    }

    async fn reset_artifacts(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn template_mode(&self) -> TemplateMode {
        self.template_mode
    }
}

/// Host input event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Replaced(String),
    Submitted(String),
}

/// Host input surface recording every change
#[derive(Debug, Default)]
pub struct RecordingInputSurface {
    text: Mutex<String>,
    events: Mutex<Vec<InputEvent>>,
    unavailable: bool,
}

impl RecordingInputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface with text already typed by the user
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
            ..Self::default()
        }
    }

    /// Surface whose every call fails
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().clone()
    }

    pub fn submissions(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                InputEvent::Submitted(text) => Some(text.clone()),
                InputEvent::Replaced(_) => None,
            })
            .collect()
    }

    fn check(&self) -> Result<(), HostError> {
        if self.unavailable {
            Err(HostError::Unavailable("input surface detached".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HostInputSurface for RecordingInputSurface {
    async fn pending_text(&self) -> Result<String, HostError> {
        self.check()?;
        Ok(self.text())
    }

    async fn replace_text(&self, text: &str) -> Result<(), HostError> {
        self.check()?;
        *self.text.lock() = text.to_string();
        self.events.lock().push(InputEvent::Replaced(text.to_string()));
        Ok(())
    }

    async fn submit(&self) -> Result<(), HostError> {
        self.check()?;
        let text = std::mem::take(&mut *self.text.lock());
        self.events.lock().push(InputEvent::Submitted(text));
        Ok(())
    }
}

/// In-memory template fetcher counting requests
#[derive(Debug, Default)]
pub struct StaticFetcher {
    templates: HashMap<String, String>,
    gate: Option<Semaphore>,
    fetches: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`
    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.templates.insert(url.to_string(), body.to_string());
        self
    }

    /// Block every fetch until [`Self::release`]
    pub fn held(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `n` blocked fetches through
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl TemplateFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| FetchError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?
                .forget();
        }
        self.templates
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(eval("1+1"), Ok(2));
        assert_eq!(eval("2 * (3 + 4) - 10 / 5"), Ok(12));
        assert_eq!(eval("-3*2"), Ok(-6));
        assert!(eval("1/0").unwrap_err().starts_with("ZeroDivisionError"));
        assert!(eval("x").is_err());
    }

    #[test]
    fn interprets_script() {
        let out = ScriptedRuntime::interpret(
            "#%autorun\nprint(1+1)\nprint(\"hi\")\neprint(\"careful\")\nimage(\"plot.png\")",
        )
        .unwrap();
        assert_eq!(out.stdout, "2\nhi\n");
        assert_eq!(out.stderr, "careful\n");
        assert_eq!(out.artifacts.len(), 1);

        let err = ScriptedRuntime::interpret("print(1)\nraise ValueError: bad").unwrap_err();
        assert_eq!(err.message, "ValueError: bad");
    }
}
