//! Interpreter-process runtime
//!
//! Runs each cell as a script in a fresh temporary directory. Files the
//! script leaves behind with a known extension (saved figures, generated
//! documents) become artifacts; the directory is removed afterwards.

use crate::adapter::{ExecutionRequest, RawArtifact, RawOutput, RuntimeAdapter};
use crate::error::{RuntimeError, RuntimeFault};
use crate::kind::RuntimeKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;

/// Saves open matplotlib figures into the working directory, then closes them
const PYTHON_FIGURE_EPILOGUE: &str = r#"
try:
    import sys as _livecell_sys
    if "matplotlib.pyplot" in _livecell_sys.modules:
        import matplotlib.pyplot as _livecell_plt
        for _livecell_i, _livecell_num in enumerate(_livecell_plt.get_fignums()):
            _livecell_plt.figure(_livecell_num).savefig(
                f"figure_{_livecell_i}.png", format="png", bbox_inches="tight", dpi=100
            )
        _livecell_plt.close("all")
except Exception as _livecell_err:
    print(f"figure capture failed: {_livecell_err}", file=_livecell_sys.stderr)
"#;

/// Optional library, probed with a command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySpec {
    /// Library name
    pub name: String,
    /// Arguments passed to the program; exit status 0 means loaded
    pub probe: Vec<String>,
}

impl LibrarySpec {
    /// Python module probed with `-c "import <module>"`
    #[must_use]
    pub fn python_module(name: &str) -> Self {
        Self {
            name: name.to_string(),
            probe: vec!["-c".into(), format!("import {name}")],
        }
    }
}

/// Configuration of a process runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRuntimeConfig {
    /// Runtime kind
    pub kind: String,
    /// Fence languages handled
    pub languages: Vec<String>,
    /// Interpreter program
    pub program: String,
    /// Arguments placed before the script path
    pub args: Vec<String>,
    /// Script file name in the working directory
    pub script_name: String,
    /// Arguments for the core availability check
    pub probe_args: Vec<String>,
    /// Optional libraries
    pub libraries: Vec<LibrarySpec>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// File extensions collected as artifacts
    pub artifact_extensions: Vec<String>,
    /// Appended to every script
    pub epilogue: Option<String>,
    /// Run timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProcessRuntimeConfig {
    fn default() -> Self {
        Self::shell()
    }
}

impl ProcessRuntimeConfig {
    /// `python3` with the common data libraries and figure capture
    #[must_use]
    pub fn python() -> Self {
        let mut env = BTreeMap::new();
        env.insert("MPLBACKEND".to_string(), "Agg".to_string());
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        Self {
            kind: "python".into(),
            languages: vec!["python".into(), "py".into(), "python3".into()],
            program: "python3".into(),
            args: Vec::new(),
            script_name: "cell.py".into(),
            probe_args: vec!["--version".into()],
            libraries: ["requests", "numpy", "pandas", "matplotlib"]
                .into_iter()
                .map(LibrarySpec::python_module)
                .collect(),
            env,
            artifact_extensions: vec!["png".into(), "svg".into(), "pdf".into(), "docx".into()],
            epilogue: Some(PYTHON_FIGURE_EPILOGUE.to_string()),
            timeout_secs: 60,
        }
    }

    /// POSIX `sh`
    #[must_use]
    pub fn shell() -> Self {
        Self {
            kind: "shell".into(),
            languages: vec!["sh".into(), "bash".into(), "shell".into()],
            program: "sh".into(),
            args: Vec::new(),
            script_name: "cell.sh".into(),
            probe_args: vec!["-c".into(), "true".into()],
            libraries: Vec::new(),
            env: BTreeMap::new(),
            artifact_extensions: vec!["png".into(), "svg".into(), "pdf".into(), "txt".into()],
            epilogue: None,
            timeout_secs: 30,
        }
    }

    /// Set program
    #[inline]
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set libraries
    #[inline]
    #[must_use]
    pub fn with_libraries(mut self, libraries: Vec<LibrarySpec>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Per-run timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Runtime backed by an external interpreter
#[derive(Debug)]
pub struct ProcessRuntime {
    config: ProcessRuntimeConfig,
    ready: AtomicBool,
}

impl ProcessRuntime {
    /// Create new runtime; nothing is started until `load_core`
    #[must_use]
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        Self {
            config,
            ready: AtomicBool::new(false),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ProcessRuntimeConfig {
        &self.config
    }

    async fn probe(&self, args: &[String]) -> Result<(), String> {
        let status = Command::new(&self.config.program)
            .args(args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.config.timeout(), status).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(format!("{} exited with {status}", self.config.program)),
            Ok(Err(err)) => Err(format!("cannot start {}: {err}", self.config.program)),
            Err(_) => Err(format!("{} did not answer in time", self.config.program)),
        }
    }

    async fn collect_artifacts(&self, dir: &Path) -> std::io::Result<Vec<RawArtifact>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.config.script_name {
                continue;
            }
            let wanted = name.rsplit_once('.').is_some_and(|(_, ext)| {
                self.config
                    .artifact_extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            });
            if wanted {
                names.push(name);
            }
        }
        names.sort();

        let mut artifacts = Vec::with_capacity(names.len());
        for name in names {
            let bytes = tokio::fs::read(dir.join(&name)).await?;
            artifacts.push(RawArtifact::from_file(name, bytes));
        }
        Ok(artifacts)
    }
}

fn io_fault(err: std::io::Error) -> RuntimeFault {
    RuntimeFault::runtime(format!("io error: {err}"))
}

#[async_trait]
impl RuntimeAdapter for ProcessRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::new(&self.config.kind)
    }

    fn languages(&self) -> Vec<String> {
        self.config.languages.clone()
    }

    async fn load_core(&self) -> Result<(), RuntimeError> {
        self.probe(&self.config.probe_args)
            .await
            .map_err(RuntimeError::CoreLoad)?;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn libraries(&self) -> Vec<String> {
        self.config.libraries.iter().map(|l| l.name.clone()).collect()
    }

    async fn load_library(&self, name: &str) -> Result<(), RuntimeError> {
        let spec = self
            .config
            .libraries
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| RuntimeError::LibraryLoad {
                name: name.to_string(),
                reason: "unknown library".into(),
            })?;
        self.probe(&spec.probe)
            .await
            .map_err(|reason| RuntimeError::LibraryLoad {
                name: name.to_string(),
                reason,
            })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<RawOutput, RuntimeFault> {
        let dir = tempfile::Builder::new()
            .prefix("livecell-")
            .tempdir()
            .map_err(io_fault)?;
        let script = dir.path().join(&self.config.script_name);

        let mut body = request.code.clone();
        if let Some(epilogue) = &self.config.epilogue {
            body.push('\n');
            body.push_str(epilogue);
        }
        tokio::fs::write(&script, body).await.map_err(io_fault)?;

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&script)
            .current_dir(dir.path())
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                RuntimeFault::runtime(format!("cannot start {}: {err}", self.config.program))
            })?;

        let output = tokio::time::timeout(self.config.timeout(), child.wait_with_output())
            .await
            .map_err(|_| {
                RuntimeFault::runtime(format!(
                    "execution timed out after {}s",
                    self.config.timeout().as_secs()
                ))
            })?
            .map_err(io_fault)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map_or_else(
                    || format!("{} exited with {}", self.config.program, output.status),
                    |l| l.trim().to_string(),
                );
            let mut fault = RuntimeFault::runtime(message);
            if !stderr.trim().is_empty() {
                fault = fault.with_trace(stderr);
            }
            return Err(fault);
        }

        let artifacts = self.collect_artifacts(dir.path()).await.map_err(io_fault)?;
        Ok(RawOutput {
            stdout,
            stderr,
            artifacts,
            binary: None,
        })
    }
}
