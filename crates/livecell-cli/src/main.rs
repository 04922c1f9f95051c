//! `livecell` - run the live code cells of a Markdown document
//!
//! Renders a document the way a chat host would: every fenced block of a
//! registered language becomes a cell, one-shot directives fire, and the
//! text forwarded to the host input is printed as a transcript.

mod document;
mod transcript;

use anyhow::{bail, ensure, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use document::{fenced_blocks, FencedBlock};
use livecell_core::{
    CellId, CellManager, ManagerConfig, MountPoint, ReactivationController, RenderContext,
    RunStatus, SurfaceMode,
};
use livecell_runtime::{
    CachedFetcher, FileTemplateFetcher, HttpTemplateFetcher, ProcessRuntime,
    ProcessRuntimeConfig, RuntimeKind, TemplateFetcher, TemplateRuntime,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transcript::TranscriptInput;

const TEMPLATE_CACHE_CAPACITY: u64 = 64;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// `--config` file contents
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    manager: ManagerConfig,
    /// Interpreter runtimes; python and shell presets when empty
    runtimes: Vec<ProcessRuntimeConfig>,
}

impl CliConfig {
    fn load(path: Option<&PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.manager.validate()?;
        Ok(config)
    }

    fn runtimes(&self) -> Vec<ProcessRuntimeConfig> {
        if self.runtimes.is_empty() {
            vec![ProcessRuntimeConfig::python(), ProcessRuntimeConfig::shell()]
        } else {
            self.runtimes.clone()
        }
    }
}

#[derive(Debug, Serialize)]
struct DirectiveReport {
    position: usize,
    language: String,
    commands: livecell_magic::MagicCommandSet,
    warnings: Vec<String>,
}

fn cli() -> Command {
    let file = Arg::new("file")
        .value_name("FILE")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Markdown document");

    Command::new("livecell")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run the live code cells of a Markdown document")
        .subcommand_required(true)
        .arg(
            Arg::new("log")
                .long("log")
                .global(true)
                .value_name("FILTER")
                .help("Tracing filter, overrides RUST_LOG (default: warn)"),
        )
        .subcommand(
            Command::new("run")
                .about("Materialize cells, fire autoruns and print outputs")
                .arg(file.clone())
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file with [manager] settings and [[runtimes]]"),
                )
                .arg(
                    Arg::new("origin")
                        .long("origin")
                        .help("Origin used to resolve #%load URLs"),
                )
                .arg(
                    Arg::new("template-root")
                        .long("template-root")
                        .value_parser(value_parser!(PathBuf))
                        .help("Serve templates from this directory instead of HTTP"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Also run cells without #%autorun"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Save artifacts and generated documents here"),
                ),
        )
        .subcommand(
            Command::new("directives")
                .about("Print the directives of every fenced block as JSON")
                .arg(file),
        )
}

fn init_tracing(filter: Option<&String>) {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_one::<String>("log"));
    dispatch(&matches).await
}

async fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("run", args)) => {
            let failed = run(args).await?;
            ensure!(failed == 0, "{failed} cell(s) failed");
            Ok(())
        }
        Some(("directives", args)) => directives(args),
        Some((other, _)) => bail!("unknown subcommand '{other}'"),
        None => bail!("missing subcommand"),
    }
}

fn read_document(args: &ArgMatches) -> Result<(PathBuf, String)> {
    let path = args
        .get_one::<PathBuf>("file")
        .context("missing FILE")?
        .clone();
    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok((path, source))
}

fn directives(args: &ArgMatches) -> Result<()> {
    let (_, source) = read_document(args)?;
    let reports: Vec<DirectiveReport> = fenced_blocks(&source)
        .into_iter()
        .map(|block| {
            let report = livecell_magic::parse_report(&block.raw_text);
            DirectiveReport {
                position: block.position,
                language: block.language,
                commands: report.commands,
                warnings: report.warnings.iter().map(ToString::to_string).collect(),
            }
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn build_fetcher(args: &ArgMatches, origin: &str) -> Result<Arc<dyn TemplateFetcher>> {
    Ok(match args.get_one::<PathBuf>("template-root") {
        Some(root) => Arc::new(CachedFetcher::new(
            FileTemplateFetcher::new(root.clone(), origin),
            TEMPLATE_CACHE_CAPACITY,
        )),
        None => Arc::new(CachedFetcher::new(
            HttpTemplateFetcher::new(FETCH_TIMEOUT)?,
            TEMPLATE_CACHE_CAPACITY,
        )),
    })
}

/// Returns the number of failed cells
async fn run(args: &ArgMatches) -> Result<usize> {
    let (path, source) = read_document(args)?;
    let mut config = CliConfig::load(args.get_one::<PathBuf>("config"))?;
    if let Some(origin) = args.get_one::<String>("origin") {
        config.manager = config.manager.with_host_origin(origin.clone());
    }
    let origin = config.manager.host_origin.clone();

    let fetcher = build_fetcher(args, &origin)?;
    let input = Arc::new(TranscriptInput::new());
    let manager = CellManager::new(config.manager.clone(), Arc::clone(&fetcher), input.clone());
    for runtime in config.runtimes() {
        manager.register_runtime(Arc::new(ProcessRuntime::new(runtime)));
    }
    manager.register_runtime(Arc::new(TemplateRuntime::new(fetcher, origin)));

    let surface = path.display().to_string();
    let context = RenderContext::rendered(surface.as_str());
    let cells: Vec<(FencedBlock, MountPoint)> = fenced_blocks(&source)
        .into_iter()
        .filter_map(|block| {
            let mount =
                manager.on_fenced_block(&block.language, &block.raw_text, block.position, &context)?;
            Some((block, mount))
        })
        .collect();
    if cells.is_empty() {
        println!("No runnable cells in {}", path.display());
        return Ok(0);
    }

    let kinds: BTreeSet<RuntimeKind> = cells
        .iter()
        .filter_map(|(_, mount)| manager.state(mount.id).map(|s| s.kind))
        .collect();
    for kind in &kinds {
        let ready = manager.ensure_ready(kind).await?;
        if ready.degraded {
            tracing::warn!("Runtime {} is degraded", kind);
        }
    }

    // document is fully rendered now
    let controller = ReactivationController::new(manager.clone());
    controller.on_host_mode_changed(surface.as_str().into(), SurfaceMode::Rendered);
    manager.settle().await;

    if args.get_flag("all") {
        for (block, mount) in &cells {
            let idle = manager
                .state(mount.id)
                .is_some_and(|s| s.run_status == RunStatus::Idle);
            if idle {
                if let Err(err) = manager.run(mount.id, None).await {
                    tracing::warn!("Cell {} not run: {}", block.position, err);
                }
            }
        }
    }

    let out = args.get_one::<PathBuf>("out");
    let mut failed = 0;
    for (block, mount) in &cells {
        if print_cell(&manager, block, mount.id, out).await? {
            failed += 1;
        }
    }
    print_transcript(&input);
    Ok(failed)
}

/// Returns `true` if the cell failed
async fn print_cell(
    manager: &CellManager,
    block: &FencedBlock,
    id: CellId,
    out: Option<&PathBuf>,
) -> Result<bool> {
    let Some(state) = manager.state(id) else {
        return Ok(false);
    };
    println!("── [{}] {} {} ({:?})", block.position, block.language, id, state.run_status);

    if let Some(result) = &state.last_output {
        println!("{}", result.display_text());
        for artifact in &result.artifacts {
            println!("   artifact {} ({}, {} bytes)", artifact.id, artifact.mime, artifact.bytes.len());
            if let Some(dir) = out {
                save(dir, &format!("{}-{}", artifact.id, artifact.name), &artifact.bytes).await?;
            }
        }
        if let (Some(binary), Some(dir)) = (&result.binary, out) {
            save(dir, &binary.file_name, &binary.bytes).await?;
        }
    }
    if let Some(diagnostic) = &state.diagnostic {
        println!("   {:?}: {}", diagnostic.class, diagnostic.message);
        if let Some(hint) = &diagnostic.hint {
            for line in hint.lines() {
                println!("   | {line}");
            }
        }
    }
    println!();
    Ok(state.run_status == RunStatus::Failed)
}

async fn save(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    tokio::fs::write(&target, bytes)
        .await
        .with_context(|| format!("cannot write {}", target.display()))?;
    tracing::info!("Saved {}", target.display());
    Ok(())
}

fn print_transcript(input: &TranscriptInput) {
    for message in input.submitted() {
        println!("── sent to host");
        println!("{message}");
        println!();
    }
    let draft = input.draft();
    if !draft.is_empty() {
        println!("── left in host input");
        println!("{draft}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::ffi::OsString;

    #[test]
    fn cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let matches = cli()
            .try_get_matches_from(["livecell", "--log", "debug", "run", "doc.md", "--all"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert!(args.get_flag("all"));
        assert_eq!(args.get_one::<PathBuf>("file"), Some(&PathBuf::from("doc.md")));
        assert_eq!(matches.get_one::<String>("log").map(String::as_str), Some("debug"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(cli().try_get_matches_from(["livecell"]).is_err());
    }

    fn shell_only(dir: &Path) -> PathBuf {
        let path = dir.join("shell.toml");
        std::fs::write(
            &path,
            "[[runtimes]]\nkind = \"shell\"\nlanguages = [\"sh\"]\nprogram = \"sh\"\nscript_name = \"cell.sh\"\n",
        )
        .unwrap();
        path
    }

    async fn run_document(dir: &Path, body: &str) -> Result<()> {
        let doc = dir.join("doc.md");
        std::fs::write(&doc, body).unwrap();
        let config = shell_only(dir);
        let args: Vec<OsString> = vec![
            "livecell".into(),
            "run".into(),
            doc.into_os_string(),
            "--config".into(),
            config.into_os_string(),
        ];
        let matches = cli().try_get_matches_from(args).unwrap();
        dispatch(&matches).await
    }

    #[tokio::test]
    async fn passing_cells_exit_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_document(dir.path(), "```sh\n#%autorun\necho hi\n```\n").await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn failed_cells_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_document(dir.path(), "```sh\n#%autorun\nexit 3\n```\n")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "1 cell(s) failed");
    }

    #[test]
    fn config_defaults_to_presets() {
        let config = CliConfig::default();
        let kinds: Vec<String> = config.runtimes().into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec!["python".to_string(), "shell".to_string()]);
    }

    #[test]
    fn config_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livecell.toml");
        std::fs::write(
            &path,
            "[manager]\nmax_output_chars = 500\n\n[[runtimes]]\nkind = \"node\"\nprogram = \"node\"\nscript_name = \"cell.js\"\n",
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.manager.max_output_chars, 500);
        let runtimes = config.runtimes();
        assert_eq!(runtimes.len(), 1);
        assert_eq!(runtimes[0].program, "node");
    }
}
