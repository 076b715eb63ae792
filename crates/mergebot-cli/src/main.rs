use clap::{Parser, Subcommand};
use merge_engine::{
    parse, split_lines, BufferVersionManager, CandidateUpdate, DiffAlgorithm, FingerprintIndex,
    HeuristicReport, ResolutionChoice, SemanticPatch, Side, Source,
};
use mergebot_core::config::{
    DiffSettings, EngineSettings, HttpSettings, PollingSettings, ProjectSettings, Settings,
};
use mergebot_core::logging::init_logging;
use mergebot_core::session::BlockView;
use mergebot_core::{FileContext, ResolutionSession, SharedSession};
use mergebot_engines::{record_choice, run_all, EngineSet, PollPolicy};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mergebot", about = "Resolve merge conflicts block by block")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to .mergebot data directory
    #[arg(long, default_value = ".mergebot")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run interactive setup wizard
    Setup,
    /// Show the current configuration
    Status,
    /// List the conflict blocks of a file
    Blocks {
        /// Conflicted file
        file: PathBuf,
    },
    /// Print the semantic patches of a file against a merged reference
    Patches {
        /// Conflicted file
        file: PathBuf,
        /// Reference merge to diff against
        #[arg(long)]
        merged: PathBuf,
    },
    /// Resolve a file interactively
    Resolve {
        /// Conflicted file
        file: PathBuf,
        /// Ask the configured engines for candidates
        #[arg(long)]
        fetch: bool,
        /// Write the result here instead of over the input
        #[arg(long)]
        output: Option<PathBuf>,
        /// Project root (defaults to settings)
        #[arg(long)]
        project: Option<String>,
        /// Branch merged into
        #[arg(long)]
        target: Option<String>,
        /// Branch merged from
        #[arg(long)]
        source: Option<String>,
    },
    /// Start the HTTP API
    Serve,
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir.clone()
}

fn settings_path(cli: &Cli) -> PathBuf {
    data_dir(cli).join("settings.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Setup => cmd_setup(&cli).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Blocks { file } => cmd_blocks(file).await,
        Commands::Patches { file, merged } => cmd_patches(&cli, file, merged).await,
        Commands::Resolve {
            file,
            fetch,
            output,
            project,
            target,
            source,
        } => {
            let mut settings = Settings::load_or_default(&settings_path(&cli))?;
            if let Some(project) = project {
                settings.project.project_path = project.clone();
            }
            if let Some(target) = target {
                settings.project.target_branch = target.clone();
            }
            if let Some(source) = source {
                settings.project.source_branch = source.clone();
            }
            cmd_resolve(&cli, settings, file, *fetch, output.as_deref()).await
        }
        Commands::Serve => cmd_serve(&cli).await,
    }
}

async fn cmd_setup(cli: &Cli) -> anyhow::Result<()> {
    let dir = data_dir(cli);
    std::fs::create_dir_all(&dir)?;

    println!();
    println!("mergebot - Setup Wizard");
    println!("=======================");
    println!();

    let defaults = Settings::load_or_default(&settings_path(cli))?;

    println!("Engine URLs (leave empty to disable a source)");
    let sa = url_prompt("Static analysis engine", &defaults.engines.sa)?;
    let classifier = url_prompt("Classifier", &defaults.engines.classifier)?;
    let combiner = url_prompt("Combiner", &defaults.engines.combiner)?;
    let edit_script = url_prompt("Edit-script engine", &defaults.engines.edit_script)?;
    let history = url_prompt("History backend", &defaults.engines.history)?;
    let audit = url_prompt("Audit backend", &defaults.engines.audit)?;
    let timeout_secs: u64 = dialoguer::Input::new()
        .with_prompt("Request timeout (seconds)")
        .default(defaults.engines.timeout_secs)
        .interact_text()?;

    println!();
    let max_attempts: u32 = dialoguer::Input::new()
        .with_prompt("Heuristic polling attempts")
        .default(defaults.polling.max_attempts)
        .interact_text()?;
    let interval_ms: u64 = dialoguer::Input::new()
        .with_prompt("Polling interval (ms)")
        .default(defaults.polling.interval_ms)
        .interact_text()?;

    println!();
    let algorithms = vec!["tokens", "lines"];
    let algorithm_idx = dialoguer::Select::new()
        .with_prompt("Diff algorithm")
        .items(&algorithms)
        .default(match defaults.diff.algorithm {
            DiffAlgorithm::Tokens => 0,
            DiffAlgorithm::Lines => 1,
        })
        .interact()?;
    let algorithm = match algorithm_idx {
        1 => DiffAlgorithm::Lines,
        _ => DiffAlgorithm::Tokens,
    };

    println!();
    let http_enabled = dialoguer::Confirm::new()
        .with_prompt("Enable HTTP API (for editor plugins)?")
        .default(defaults.http.enabled)
        .interact()?;
    let http_port: u16 = if http_enabled {
        dialoguer::Input::new()
            .with_prompt("HTTP port")
            .default(defaults.http.port)
            .interact_text()?
    } else {
        defaults.http.port
    };

    println!();
    let project_path: String = dialoguer::Input::new()
        .with_prompt("Default project path")
        .default(defaults.project.project_path.clone())
        .allow_empty(true)
        .interact_text()?;
    let target_branch: String = dialoguer::Input::new()
        .with_prompt("Default target branch")
        .default(defaults.project.target_branch.clone())
        .allow_empty(true)
        .interact_text()?;
    let source_branch: String = dialoguer::Input::new()
        .with_prompt("Default source branch")
        .default(defaults.project.source_branch.clone())
        .allow_empty(true)
        .interact_text()?;

    let settings = Settings {
        engines: EngineSettings {
            sa,
            classifier,
            combiner,
            edit_script,
            history,
            audit,
            timeout_secs,
        },
        polling: PollingSettings {
            max_attempts,
            interval_ms,
        },
        diff: DiffSettings { algorithm },
        http: HttpSettings {
            enabled: http_enabled,
            port: http_port,
            cors_origins: defaults.http.cors_origins,
        },
        project: ProjectSettings {
            project_path,
            target_branch,
            source_branch,
        },
    };

    settings.save(&settings_path(cli))?;

    println!();
    println!("Configuration saved to {}", settings_path(cli).display());
    println!();
    println!("Resolve a file with: mergebot resolve <file> --fetch");
    println!();

    Ok(())
}

fn url_prompt(prompt: &str, default: &str) -> anyhow::Result<String> {
    Ok(dialoguer::Input::<String>::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .allow_empty(true)
        .interact_text()?)
}

async fn cmd_status(cli: &Cli) -> anyhow::Result<()> {
    println!("mergebot Status");
    println!("===============");
    println!();

    match Settings::load(&settings_path(cli)) {
        Ok(settings) => {
            println!("Configuration: Found");
            let engines = &settings.engines;
            for (name, url) in [
                ("SA", &engines.sa),
                ("Classifier", &engines.classifier),
                ("Combiner", &engines.combiner),
                ("Edit script", &engines.edit_script),
                ("History", &engines.history),
                ("Audit", &engines.audit),
            ] {
                let url = if url.trim().is_empty() { "(disabled)" } else { url.as_str() };
                println!("  {}: {}", name, url);
            }
            println!("  Timeout: {}s", engines.timeout_secs);
            println!(
                "  Polling: {} attempts every {}ms",
                settings.polling.max_attempts, settings.polling.interval_ms
            );
            println!("  Diff: {:?}", settings.diff.algorithm);
            if settings.http.enabled {
                println!("  HTTP API: port {}", settings.http.port);
            }
            if !settings.project.project_path.is_empty() {
                println!(
                    "  Project: {} ({} <- {})",
                    settings.project.project_path,
                    settings.project.target_branch,
                    settings.project.source_branch
                );
            }
        }
        Err(_) => {
            println!("Configuration: Not found");
            println!("  Run 'mergebot setup' to configure");
        }
    }

    Ok(())
}

async fn cmd_blocks(file: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    let lines = split_lines(&content);
    let blocks = parse(&lines);
    let prints = FingerprintIndex::build(&lines, &blocks);

    if blocks.is_empty() {
        println!("No conflict blocks in {}", file.display());
        return Ok(());
    }

    println!("{} conflict block(s) in {}", blocks.len(), file.display());
    println!();
    for (i, block) in blocks.iter().enumerate() {
        let index = i + 1;
        let sides = block.sides(&lines);
        let fingerprint = prints.get(index).map(|fp| fp.short()).unwrap_or_default();
        println!(
            "  #{:<3} lines {}-{}  {}  ours {} / {}theirs {}  [{}]",
            index,
            block.our_marker_line,
            block.end_marker_line,
            if block.is_three_way() { "3-way" } else { "2-way" },
            sides.ours.len(),
            match &sides.base {
                Some(base) => format!("base {} / ", base.len()),
                None => String::new(),
            },
            sides.theirs.len(),
            fingerprint,
        );
    }

    Ok(())
}

async fn cmd_patches(cli: &Cli, file: &Path, merged: &Path) -> anyhow::Result<()> {
    let settings = Settings::load_or_default(&settings_path(cli))?;
    let content = tokio::fs::read_to_string(file).await?;
    let reference = tokio::fs::read_to_string(merged).await?;

    let mut manager = BufferVersionManager::new(&content, settings.diff.algorithm);
    manager.commit(CandidateUpdate::Heuristic(HeuristicReport {
        merged: Some(split_lines(&reference)),
        ..Default::default()
    }));

    let patches = manager.patches();
    if patches.is_empty() {
        println!("No semantic patches.");
        return Ok(());
    }

    for (i, patch) in patches.iter().enumerate() {
        println!(
            "patch {}: lines {}-{} ({} line(s) replaced)",
            i,
            patch.start,
            patch.end(),
            patch.offset
        );
        for line in &patch.new_lines {
            println!("  + {}", line);
        }
        println!();
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Resolve,
    Undo,
    Redo,
    Reset,
    Show,
    Write,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Resolve => "Resolve a block",
            Action::Undo => "Undo",
            Action::Redo => "Redo",
            Action::Reset => "Reset to original",
            Action::Show => "Show buffer",
            Action::Write => "Write and quit",
            Action::Quit => "Quit without writing",
        };
        f.write_str(label)
    }
}

async fn cmd_resolve(
    cli: &Cli,
    settings: Settings,
    file: &Path,
    fetch: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let _guard = init_logging(&data_dir(cli).join("logs"))?;

    let content = tokio::fs::read_to_string(file).await?;
    let context = FileContext {
        project_path: settings.project.project_path.clone(),
        target_branch: settings.project.target_branch.clone(),
        source_branch: settings.project.source_branch.clone(),
        file_path: file.display().to_string(),
        abs_path: std::fs::canonicalize(file)
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        ..Default::default()
    };
    let session = ResolutionSession::new(context, &content, settings.diff.algorithm).shared();

    let cancel = CancellationToken::new();
    let engines = if fetch {
        let engines = EngineSet::from_settings(&settings.engines)?;
        tokio::spawn(run_all(
            engines.clone(),
            session.clone(),
            PollPolicy::from(&settings.polling),
            cancel.clone(),
        ));
        println!("Fetching candidates from: {:?}", engines.enabled());
        engines
    } else {
        EngineSet::default()
    };

    let mut seen_notices = 0;
    loop {
        let snapshot = session.lock().await.snapshot();
        for notice in snapshot.notices.iter().skip(seen_notices) {
            println!("! {}", notice);
        }
        seen_notices = snapshot.notices.len();

        println!();
        println!(
            "{} of {} block(s) outstanding, {} semantic patch(es), heuristic {:?}",
            snapshot.outstanding.len(),
            snapshot.blocks.len(),
            snapshot.patches.len(),
            snapshot.heuristic_status
        );

        let mut actions = vec![Action::Resolve];
        if snapshot.can_undo {
            actions.push(Action::Undo);
        }
        if snapshot.can_redo {
            actions.push(Action::Redo);
        }
        actions.extend([Action::Reset, Action::Show, Action::Write, Action::Quit]);

        let idx = dialoguer::Select::new()
            .with_prompt("Action")
            .items(&actions)
            .default(0)
            .interact()?;

        match actions[idx] {
            Action::Resolve => resolve_block(&session, &engines).await?,
            Action::Undo => {
                session.lock().await.manager.undo();
            }
            Action::Redo => {
                session.lock().await.manager.redo();
            }
            Action::Reset => {
                session.lock().await.manager.reset();
            }
            Action::Show => {
                println!();
                println!("{}", snapshot.content);
            }
            Action::Write => {
                if !snapshot.outstanding.is_empty()
                    && !dialoguer::Confirm::new()
                        .with_prompt("Conflicts remain. Write anyway?")
                        .default(false)
                        .interact()?
                {
                    continue;
                }
                let target = output.unwrap_or(file);
                tokio::fs::write(target, &snapshot.content).await?;
                println!("Wrote {}", target.display());
                break;
            }
            Action::Quit => break,
        }
    }

    cancel.cancel();
    Ok(())
}

async fn resolve_block(session: &SharedSession, engines: &EngineSet) -> anyhow::Result<()> {
    let snapshot = session.lock().await.snapshot();
    let open: Vec<&BlockView> = snapshot
        .blocks
        .iter()
        .filter(|view| view.located.is_some())
        .collect();
    if open.is_empty() {
        println!("All blocks are resolved.");
        return Ok(());
    }

    let labels: Vec<String> = open
        .iter()
        .map(|view| {
            let line = view.located.map(|at| at.start + 1).unwrap_or_default();
            format!(
                "#{} at line {} ({} candidate(s))",
                view.index,
                line,
                view.candidates.len()
            )
        })
        .collect();
    let picked = dialoguer::Select::new()
        .with_prompt("Block")
        .items(&labels)
        .default(0)
        .interact()?;
    let view = open[picked];

    let menu = choice_menu(view, &snapshot.patches);
    let labels: Vec<&str> = menu.iter().map(|entry| entry.label.as_str()).collect();
    let picked = dialoguer::Select::new()
        .with_prompt("Resolution")
        .items(&labels)
        .default(0)
        .interact()?;
    let choice = menu[picked].choice;

    let mut guard = session.lock().await;
    match guard.manager.apply_resolution(view.index, choice) {
        Ok(applied) => {
            println!(
                "Applied {} to block #{} ({} outstanding)",
                choice, view.index, applied.transition.outstanding
            );
            if let Some(sink) = engines.audit.clone() {
                let record = guard.choice_record(view.index, applied.audit);
                let handle = record_choice(sink, record);
                let session = session.clone();
                tokio::spawn(async move {
                    if let Ok(Some(notice)) = handle.await {
                        session.lock().await.push_notice(notice);
                    }
                });
            }
        }
        Err(e) => println!("Could not apply: {}", e),
    }
    Ok(())
}

struct MenuEntry {
    label: String,
    choice: ResolutionChoice,
}

/// Everything that can replace `view`'s block right now.
fn choice_menu(view: &BlockView, patches: &[SemanticPatch]) -> Vec<MenuEntry> {
    let mut menu = vec![MenuEntry {
        label: "Keep ours".into(),
        choice: ResolutionChoice::Side(Side::Ours),
    }];
    if view.block.is_three_way() {
        menu.push(MenuEntry {
            label: "Keep base".into(),
            choice: ResolutionChoice::Side(Side::Base),
        });
    }
    menu.push(MenuEntry {
        label: "Keep theirs".into(),
        choice: ResolutionChoice::Side(Side::Theirs),
    });

    if let Some(at) = view.located {
        for (i, patch) in patches.iter().enumerate() {
            if patch.touches(at) {
                menu.push(MenuEntry {
                    label: format!("Semantic patch {}: {}", i, preview(&patch.new_content())),
                    choice: ResolutionChoice::SemanticPatch(i),
                });
            }
        }
    }

    let mut heuristic_listed = false;
    let mut rank = 0;
    for candidate in &view.candidates {
        let confidence = candidate
            .confidence
            .map(|c| format!(" ({:.2})", c))
            .unwrap_or_default();
        match candidate.source {
            Source::Heuristic => {
                if heuristic_listed {
                    continue;
                }
                heuristic_listed = true;
                menu.push(MenuEntry {
                    label: format!(
                        "Heuristic {}{}: {}",
                        candidate.label.as_deref().unwrap_or(""),
                        confidence,
                        preview(&candidate.content)
                    ),
                    choice: ResolutionChoice::Heuristic,
                });
            }
            Source::Ml => menu.push(MenuEntry {
                label: format!(
                    "ML [{}]{}: {}",
                    candidate.label.as_deref().unwrap_or("?"),
                    confidence,
                    preview(&candidate.content)
                ),
                choice: ResolutionChoice::Ml,
            }),
            Source::Dl => {
                if candidate.resolvable == Some(true) {
                    menu.push(MenuEntry {
                        label: format!("Edit script: {}", preview(&candidate.content)),
                        choice: ResolutionChoice::Dl,
                    });
                }
            }
            Source::History => {
                menu.push(MenuEntry {
                    label: format!("History #{}{}: {}", rank + 1, confidence, preview(&candidate.content)),
                    choice: ResolutionChoice::History { rank },
                });
                rank += 1;
            }
        }
    }
    menu
}

/// First line of `text`, shortened for a menu.
fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or("");
    let more = text.lines().count() > 1;
    let mut out: String = first.chars().take(50).collect();
    if more || first.chars().count() > 50 {
        out.push_str(" ...");
    }
    if out.is_empty() {
        out.push_str("(empty)");
    }
    out
}

#[cfg(feature = "http")]
async fn cmd_serve(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::load_or_default(&settings_path(cli))?;
    let _guard = init_logging(&data_dir(cli).join("logs"))?;

    tracing::info!("Starting mergebot HTTP API...");

    let engines = EngineSet::from_settings(&settings.engines)?;
    let port = settings.http.port;
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let server = mergebot_http::HttpServer::new(settings, engines);
    let rx = shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        if let Err(e) = server.start(rx).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    println!("mergebot HTTP API: http://0.0.0.0:{}", port);
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(());
    let _ = handle.await;
    tracing::info!("mergebot stopped");

    Ok(())
}

#[cfg(not(feature = "http"))]
async fn cmd_serve(_cli: &Cli) -> anyhow::Result<()> {
    anyhow::bail!("built without the http feature")
}
