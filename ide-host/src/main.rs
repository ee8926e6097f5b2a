use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trb_directory_watcher::ChannelRefresh;
use trb_ide_host::{IdeSettings, ProjectRegistry, TreeView, dispatch_refreshes};
use trb_project_config::{ConfigSource, TrbConfigFile};

/// T-Ruby IDE integration host.
#[derive(Debug, Parser)]
#[command(name = "trb-ide", version)]
struct Cli {
    /// Settings file (defaults to the user config directory).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the output directories of one or more projects until Ctrl-C.
    Watch {
        /// Project roots.
        #[arg(default_value = ".")]
        projects: Vec<PathBuf>,

        /// Override the quiet period before a burst is flushed.
        #[arg(long)]
        quiet_period_ms: Option<u64>,

        /// Override the poll timeout of the watch loop.
        #[arg(long)]
        poll_timeout_ms: Option<u64>,
    },

    /// Show the output directories resolved for a project.
    Config {
        #[arg(default_value = ".")]
        project: PathBuf,
    },

    /// Show or change persisted settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = match cli.settings {
        Some(path) => path,
        None => IdeSettings::default_path().context("no user config directory available")?,
    };

    match cli.command {
        Command::Watch {
            projects,
            quiet_period_ms,
            poll_timeout_ms,
        } => {
            let mut settings = IdeSettings::load(&settings_path)?;
            if let Some(ms) = quiet_period_ms {
                settings.watcher = settings.watcher.with_quiet_period(Duration::from_millis(ms));
            }
            if let Some(ms) = poll_timeout_ms {
                settings.watcher = settings.watcher.with_poll_timeout(Duration::from_millis(ms));
            }
            watch(&projects, settings).await
        }
        Command::Config { project } => {
            show_config(&project);
            Ok(())
        }
        Command::Settings { action } => {
            let mut settings = IdeSettings::load(&settings_path)?;
            match action {
                SettingsAction::Show => {
                    println!("# {}", settings_path.display());
                    print!("{}", toml::to_string_pretty(&settings)?);
                    if let Some(command) = settings.lsp_command() {
                        println!("# language server: {}", command.join(" "));
                    }
                }
                SettingsAction::Set { key, value } => {
                    settings.set(&key, &value)?;
                    settings.save(&settings_path)?;
                    println!("{key} updated");
                }
            }
            Ok(())
        }
    }
}

async fn watch(projects: &[PathBuf], settings: IdeSettings) -> Result<()> {
    let (refresh, requests) = ChannelRefresh::new();
    let registry = ProjectRegistry::new(
        Arc::new(TrbConfigFile::new()),
        Arc::new(refresh),
        settings.watcher.clone(),
    );

    let mut opened = 0;
    for project in projects {
        match registry.open(project) {
            Some(id) => {
                for root in registry.watched_roots(&id) {
                    println!("watching {}", root.display());
                }
                opened += 1;
            }
            None => warn!("{} is not a T-Ruby project", project.display()),
        }
    }
    if opened == 0 {
        anyhow::bail!("no T-Ruby projects to watch");
    }

    let dispatch = dispatch_refreshes(requests, TreeView::new(), |stats| {
        println!(
            "refreshed {} ({} files, +{} -{})",
            stats.path.display(),
            stats.files,
            stats.added,
            stats.removed
        );
    });

    tokio::select! {
        res = dispatch => {
            res?;
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            info!("Interrupted, closing projects");
        }
    }

    registry.close_all();
    Ok(())
}

fn show_config(project: &Path) {
    let source = TrbConfigFile::new();
    let config = source.load(project);

    println!("project:   {}", project.display());
    println!("t-ruby:    {}", source.recognizes(project));
    println!("output:    {}", config.output_root(project).display());
    match config.secondary_root(project) {
        Some(root) => println!("secondary: {}", root.display()),
        None => println!("secondary: (none)"),
    }
}
