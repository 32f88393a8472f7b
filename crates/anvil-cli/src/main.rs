use anvil_lib::instance::{resolve_constraints, scan_resources, MetadataStore, PackProfile};
use anvil_lib::meta::{Index, MetaLoader};
use anvil_lib::modplatform::{
    FixedChooser, PipelineReport, ProviderChoice, SourcePlatform, SourceRegistry, UpdatePipeline,
};
use anvil_lib::net::NetMode;
use anvil_lib::tasks::{ConcurrentTask, Task, TaskControl};
use anvil_lib::LauncherConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Browse the version catalog and check instances for mod updates.
#[derive(Parser)]
#[command(name = "anvil", version)]
struct Cli {
    /// Config file; defaults to the per-user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the data directory from the config.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Only use what is already cached on disk.
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Catalog queries
    Meta {
        #[command(subcommand)]
        command: MetaCommands,
    },
    /// Check an instance's resources for updates
    Updates {
        /// Instance directory containing mmc-pack.json
        instance_dir: PathBuf,

        /// Resource directory, relative to the instance
        #[arg(long, default_value = "minecraft/mods")]
        resources: PathBuf,

        /// Where to look up resources that have no metadata yet: modrinth, curseforge or skip
        #[arg(long, default_value = "modrinth")]
        provider: String,

        /// Do not retry failed lookups on the other provider
        #[arg(long)]
        no_fallback: bool,

        /// Install every update that is enabled by default
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Subcommand)]
enum MetaCommands {
    /// List every package in the catalog
    Index,
    /// List the versions of one package
    Versions { uid: String },
    /// Show one version
    Show { uid: String, version: String },
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "anvil", "anvil")
}

fn load_config(cli: &Cli) -> LauncherConfig {
    let path = cli.config.clone().or_else(|| {
        project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
    });
    let mut config = match path {
        Some(path) => LauncherConfig::load_or_init(&path),
        None => {
            log::warn!("No config directory available, using defaults");
            LauncherConfig::default()
        }
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    } else if config.data_dir == Path::new(".") {
        if let Some(dirs) = project_dirs() {
            config.data_dir = dirs.data_dir().to_path_buf();
        }
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli);
    let mode = if cli.offline {
        NetMode::Offline
    } else {
        NetMode::Online
    };
    log::debug!("Data directory: {:?}", config.data_dir);

    match &cli.command {
        Commands::Meta { command } => run_meta(&config, mode, command).await,
        Commands::Updates {
            instance_dir,
            resources,
            provider,
            no_fallback,
            apply,
        } => {
            let choice = match provider.to_lowercase().as_str() {
                "skip" | "none" => ProviderChoice::Skip,
                other => ProviderChoice::Use {
                    provider: other.parse::<SourcePlatform>()?,
                    try_others: !no_fallback,
                },
            };
            run_updates(
                &config,
                mode,
                instance_dir,
                &instance_dir.join(resources),
                choice,
                *apply,
            )
            .await
        }
    }
}

async fn run_meta(config: &LauncherConfig, mode: NetMode, command: &MetaCommands) -> Result<()> {
    let loader = MetaLoader::from_config(config)?;
    let index = Index::new();

    match command {
        MetaCommands::Index => {
            loader.load_index(&index, mode).await?;
            for list in index.lists() {
                println!("{:<40} {}", list.uid(), list.human_readable());
            }
        }
        MetaCommands::Versions { uid } => {
            let list = loader.load_list(&index, uid, mode).await?;
            let recommended = list.recommended();
            for version in list.versions() {
                let marker = match &recommended {
                    Some(r) if Arc::ptr_eq(r, &version) => "*",
                    _ => " ",
                };
                let time = version
                    .time()
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                println!(
                    "{} {:<24} {:<12} {}",
                    marker,
                    version.version(),
                    version.type_name(),
                    time
                );
            }
        }
        MetaCommands::Show { uid, version } => {
            let version = loader.load_version(&index, uid, version, mode).await?;
            println!("{:#}", version.summary_json());
        }
    }

    loader.fetcher().cache().flush()?;
    Ok(())
}

async fn run_updates(
    config: &LauncherConfig,
    mode: NetMode,
    instance_dir: &Path,
    resources_dir: &Path,
    choice: ProviderChoice,
    apply: bool,
) -> Result<()> {
    let profile = PackProfile::load(instance_dir)?;
    let loader = MetaLoader::from_config(config)?;
    let index = Index::new();
    let constraints = resolve_constraints(
        &profile,
        &index,
        &loader,
        mode,
        config.list_load_timeout(),
    )
    .await;
    log::info!(
        "Checking for game versions {:?} and loaders {:?}",
        constraints.game_versions,
        constraints.loaders
    );

    let client = config.http_client()?;
    let registry = Arc::new(SourceRegistry::from_config(config, client.clone()));
    let store = MetadataStore::new(resources_dir);
    let resources = scan_resources(resources_dir, &store)
        .with_context(|| format!("Failed to list resources in {:?}", resources_dir))?;

    let pipeline = Arc::new(UpdatePipeline::new(
        client,
        registry,
        resources_dir.to_path_buf(),
        config.concurrency(),
    ));
    let watcher = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pipeline.abort();
            }
        })
    };

    let mut chooser = FixedChooser(choice);
    let report = pipeline.run(resources, constraints, &mut chooser).await;
    watcher.abort();
    print_report(&report);

    if apply && !report.aborted {
        install(&report, config.concurrency()).await?;
    }
    loader.fetcher().cache().flush()?;
    Ok(())
}

fn print_report(report: &PipelineReport) {
    if report.aborted {
        println!("Update check was aborted; results are partial.");
    }
    for name in &report.ensured {
        println!("Found metadata for {}", name);
    }
    for name in &report.skipped {
        println!("Skipped {}", name);
    }

    if report.updates.is_empty() {
        println!("No updates available.");
    } else {
        println!("Updates:");
        for update in &report.updates {
            println!(
                "  [{}] {} {} -> {} ({}, {})",
                if update.enabled { "x" } else { " " },
                update.name,
                update.old_version,
                update.new_version,
                update.release_type,
                update.provider
            );
        }
    }

    let failures = report
        .metadata_failures
        .iter()
        .chain(report.check_failures.iter());
    for failure in failures {
        match &failure.recovery_url {
            Some(url) => println!("  ! {}: {} ({})", failure.name, failure.reason, url),
            None => println!("  ! {}: {}", failure.name, failure.reason),
        }
    }
}

async fn install(report: &PipelineReport, concurrency: usize) -> Result<()> {
    let engine = ConcurrentTask::new("Downloads", concurrency);
    for update in report.updates.iter().filter(|u| u.enabled) {
        engine.add_task(update.download.clone());
    }
    if engine.is_empty() {
        return Ok(());
    }

    let control = TaskControl::new();
    let outcome = engine.run(control.context()).await;
    for failure in engine.failures() {
        println!("  ! {}: {}", failure.name, failure.reason);
    }
    outcome?;
    println!("Installed {} update(s).", engine.succeeded().len());
    Ok(())
}
