mod cli;

use vitrine::{
    config::{self, Config, TomlConfigStore},
    secrets::AesSecretStore,
    sources::{CommandMountHelper, RegistryOptions, ScanOutcome, SourceRegistry},
    tool::find_tool,
    Slideshow,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

async fn run_daemon(config_path: Option<&Path>, autostart: bool) -> Result<()> {
    let path = config::locate_config(config_path);
    let config = config::load_config_or_default(path.as_deref())?;

    tracing::info!("Starting vitrine");
    match path {
        Some(ref p) => tracing::info!("Using config file {:?}", p),
        None => tracing::info!("No config file found, using defaults"),
    }

    let mut builder = Slideshow::builder(config);
    if let Some(p) = path {
        builder = builder.config_store(Arc::new(TomlConfigStore::new(p)));
    }
    let slideshow = builder.build().context("Failed to initialize slideshow")?;

    tracing::info!("Local media root: {:?}", slideshow.media_root());
    slideshow.startup(autostart).await?;

    shutdown_signal().await;

    slideshow.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vitrine=trace,vitrine_common=debug".to_string()
        } else {
            "vitrine=debug".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Run { no_autostart } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_daemon(cli.config.as_deref(), !no_autostart))
        }
        Commands::Scan { source, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(scan_source(&source, cli.config.as_deref(), json))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vitrine {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn build_registry(config: &Config) -> Result<SourceRegistry> {
    let secrets = AesSecretStore::open(config.secret_key_file.as_deref());
    let mount = CommandMountHelper::new(
        &config.scanner.mount_helper,
        config
            .scanner
            .use_sudo
            .unwrap_or_else(CommandMountHelper::needs_sudo),
        Duration::from_secs(config.scanner.mount_timeout_secs),
    );

    Ok(SourceRegistry::new(
        config.sources.clone(),
        Arc::new(mount),
        Arc::new(secrets),
        RegistryOptions::from_config(config),
    )?)
}

async fn scan_source(name: &str, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = build_registry(&config)?;

    let outcome = registry.scan(name).await?;
    let source = registry
        .get(name)
        .with_context(|| format!("Source '{}' disappeared during the scan", name))?;
    registry.unmount_all().await;

    if let ScanOutcome::Failed { error } = outcome {
        anyhow::bail!("Scan of '{}' failed: {}", name, error);
    }

    if json {
        let files: Vec<_> = source
            .files
            .iter()
            .map(|(path, media_type)| serde_json::json!({ "path": path, "type": media_type }))
            .collect();
        let json_str = serde_json::to_string_pretty(&serde_json::json!({
            "source": source,
            "files": files,
        }))?;
        println!("{}", json_str);
    } else {
        println!("Source: {} ({})", source.name, source.kind);
        println!("Root: {}", source.scan_root().display());
        println!("Files: {}", source.file_count());
        for (path, media_type) in source.files.iter() {
            println!("  [{}] {}", media_type, path);
        }
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let mut all_ok = true;
    let mut report = |name: &str, found: Option<std::path::PathBuf>, required: bool| {
        let status = match (&found, required) {
            (Some(_), _) => "✓",
            (None, true) => {
                all_ok = false;
                "✗"
            }
            (None, false) => "-",
        };
        print!("{} {}", status, name);
        if let Some(path) = found {
            print!(" - {}", path.display());
        } else if !required {
            print!(" (optional)");
        }
        println!();
    };

    let mut players = vec![
        config.playback.image_viewer.clone(),
        config.playback.video_player.clone(),
    ];
    players.dedup();
    for player in &players {
        report(player, find_tool(player, None), true);
    }

    report(
        "ffmpeg",
        find_tool("ffmpeg", config.player.ffmpeg_path.as_deref()),
        false,
    );

    let helper = &config.scanner.mount_helper;
    report(
        "mount helper",
        helper.exists().then(|| helper.clone()),
        false,
    );

    let use_sudo = config
        .scanner
        .use_sudo
        .unwrap_or_else(CommandMountHelper::needs_sudo);
    if use_sudo {
        report("sudo", find_tool("sudo", None), false);
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Data dir: {}", config.data_dir.display());
            println!("  Sources: {}", config.sources.len());
            for source in &config.sources {
                println!(
                    "    {} ({}, auto_scan: {})",
                    source.name, source.kind, source.auto_scan
                );
            }
            println!(
                "  Split screen: {}",
                if config.playback.splitscreen_enabled { "on" } else { "off" }
            );
            println!("  Manual playlist items: {}", config.playlist.len());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("Default config:");
            println!("  Data dir: {}", config.data_dir.display());
            println!("  Media root: {}", config.media_root().display());
        }
    }

    Ok(())
}
