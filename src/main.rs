//! WolfVault - Mutual-TLS File Custody Service
//!
//! Serves store, list, retrieve and remove operations to callers that
//! present a client certificate signed by a trusted CA.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfvault::api::VaultServer;
use wolfvault::config::WolfVaultConfig;
use wolfvault::error::Result;
use wolfvault::gate::audit::AuditSink;
use wolfvault::gate::{AdmissionGate, FanoutAuditSink, JsonFileAuditSink, TracingAuditSink};
use wolfvault::store::FileStore;

/// WolfVault - Mutual-TLS File Custody Service
#[derive(Parser)]
#[command(name = "wolfvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfvault.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfVault server
    Start,

    /// Initialize a configuration file and the store directory
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfvault.toml")]
        output: PathBuf,

        /// Store root directory to create
        #[arg(long, default_value = "/var/lib/wolfvault/files")]
        root_dir: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show configuration summary
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = match WolfVaultConfig::from_file(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to load configuration from {:?}: {}", cli.config, e);
                    return Err(e);
                }
            };
            let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
            init_logging(level, config.logging.format == "json");
            run_start(config).await
        }
        Commands::Init { output, root_dir } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), false);
            run_init(&output, &root_dir)
        }
        Commands::Validate => run_validate(&cli.config),
        Commands::Info => run_info(&cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the WolfVault server
async fn run_start(config: WolfVaultConfig) -> Result<()> {
    tracing::info!("Starting WolfVault...");

    let store = match FileStore::open(config.root_dir()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to open store at {:?}: {}", config.root_dir(), e);
            tracing::error!("Create it first with: wolfvault init --root-dir <dir>");
            return Err(e);
        }
    };

    let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(TracingAuditSink)];
    let mut audit_file = None;
    if let Some(path) = &config.audit.file {
        match JsonFileAuditSink::open(path).await {
            Ok(sink) => {
                tracing::info!("Audit records appended to {}", path.display());
                let sink = Arc::new(sink);
                sinks.push(sink.clone());
                audit_file = Some(sink);
            }
            Err(e) => {
                tracing::error!("Failed to open audit file {:?}: {}", path, e);
                return Err(e);
            }
        }
    }

    let gate = AdmissionGate::new(Arc::new(store), Arc::new(FanoutAuditSink::new(sinks)));

    let server = match VaultServer::new(&config, gate) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to configure TLS: {}", e);
            return Err(e);
        }
    };

    let result = server.start().await;

    if let Some(sink) = audit_file {
        if let Err(e) = sink.flush().await {
            tracing::error!("Failed to flush audit file: {}", e);
        }
    }

    result
}

/// Initialize configuration file and store root
fn run_init(output: &Path, root_dir: &Path) -> Result<()> {
    let config_content = WolfVaultConfig::init_template(root_dir);

    std::fs::create_dir_all(root_dir)?;
    tracing::info!("Store directory ready at {}", root_dir.display());

    std::fs::write(output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to point at your server key, certificate and CA bundle.");
    println!("Then start with: wolfvault --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match WolfVaultConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Bind Address: {}", config.server.bind_address);
            println!("  Store Root:   {}", config.root_dir().display());
            println!("  Client Certs: {}", client_cert_mode(&config));
            if !config.root_dir().is_dir() {
                println!("  ! store root does not exist yet (run `wolfvault init`)");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show configuration summary
fn run_info(config_path: &Path) -> Result<()> {
    let config = WolfVaultConfig::from_file(config_path)?;

    println!("WolfVault Configuration");
    println!("=======================");
    println!();
    println!("Bind Address:     {}", config.server.bind_address);
    println!("Max Upload:       {} MB", config.server.max_upload_mb);
    println!();
    println!("TLS:");
    println!("  Certificate:    {}", config.tls.cert.display());
    println!("  Key:            {}", config.tls.key.display());
    println!("  Client CA:      {}", config.tls.ca_cert.display());
    println!("  Client Certs:   {}", client_cert_mode(&config));
    println!();
    println!("Store Root:       {}", config.root_dir().display());
    println!(
        "Audit File:       {}",
        config
            .audit
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(log only)".into())
    );
    println!("Logging:          {} ({})", config.logging.level, config.logging.format);

    Ok(())
}

fn client_cert_mode(config: &WolfVaultConfig) -> &'static str {
    if config.tls.require_client_cert {
        "required"
    } else {
        "optional"
    }
}
