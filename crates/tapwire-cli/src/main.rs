//! Tapwire - trust and resolution control plane for an intercepting proxy.
//!
//! Operator front end for the CA, trust-store and resolver libraries:
//! - `ca` creates, exports and signs with the proxy's root CA
//! - `trust` lists the effective trusted roots
//! - `resolve` resolves hostnames through a configured resolver chain

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tapwire_trust::DEFAULT_CONTAINER_ALIAS;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::commands::ExportFormat;
use crate::config::TapwireConfig;

/// Tapwire - CA, trust and resolver tooling for TLS interception
#[derive(Parser, Debug)]
#[command(name = "tapwire", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write daily log files under the data directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Directory for log files (implies --log-file)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the root CA
    #[command(subcommand)]
    Ca(CaCommand),

    /// Inspect trusted root certificates
    #[command(subcommand)]
    Trust(TrustCommand),

    /// Resolve hostnames through the configured resolver chain
    Resolve {
        /// Hostnames to resolve
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Remap FROM to TO before resolving (repeatable)
        #[arg(long = "remap", value_name = "FROM=TO", value_parser = commands::parse_remap)]
        remaps: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Debug)]
enum CaCommand {
    /// Generate the CA if it does not exist
    Init {
        /// CA directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Replace an existing CA
        #[arg(long)]
        force: bool,
    },

    /// Export the CA certificate or certificate and key
    Export {
        /// CA directory
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "pem")]
        format: ExportFormat,

        /// Output file
        #[arg(long)]
        out: PathBuf,

        /// Container password (p12 only)
        #[arg(long)]
        password: Option<String>,

        /// Container entry alias (p12 only)
        #[arg(long, default_value = DEFAULT_CONTAINER_ALIAS)]
        alias: String,
    },

    /// Print the descriptor of an impersonation certificate as JSON
    Describe {
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Copy subject fields from this upstream PEM certificate
        #[arg(long)]
        upstream: Option<PathBuf>,
    },

    /// Sign an impersonation certificate with the CA
    Issue {
        #[arg(required = true)]
        hosts: Vec<String>,

        /// CA directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Copy subject fields from this upstream PEM certificate
        #[arg(long)]
        upstream: Option<PathBuf>,

        /// Directory for the issued certificate and key
        #[arg(long)]
        out_dir: PathBuf,

        /// Encrypt the issued key with this password
        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TrustCommand {
    /// List trusted certificates
    List {
        /// Start from an empty store instead of platform and built-in roots
        #[arg(long)]
        empty: bool,

        /// Add certificates from a PEM bundle (repeatable)
        #[arg(long = "pem", value_name = "FILE")]
        pem_files: Vec<PathBuf>,
    },
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "tapwire", "Tapwire").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging, optionally with daily file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tapwire={0},tapwire_trust={0},tapwire_resolve={0},warn",
            log_level
        ))
    });

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| if args.log_file { logs_dir() } else { None });

    let mut file_logging_failed = false;
    if let Some(log_dir) = log_dir {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("tapwire")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
        file_logging_failed = true;
    }

    // Console only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if file_logging_failed {
        tracing::warn!("File logging unavailable, using console only");
    }
    None
}

fn run(args: Args) -> Result<()> {
    let config = TapwireConfig::load(args.config.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Ca(CaCommand::Init { dir, force }) => {
            let manager = commands::ca_manager(&config, dir.as_deref())?;
            commands::ca_init(&manager, force, &mut out)
        }
        Command::Ca(CaCommand::Export {
            dir,
            format,
            out: path,
            password,
            alias,
        }) => {
            let manager = commands::ca_manager(&config, dir.as_deref())?;
            commands::ca_export(
                &manager,
                format,
                &path,
                password.as_deref(),
                &alias,
                &mut out,
            )
        }
        Command::Ca(CaCommand::Describe { hosts, upstream }) => {
            commands::ca_describe(&hosts, upstream.as_deref(), &mut out)
        }
        Command::Ca(CaCommand::Issue {
            hosts,
            dir,
            upstream,
            out_dir,
            password,
        }) => {
            let manager = commands::ca_manager(&config, dir.as_deref())?;
            commands::ca_issue(
                &manager,
                &hosts,
                upstream.as_deref(),
                &out_dir,
                password.as_deref(),
                &mut out,
            )
        }
        Command::Trust(TrustCommand::List { empty, pem_files }) => {
            commands::trust_list(empty, &pem_files, &mut out)
        }
        Command::Resolve { hosts, remaps } => {
            commands::resolve(&config.resolver, &remaps, &hosts, &mut out)
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    run(args)
}
