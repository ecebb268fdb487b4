//! Tether CLI entry point.
//!
//! Provides `serve` for running the daemon and `check-acl` for validating an
//! ACL file before deploying it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use tether::acl::AclStore;
use tether::config::DaemonConfig;
use tether::server::{tls, Server};

/// Tether: certificate-authenticated remote file and command access.
#[derive(Parser)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Serve(ServeArgs),
    /// Load an ACL file and print the resulting permissions.
    CheckAcl {
        /// ACL file to check.
        path: PathBuf,
    },
}

/// Flags for `serve`. Each overrides the config file and environment.
#[derive(Args)]
struct ServeArgs {
    /// Daemon config file (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server certificate chain, PEM (may also hold the key).
    #[arg(short = 'k', long, value_name = "SERVER_CERT.PEM")]
    server_certificate: Option<PathBuf>,

    /// Server private key, PEM, when not inside the certificate file.
    #[arg(long, value_name = "SERVER_KEY.PEM")]
    server_key: Option<PathBuf>,

    /// CA bundle trusted to issue client certificates, PEM.
    #[arg(short = 'c', long, value_name = "CLIENTS_CA.PEM")]
    client_certificate: Option<PathBuf>,

    /// Address to bind.
    #[arg(short = 'b', long, value_name = "ADDRESS")]
    bind: Option<IpAddr>,

    /// Port to bind.
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// ACL file (TOML).
    #[arg(short = 'a', long, value_name = "ACL.TOML")]
    acl: Option<PathBuf>,

    /// Directory for rotated JSON logs.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(v) = self.server_certificate {
            config.tls.server_certificate = Some(v);
        }
        if let Some(v) = self.server_key {
            config.tls.server_key = Some(v);
        }
        if let Some(v) = self.client_certificate {
            config.tls.client_ca = Some(v);
        }
        if let Some(v) = self.bind {
            config.server.bind = v;
        }
        if let Some(v) = self.port {
            config.server.port = v;
        }
        if let Some(v) = self.acl {
            config.acl.path = Some(v);
        }
        if let Some(v) = self.log_dir {
            config.logging.dir = Some(v);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => handle_serve(args).await,
        Command::CheckAcl { path } => handle_check_acl(&path),
    }
}

/// Run the daemon until Ctrl-C.
async fn handle_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = DaemonConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(tether::logging::init_production(dir, &config.logging.level)?),
        None => {
            tether::logging::init_cli(&config.logging.level);
            None
        }
    };

    let (Some(server_cert), Some(client_ca)) = (&config.tls.server_certificate, &config.tls.client_ca)
    else {
        anyhow::bail!("missing server certificate or client CA bundle");
    };
    let tls_config = tls::build_server_config(server_cert, config.tls.server_key.as_deref(), client_ca)
        .context("failed to build TLS configuration")?;

    let acl = AclStore::load(config.acl.path.as_deref()).context("failed to load ACL")?;

    if let Some(timeout) = config.exec.timeout() {
        info!(seconds = timeout.as_secs(), "child execution time limit enabled");
    }

    let server = Server::bind(config.listen_addr(), tls_config, acl, config.handler_settings())
        .await
        .context("failed to start listener")?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("tether stopped");
    Ok(())
}

/// Load an ACL and print each subject's grants.
fn handle_check_acl(path: &std::path::Path) -> anyhow::Result<()> {
    tether::logging::init_cli("warn");

    if !path.exists() {
        anyhow::bail!("ACL file {} does not exist", path.display());
    }
    let acl = AclStore::load(Some(path))
        .with_context(|| format!("failed to load {}", path.display()))?;

    println!("{} subject(s) in {}", acl.len(), path.display());
    for record in acl.records() {
        let grants: Vec<&str> = [
            (record.can_read(), "read_file"),
            (record.can_write(), "write_file"),
            (record.can_run_shell(), "exec_shell"),
            (record.can_run_command(), "exec_command"),
        ]
        .into_iter()
        .filter_map(|(granted, name)| granted.then_some(name))
        .collect();

        let root = |r: Option<&std::path::Path>| {
            r.map_or_else(|| "<unavailable>".to_owned(), |p| p.display().to_string())
        };
        println!(
            "{}: grants=[{}] fs_root={} command_root={}",
            record.subject(),
            grants.join(", "),
            root(record.fs_root()),
            root(record.command_root()),
        );
    }
    Ok(())
}
