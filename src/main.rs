//! netbootd - network boot control plane
//!
//! Runs the DHCP, TFTP, syslog and HTTP listeners until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use netbootd::backend::{BootRecordLookup, FileBackend, NoopBackend};
use netbootd::config::{Args, BackendKind, Config};
use netbootd::dhcp::{DhcpServer, Handler};
use netbootd::ipxe::{BinaryStore, ScriptComposer};
use netbootd::iso::{source_from_location, PatchedImage};
use netbootd::routes::{self, AppState, IsoState, StartupInfo};
use netbootd::syslog::SyslogServer;
use netbootd::telemetry;
use netbootd::tftp::TftpServer;

fn revision() -> String {
    match option_env!("NETBOOTD_GIT_REV") {
        Some(rev) => format!("{} ({rev})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_args(&args).context("Invalid configuration")?;
    let startup = StartupInfo::now(revision());
    tracing::info!(revision = %startup.revision, mode = %config.mode, "Starting netbootd");

    let backend: Arc<dyn BootRecordLookup> = match &config.backend {
        BackendKind::File(path) => Arc::new(FileBackend::open(path.clone()).await?),
        BackendKind::Noop => Arc::new(NoopBackend),
    };
    tracing::info!(backend = backend.name(), "Record store ready");

    let binaries = Arc::new(BinaryStore::new(
        config.binary_dir.clone(),
        config.binary_patch.clone(),
    ));
    let script = match config.http.script.clone() {
        Some(settings) => Some(Arc::new(
            ScriptComposer::new(settings).context("Failed to load boot script template")?,
        )),
        None => None,
    };
    let iso = match &config.http.iso {
        Some(iso) => {
            let source = source_from_location(&iso.location)
                .with_context(|| format!("Invalid installer image location {}", iso.location))?;
            tracing::info!(source = ?source, "Installer image patching enabled");
            Some(Arc::new(IsoState {
                image: PatchedImage::new(source, iso.marker.clone()),
                payload: iso.payload.clone(),
            }))
        }
        None => None,
    };

    let state = AppState {
        backend: backend.clone(),
        lookup_timeout: config.lookup_timeout,
        script,
        binaries: config.http.binaries.then(|| binaries.clone()),
        iso,
        trusted_proxies: Arc::new(config.http.trusted_proxies.clone()),
        startup,
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    if let Some(dhcp) = config.dhcp.clone() {
        let handler = Handler::new(
            config.mode,
            backend.clone(),
            dhcp.server_ip,
            dhcp.syslog_ip,
            dhcp.netboot,
            config.lookup_timeout,
        );
        let server = DhcpServer::new(dhcp.addr, dhcp.interface, Arc::new(handler));
        tasks.spawn(server.run(shutdown.clone()));
    }

    if let Some(settings) = config.tftp.clone() {
        tasks.spawn(TftpServer::new(settings, binaries.clone()).run(shutdown.clone()));
    }

    if let Some(addr) = config.syslog {
        tasks.spawn(SyslogServer::new(addr, args.dhcp_iface.clone()).run(shutdown.clone()));
    }

    let listener = TcpListener::bind(config.http.addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", config.http.addr))?;
    tracing::info!(addr = %config.http.addr, "HTTP server listening");
    let app = routes::create_router(state);
    let token = shutdown.clone();
    tasks.spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("HTTP server failed")
    });

    // One failing listener takes the rest down with it.
    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(anyhow!("listener task aborted: {e}")),
        };
        if let Err(e) = result {
            tracing::error!("{e:#}");
            failed = true;
            shutdown.cancel();
        }
    }

    if failed {
        return Err(anyhow!("netbootd stopped after a listener failure"));
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGTERM or SIGINT.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}
