use anyhow::{Context, Result};
use clap::Parser;
use nanowrite::platforms::mock::{Echo, MockApp};
use nanowrite::{Config, ControlName, CoordinateTable, KeyCombo, NanoWrite, Session};
use nanowrite_rpc::{RpcServer, DEFAULT_PORT};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Remote control server for the NanoWrite DLW software"
)]
struct Args {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// JSON configuration file
    #[arg(short, long, env = "NANOWRITE_CONFIG")]
    config: Option<PathBuf>,

    /// Serve a simulated NanoWrite window instead of the real one
    #[arg(long)]
    mock: bool,

    /// Enable CORS for all origins
    #[arg(long)]
    cors: bool,
}

fn init_logging() -> Result<()> {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Ok(())
}

/// A simulated window that acknowledges every command and finishes at once.
fn mock_session(mut config: Config) -> Result<Session> {
    let app = MockApp::default();
    let profile = config.profile.get_or_insert_with(|| "1.7.5".to_string()).clone();
    let table = CoordinateTable::builtin(&profile)
        .with_context(|| format!("no built-in coordinates for NanoWrite {profile}"))?;
    let at = |control| table.point(control);

    app.script_log(["[00:00:00] NanoWrite ready"]);
    app.echo_on_click(at(ControlName::GwlSubmit)?, Echo::PastedMessages, ["[00:00:01] done."]);
    app.echo_on_key(KeyCombo::Enter, Echo::DialogText, ["[00:00:01] done."]);
    app.echo_on_click(at(ControlName::StartDlw)?, Echo::DialogFileMessages, ["[00:00:02] done."]);
    app.log_on_click(at(ControlName::Abort)?, "[00:00:03] Job aborted.");
    for field in [ControlName::PiezoXField, ControlName::PiezoYField, ControlName::PiezoZField] {
        app.script_field(at(field)?, ["150.0"]);
    }
    for field in [ControlName::StageXField, ControlName::StageYField, ControlName::StageZField] {
        app.script_field(at(field)?, ["0.0"]);
    }
    app.script_field(at(ControlName::ProgressField)?, ["00:00:00"]);

    Ok(Session::with_table(
        Box::new(app.driver()),
        Box::new(app.screen()),
        table,
        config,
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;

    info!("Starting nanowrite-rpc-server v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    let nw = if args.mock {
        info!("Using a simulated NanoWrite window");
        NanoWrite::from_session(mock_session(config)?)
    } else {
        // connecting talks to UI Automation synchronously
        tokio::task::spawn_blocking(move || NanoWrite::connect(config))
            .await?
            .context("failed to connect to NanoWrite")?
    };

    let mut server = RpcServer::new(Arc::new(nw)).with_cors(args.cors);
    let addr = server.start(args.host, args.port).await?;
    info!("Ready on http://{}/rpc", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.stop().await?;

    Ok(())
}
