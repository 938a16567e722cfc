//! `opsflow` command line: run the web front end or check its configuration

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use opsflow_backend::RestBackend;
use opsflow_core::{AppConfig, Backend, InMemoryBackend, SystemClock};
use opsflow_server::{routes, telemetry, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file (environment variables override it)")
}

fn cli() -> Command {
    Command::new("opsflow")
        .version(opsflow_server::VERSION)
        .about("OpsFlow operations task tracker")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve")
                .about("Run the web front end")
                .arg(config_arg())
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Listen address, overrides the configured one"),
                )
                .arg(
                    Arg::new("in-memory")
                        .long("in-memory")
                        .action(ArgAction::SetTrue)
                        .help("Serve demo data from memory instead of the hosted backend"),
                )
                .arg(
                    Arg::new("log-json")
                        .long("log-json")
                        .action(ArgAction::SetTrue)
                        .help("Emit logs as JSON lines"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate the configuration, then print it")
                .arg(config_arg()),
        )
}

fn load_config(args: &ArgMatches, require_backend: bool) -> anyhow::Result<AppConfig> {
    let path = args.get_one::<PathBuf>("config");
    AppConfig::load(path.map(PathBuf::as_path), require_backend)
        .context("failed to load configuration")
}

async fn serve(args: &ArgMatches) -> anyhow::Result<()> {
    telemetry::init(args.get_flag("log-json"))?;

    let in_memory = args.get_flag("in-memory");
    let mut config = load_config(args, !in_memory)?;
    if let Some(bind) = args.get_one::<SocketAddr>("bind") {
        config.bind_addr = bind.to_string();
    }
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.bind_addr))?;

    let backend: Arc<dyn Backend> = if in_memory {
        tracing::warn!("serving in-memory demo data; nothing is persisted");
        Arc::new(InMemoryBackend::with_demo_data(chrono::Utc::now()))
    } else {
        Arc::new(RestBackend::new(&config).context("failed to build backend client")?)
    };

    let state = AppState::new(config, backend, Arc::new(SystemClock));
    tracing::info!(%addr, version = opsflow_server::VERSION, "opsflow listening");
    warp::serve(routes(state)).run(addr).await;
    Ok(())
}

fn check_config(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args, true)?;
    println!("Configuration OK");
    println!("  Backend:        {}", config.backend_url);
    println!("  Bind address:   {}", config.bind_addr);
    println!(
        "  Shift ends at:  {:02}:00 (UTC{:+} min)",
        config.shift.end_hour, config.shift.utc_offset_minutes
    );
    println!("  Departments:    {}", config.departments.join(", "));
    println!("  Audit page:     {} rows", config.audit_page_size);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("serve", args)) => serve(args).await,
        Some(("check-config", args)) => check_config(args),
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
