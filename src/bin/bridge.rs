use clap::{App, Arg, ArgMatches};
use std::path::PathBuf;
use std::process::ExitCode;
use tpms_bridge::bridge::{BridgeError, ShutdownReason, TpmsBridge};
use tpms_bridge::bus::{BusConnector, MockBus};
use tpms_bridge::config::BridgeConfig;
use tpms_bridge::discovery::{AdvertisementSource, ReplaySource};
use tracing::{error, info, warn, Level};

#[cfg(feature = "bluez")]
use tpms_bridge::discovery::BluezSource;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
use tpms_bridge::bus::SocketCanConnector;

struct RunOptions {
    dry_run: bool,
    replay: Option<PathBuf>,
    paced: bool,
}

fn main() -> ExitCode {
    let matches = App::new("tpms-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Republishes BLE tire pressure sensors as CAN frames for the engine ECU")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file (reference install if omitted)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("channel")
                .long("channel")
                .value_name("IFACE")
                .help("CAN interface, overrides the configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("dry-run")
                .long("dry-run")
                .help("Log frames instead of sending them"),
        )
        .arg(
            Arg::with_name("replay")
                .long("replay")
                .value_name("FILE")
                .help("Replay recorded scans instead of scanning")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("paced")
                .long("paced")
                .requires("replay")
                .help("Make each replayed scan take the full scan window"),
        )
        .arg(
            Arg::with_name("dump-config")
                .long("dump-config")
                .help("Print the effective configuration and exit"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    if matches.is_present("dump-config") {
        return match config.to_json_pretty() {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "cannot serialize configuration");
                ExitCode::FAILURE
            }
        };
    }

    let options = RunOptions {
        dry_run: matches.is_present("dry-run"),
        replay: matches.value_of("replay").map(PathBuf::from),
        paced: matches.is_present("paced"),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(start(config, options)) {
        Ok(reason) => ExitCode::from(reason.exit_code()),
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(matches: &ArgMatches) -> Result<BridgeConfig, BridgeError> {
    let mut config = match matches.value_of("config") {
        Some(path) => BridgeConfig::load(PathBuf::from(path).as_path())?,
        None => BridgeConfig::default(),
    };
    if let Some(channel) = matches.value_of("channel") {
        config.bus.channel = channel.to_string();
    }
    config.validate()?;
    Ok(config)
}

async fn start(config: BridgeConfig, options: RunOptions) -> Result<ShutdownReason, BridgeError> {
    match &options.replay {
        Some(path) => {
            let source = ReplaySource::from_file(path)?.paced(options.paced);
            info!(path = %path.display(), scans = source.len(), "replaying recorded scans");
            with_bus(&config, source, options.dry_run).await
        }
        None => live_scan(&config, options.dry_run).await,
    }
}

#[cfg(feature = "bluez")]
async fn live_scan(config: &BridgeConfig, dry_run: bool) -> Result<ShutdownReason, BridgeError> {
    let source = BluezSource::connect().await?;
    with_bus(config, source, dry_run).await
}

#[cfg(not(feature = "bluez"))]
async fn live_scan(_config: &BridgeConfig, _dry_run: bool) -> Result<ShutdownReason, BridgeError> {
    Err(BridgeError::NoBackend(
        "BLE scanning (build with the bluez feature or pass --replay)",
    ))
}

async fn with_bus<S: AdvertisementSource>(
    config: &BridgeConfig,
    source: S,
    dry_run: bool,
) -> Result<ShutdownReason, BridgeError> {
    if dry_run {
        info!("dry run, frames are logged at debug level");
        return serve(config, source, MockBus::new()).await;
    }

    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    let result = serve(config, source, SocketCanConnector::new(config.bus.clone())).await;
    #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
    let result = {
        drop(source);
        Err(BridgeError::NoBackend("CAN transport (SocketCAN needs Linux, or pass --dry-run)"))
    };
    result
}

async fn serve<S: AdvertisementSource, C: BusConnector>(
    config: &BridgeConfig,
    source: S,
    connector: C,
) -> Result<ShutdownReason, BridgeError> {
    let mut bridge = TpmsBridge::new(config, source, connector)?;
    Ok(bridge.run(shutdown_signal()).await)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
