use clap::{App, Arg, ArgMatches};
use colored::*;
use std::path::Path;
use std::process::ExitCode;
use tpms_bridge::config::BridgeConfig;
use tpms_bridge::payload::{decode_payload, PayloadProfile, STANDARD_PROFILE};
use tpms_bridge::pipeline::{SignalScale, BATTERY_SCALE, PRESSURE_SCALE, TEMPERATURE_SCALE};
use tpms_bridge::units::{self, WIRE_FLOAT_LEN};

fn main() -> ExitCode {
    let matches = App::new("tpms-decode")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Decodes a TPMS advertisement payload the way the bridge does")
        .arg(
            Arg::with_name("payload")
                .help("Payload hex, e.g. 80eaca502ed8580903001c0700005f00")
                .index(1)
                .required_unless("float"),
        )
        .arg(
            Arg::with_name("profile")
                .short("p")
                .long("profile")
                .value_name("NAME")
                .help("Payload layout")
                .takes_value(true)
                .default_value(STANDARD_PROFILE),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Configuration to look up custom profiles in")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("float")
                .long("float")
                .value_name("HEX8")
                .help("Decode a 4-byte payload float field (big-endian)")
                .takes_value(true),
        )
        .get_matches();

    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{} {}", "error:".bright_red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

fn run(matches: &ArgMatches) -> Result<(), String> {
    if let Some(hex) = matches.value_of("float") {
        let bytes = units::hex_to_bytes(hex).map_err(|e| e.to_string())?;
        let field: [u8; WIRE_FLOAT_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| format!("float field must be {} bytes, got {}", WIRE_FLOAT_LEN, bytes.len()))?;
        println!("{} {}", "float:".bright_blue().bold(), units::wire_bytes_to_float(field));
    }

    let Some(payload) = matches.value_of("payload") else {
        return Ok(());
    };

    let profile = resolve_profile(matches)?;
    let reading = decode_payload(payload, &profile).map_err(|e| e.to_string())?;

    println!("{}", "Reading".bright_blue().bold());
    println!("  pressure     {:>8.2} psi", reading.pressure_psi);
    println!("  temperature  {:>8.2} °F", reading.temperature_f);
    println!("  battery      {:>8} %", reading.battery_pct);

    println!("{}", "Frames".bright_blue().bold());
    print_signal("pressure", &PRESSURE_SCALE, reading.pressure_psi);
    print_signal("temperature", &TEMPERATURE_SCALE, reading.temperature_f);
    print_signal("battery", &BATTERY_SCALE, f64::from(reading.battery_pct));

    Ok(())
}

fn resolve_profile(matches: &ArgMatches) -> Result<PayloadProfile, String> {
    let name = matches.value_of("profile").unwrap_or(STANDARD_PROFILE);
    let config = match matches.value_of("config") {
        Some(path) => BridgeConfig::load(Path::new(path)).map_err(|e| e.to_string())?,
        None => BridgeConfig::default(),
    };
    config
        .resolve_profile(name)
        .ok_or_else(|| format!("unknown profile {name:?}"))
}

fn print_signal(name: &str, scale: &SignalScale, value: f64) {
    match scale.apply(value) {
        Ok(volts) => {
            let wire = units::float_to_wire_bytes(volts as f32);
            println!(
                "  {:<12} {:>6.3} V  {}  (reads back {:.3})",
                name,
                volts,
                hex::encode(wire).bright_cyan(),
                units::frame_bytes_to_float(wire)
            );
        }
        Err(e) => println!("  {:<12} {}", name, e.to_string().yellow()),
    }
}
