// Command-line arguments

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;
use std::path::PathBuf;

use super::error::{ConfigError, ConfigResult};
use super::ConfigOverrides;
use crate::streaming::DriverKind;

/// Build the command-line interface
pub fn build_cli() -> Command {
    Command::new("camerapi")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live MJPEG camera stream with chunked recording")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDR")
                .help("Listen address, e.g. 0.0.0.0:5000"),
        )
        .arg(
            Arg::new("recordings")
                .short('r')
                .long("recordings")
                .value_name("DIR")
                .help("Directory receiving recording chunks"),
        )
        .arg(
            Arg::new("password-file")
                .long("password-file")
                .value_name("FILE")
                .help("File holding the recording password"),
        )
        .arg(
            Arg::new("driver")
                .long("driver")
                .value_name("DRIVER")
                .help("Camera driver: v4l2 or synthetic"),
        )
        .arg(
            Arg::new("device")
                .short('d')
                .long("device")
                .value_name("PATH")
                .help("Camera device path"),
        )
        .arg(
            Arg::new("annotate")
                .long("annotate")
                .action(ArgAction::SetTrue)
                .help("Overlay the capture time on live frames"),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .action(ArgAction::SetTrue)
                .help("Print a sample configuration file and exit"),
        )
}

/// Turn parsed arguments into configuration overrides
pub fn overrides_from_matches(matches: &ArgMatches) -> ConfigResult<ConfigOverrides> {
    let path = |name: &str| matches.get_one::<String>(name).map(PathBuf::from);

    let bind = match matches.get_one::<String>("bind") {
        Some(value) => Some(
            value
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::invalid_value("--bind", e.to_string()))?,
        ),
        None => None,
    };
    let driver = match matches.get_one::<String>("driver") {
        Some(value) => Some(
            value
                .parse::<DriverKind>()
                .map_err(|e| ConfigError::invalid_value("--driver", e.to_string()))?,
        ),
        None => None,
    };

    Ok(ConfigOverrides {
        config_file: path("config"),
        bind,
        recordings_path: path("recordings"),
        password_file: path("password-file"),
        driver,
        device_path: path("device"),
        annotate: matches.get_flag("annotate").then_some(true),
    })
}
