//! Provides the CLI option parser
//!
//! Used to parse the argv/config file into a struct that one harvest run
//! can consume and use as configuration data.

use clap::{App, Arg};
use sink::ClickhouseConfig;
use source::ScpConfig;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use toml;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn default_scratch_directory() -> PathBuf {
    env::temp_dir()
}

fn default_version() -> String {
    VERSION.unwrap().to_string()
}

/// Configuration struct for the volstat executable
///
/// This struct is what we construct from parsing the command line plus the
/// optional configuration file. It is not intended to be created by external
/// clients. Please see documentation on `parse_args` in this module for more
/// details.
#[derive(Debug)]
pub struct Args {
    /// The logical name of the array, as records should carry it in the
    /// database. Operator supplied, not the network address.
    pub hostname: String,
    /// The network address of the array to connect to.
    pub address: String,
    /// The verbosity setting of volstat. The higher the value the more
    /// chatty volstat gets.
    pub verbose: u64,
    /// Volstat version string. This is set automatically.
    pub version: String,
    /// Where per-run working directories are created. Each run scopes a
    /// uniquely named directory underneath.
    pub scratch_directory: PathBuf,
    /// Store connection parameters. See `sink::clickhouse` for more.
    pub clickhouse: ClickhouseConfig,
    /// Array transport parameters. See `source::scp` for more.
    pub ssh: ScpConfig,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            hostname: String::new(),
            address: String::new(),
            verbose: 0,
            version: default_version(),
            scratch_directory: default_scratch_directory(),
            clickhouse: ClickhouseConfig::default(),
            ssh: ScpConfig::default(),
        }
    }
}

/// Parse the volstat configuration arguments
///
/// This function will read the environment arguments and construct an
/// `Args`. Connection details for the store and the array transport live in
/// an on-disk file; the two per-run identities are demanded on the command
/// line. See `volstat --help` for more information.
pub fn parse_args() -> Args {
    let args = App::new("volstat")
        .version(VERSION.unwrap_or("unknown"))
        .author("Brian L. Troutwine <blt@postmates.com>")
        .about("per-volume I/O counter harvesting, array to ClickHouse")
        .arg(
            Arg::with_name("hostname")
                .long("hostname")
                .short("H")
                .value_name("hostname")
                .required(true)
                .help("The logical name of the array as we want to see it in the database.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("address")
                .long("address")
                .short("a")
                .value_name("address")
                .required(true)
                .help("The network address of the array to ssh-connect.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("config-file")
                .long("config")
                .short("C")
                .value_name("config")
                .help("The config file to feed in.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Turn on verbose output."),
        )
        .get_matches();

    let verb = if args.is_present("verbose") {
        args.occurrences_of("verbose")
    } else {
        0
    };

    let mut parsed = match args.value_of("config-file") {
        Some(filename) => {
            let mut fp = match File::open(filename) {
                Err(e) => panic!("Could not open file {} with error {}", filename, e),
                Ok(fp) => fp,
            };
            let mut buffer = String::new();
            fp.read_to_string(&mut buffer).unwrap();
            parse_config_file(&buffer, verb)
        }
        None => {
            let mut args = Args::default();
            args.verbose = verb;
            args
        }
    };
    parsed.hostname = args.value_of("hostname").unwrap().to_string();
    parsed.address = args.value_of("address").unwrap().to_string();
    parsed
}

/// Parse the volstat configuration file.
///
/// The file is toml with two tables: `[clickhouse]` for the store --
/// host, port, database, user, password, raw-table, delta-table -- and
/// `[ssh]` for the array transport -- user, port, key, remote-path,
/// file-pattern. A top-level `scratch-directory` relocates the per-run
/// working directories. Every key has a default.
pub fn parse_config_file(buffer: &str, verbosity: u64) -> Args {
    let mut args = Args::default();
    let value: toml::Value =
        toml::from_str(buffer).expect("could not parse config file");

    args.verbose = verbosity;

    args.scratch_directory = value
        .get("scratch-directory")
        .map(|s| {
            let s = s.as_str()
                .expect("scratch-directory value must be valid string");
            Path::new(s).to_path_buf()
        })
        .unwrap_or(args.scratch_directory);

    if let Some(tbl) = value.get("clickhouse") {
        let tbl = tbl.as_table().expect("clickhouse must be a table");
        if let Some(v) = tbl.get("host") {
            args.clickhouse.host = v.as_str()
                .expect("clickhouse host must be valid string")
                .to_string();
        }
        if let Some(v) = tbl.get("port") {
            args.clickhouse.port =
                v.as_integer().expect("could not parse clickhouse port") as u16;
        }
        if let Some(v) = tbl.get("database") {
            args.clickhouse.database = v.as_str()
                .expect("clickhouse database must be valid string")
                .to_string();
        }
        if let Some(v) = tbl.get("user") {
            args.clickhouse.user = v.as_str()
                .expect("clickhouse user must be valid string")
                .to_string();
        }
        if let Some(v) = tbl.get("password") {
            args.clickhouse.password = v.as_str()
                .expect("clickhouse password must be valid string")
                .to_string();
        }
        if let Some(v) = tbl.get("raw-table") {
            args.clickhouse.raw_table = v.as_str()
                .expect("clickhouse raw-table must be valid string")
                .to_string();
        }
        if let Some(v) = tbl.get("delta-table") {
            args.clickhouse.delta_table = v.as_str()
                .expect("clickhouse delta-table must be valid string")
                .to_string();
        }
    }

    if let Some(tbl) = value.get("ssh") {
        let tbl = tbl.as_table().expect("ssh must be a table");
        if let Some(v) = tbl.get("user") {
            args.ssh.user = v.as_str()
                .expect("ssh user must be valid string")
                .to_string();
        }
        if let Some(v) = tbl.get("port") {
            args.ssh.port =
                v.as_integer().expect("could not parse ssh port") as u16;
        }
        if let Some(v) = tbl.get("key") {
            let s = v.as_str().expect("ssh key must be valid string");
            args.ssh.key = Path::new(s).to_path_buf();
        }
        if let Some(v) = tbl.get("remote-path") {
            let s = v.as_str().expect("ssh remote-path must be valid string");
            args.ssh.remote_path = Path::new(s).to_path_buf();
        }
        if let Some(v) = tbl.get("file-pattern") {
            args.ssh.file_pattern = v.as_str()
                .expect("ssh file-pattern must be valid string")
                .to_string();
        }
    }

    args
}
