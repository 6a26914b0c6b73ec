#![allow(unknown_lints)]

extern crate chrono;
extern crate fern;
extern crate volstat;

#[macro_use]
extern crate log;

use chrono::Utc;
use std::process;

fn main() {
    let args = volstat::config::parse_args();

    let level = match args.verbose {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][{}] {}",
                record.target(),
                record.line().unwrap_or(0),
                Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .expect("could not set up logging");

    info!("volstat - {}", args.version);

    match volstat::run::run(&args) {
        Ok(summary) => {
            info!(
                "harvest of {} complete: {} files, {} records, {} baseline \
                 rows, {} delta rows",
                args.hostname,
                summary.files,
                summary.records,
                summary.baseline_rows,
                summary.delta_rows
            );
        }
        Err(e) => {
            error!("harvest of {} failed: {}", args.hostname, e);
            process::exit(1);
        }
    }
}
