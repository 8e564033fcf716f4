// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command-line interface code. More specific options for `gaincal`
//! subcommands are contained in modules.
//!
//! Only 3 things should be public in this module: `GainCal`, `GainCal::run`,
//! and `GainCalCliError`.

mod device_info;
mod error;
mod estimate_memory;
mod simulate;

pub use error::GainCalCliError;

use std::path::PathBuf;

use clap::{AppSettings, Args, Parser, Subcommand};
use log::{debug, info};

use crate::{config::CalibrationConfig, PROGRESS_BARS};

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    about = "Per-antenna complex-gain calibration of radio-interferometric visibilities"
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_subcommands = true)]
#[clap(propagate_version = true)]
#[clap(infer_long_args = true)]
pub struct GainCal {
    #[clap(flatten)]
    global_opts: GlobalArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Don't draw progress bars.
    #[clap(long)]
    #[clap(global = true)]
    no_progress_bars: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    #[clap(global = true)]
    verbosity: u8,

    /// A toml or json file with calibration settings. Anything not in the
    /// file takes its default value.
    #[clap(short, long, parse(from_os_str))]
    #[clap(global = true)]
    config: Option<PathBuf>,

    /// Save the effective config into a new TOML file that can be used to
    /// reproduce this run.
    #[clap(long, parse(from_os_str))]
    #[clap(global = true)]
    save_toml: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
#[clap(arg_required_else_help = true)]
enum Command {
    /// Estimate the memory needed to apply and solve for gains.
    EstimateMemory(estimate_memory::EstimateMemoryArgs),

    /// Print information on the CPU and GPU.
    DeviceInfo(device_info::DeviceInfoArgs),

    /// Solve for and apply gains on synthetic data, optionally with adaptive
    /// flagging, and report the improvement in the residuals.
    Simulate(simulate::SimulateArgs),
}

impl GainCal {
    pub fn run(self) -> Result<(), GainCalCliError> {
        let GlobalArgs {
            no_progress_bars,
            verbosity,
            config,
            save_toml,
        } = self.global_opts;
        setup_logging(verbosity).map_err(|e| GainCalCliError::Generic(e.to_string()))?;
        // Enable progress bars if the user didn't say "no progress bars".
        if !no_progress_bars {
            PROGRESS_BARS.store(true);
        }

        let sub_command = match &self.command {
            Command::EstimateMemory(_) => "estimate-memory",
            Command::DeviceInfo(_) => "device-info",
            Command::Simulate(_) => "simulate",
        };
        info!("gaincal {} {}", sub_command, env!("CARGO_PKG_VERSION"));
        display_build_info();

        let config = match config {
            Some(file) => {
                info!("Reading config from {}", file.display());
                CalibrationConfig::from_file(&file)?
            }
            None => CalibrationConfig::default(),
        };
        debug!("{config:#?}");
        if let Some(toml) = save_toml {
            config.save_toml(&toml)?;
            info!("Saved config to {}", toml.display());
        }

        match self.command {
            Command::EstimateMemory(args) => args.run(&config)?,
            Command::DeviceInfo(args) => args.run(&config)?,
            Command::Simulate(args) => args.run(&config)?,
        }

        info!("gaincal {} complete.", sub_command);
        Ok(())
    }
}

/// Activate a logger. All log messages are put onto `stdout`. `env_logger`
/// automatically only uses colours and fancy symbols if we're on a tty (e.g. a
/// terminal); piped output will be formatted sensibly. Source code lines are
/// displayed in log messages when verbosity >= 3.
fn setup_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.try_init()
}

/// Write many info-level log lines of how this executable was compiled.
fn display_build_info() {
    let dirty = match GIT_DIRTY {
        Some(true) => " (dirty)",
        _ => "",
    };
    match GIT_COMMIT_HASH_SHORT {
        Some(hash) => {
            info!("Compiled on git commit hash: {hash}{dirty}");
        }
        None => info!("Compiled on git commit hash: <no git info>"),
    }
    if let Some(hr) = GIT_HEAD_REF {
        info!("            git head ref: {}", hr);
    }
    info!("            {}", BUILT_TIME_UTC);
    info!("         with compiler {}", RUSTC_VERSION);
    info!("   CUDA support: {}", cfg!(feature = "cuda"));
    info!("");
}
