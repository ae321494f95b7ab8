//! # saxsxpcs_cli
//!
//! Part of the saxsxpcs crate family.
//!
//! This is the application to run SAXS/XPCS analysis from the command line.
//!
//! ## Install
//!
//! Use `cargo install --path ./saxsxpcs_cli`
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! saxsxpcs_cli -p config.yml new
//! ```
//!
//! edit it, then run the analysis with
//!
//! ```bash
//! saxsxpcs_cli -p config.yml
//! ```
//!
//! Detailed progress of each worker is written to `saxsxpcs.log` in the working directory.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use libsaxsxpcs::config::Config;
use libsaxsxpcs::process::{create_subsets, process_subset};
use libsaxsxpcs::worker_status::{BarColor, WorkerStatus};

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Could not write template config: {e}"),
    }
}

/// Send library logging to a file, as the terminal is busy with progress bars
fn init_file_logger() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./saxsxpcs.log"))
            .formatter(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            ))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let color = match color {
        BarColor::CYAN => "cyan",
        BarColor::MAGENTA => "magenta",
        BarColor::GREEN => "green",
    };
    ProgressStyle::with_template(&format!(
        "{{prefix}} [{{bar:40.{color}/blue}}] {{pos:>3}}% {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn main() {
    // Create a cli
    let matches = Command::new("saxsxpcs_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    if let Err(e) = init_file_logger() {
        log::warn!("Could not create log file, library logging is disabled: {e}");
    }

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Beamline: {}", config.beamline);
    log::info!(
        "Q Bins: {} Lags: {}",
        config.n_q_bins,
        match &config.lags {
            Some(lags) => format!("{lags:?}"),
            None => format!("multi-tau, {} points per level", config.multi_tau_points),
        }
    );
    if !config.is_n_threads_valid() {
        log::error!("Number of threads must be at least 1, found {}", config.n_threads);
        return;
    }

    let subsets = match create_subsets(&config) {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let n_files: usize = subsets.iter().map(Vec::len).sum();
    if n_files == 0 {
        log::warn!("No input files found, nothing to do.");
        return;
    }
    log::info!("Analyzing {n_files} files with {} workers", subsets.len());

    // Setup the progress bars and spawn the workers
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut bars = Vec::new();
    let mut workers = Vec::new();
    for (idx, subset) in subsets.into_iter().enumerate() {
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_style(bar_style(&BarColor::default()));
        pb.set_prefix(format!("Worker {idx}"));
        bars.push(pb);

        let conf = config.clone();
        let worker_tx = tx.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, idx, subset)
        }));
    }
    // Only the workers hold senders now, so the channel closes when they are done
    drop(tx);

    for status in rx.iter() {
        if let Some(pb) = bars.get(status.worker_id) {
            pb.set_style(bar_style(&status.color));
            pb.set_message(format!("file {}", status.file_index));
            pb.set_position((status.progress * 100.0) as u64);
        }
    }

    for (idx, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(Ok(())) => log::info!("Worker {idx} finished successfully."),
            Ok(Err(e)) => log::error!("Worker {idx} failed with error: {e}"),
            Err(_) => log::error!("Failed to join worker {idx}!"),
        }
        bars[idx].finish();
    }

    log::info!("Done.");
}
