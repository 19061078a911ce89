//! CLI entry point for ctalearn training.
//!
//! Subcommands:
//!   train   -- Train a variable-input array model from a YAML run configuration
//!   search  -- Random lr / beta search for a single-image gamma/hadron classifier

use anyhow::Context;
use clap::{Parser, Subcommand};
use ctalearn_core::{DevicePreference, LoggingConfig};
use ctalearn_models::select_device;
use ctalearn_training::checkpoint::RunDirs;
use ctalearn_training::config::{init_logging, load_config};
use ctalearn_training::search::{format_table, run_search, SearchConfig};
use ctalearn_training::trainer::train_array_model;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ctalearn-train", about = "IACT event classifier training")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train an array-level model.
    Train {
        /// YAML run configuration (model, training, logging, device).
        #[arg(long)]
        config: PathBuf,

        /// Training dataset directory.
        #[arg(long)]
        train_dir: PathBuf,

        /// Validation dataset directory.
        #[arg(long)]
        val_dir: PathBuf,

        /// Directory that receives `<run-name>/`.
        #[arg(long, default_value = "runs")]
        output_dir: PathBuf,

        #[arg(long, default_value = "ctalearn")]
        run_name: String,
    },

    /// Hyperparameter search over learning rate and Adam betas.
    Search {
        /// Training image dataset directory.
        train_data_dir: PathBuf,

        /// Validation image dataset directory.
        val_data_dir: PathBuf,

        run_name: String,

        /// Directory that receives `<run_name>/`.
        save_dir: PathBuf,

        /// Epochs per trial.
        epochs: usize,

        /// Initial weights for every trial.
        #[arg(long)]
        weights: Option<PathBuf>,

        #[arg(long, default_value = "96")]
        batch_size: usize,

        /// Number of sampled trials.
        #[arg(long, default_value = "20")]
        samples: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Registered extractor name.
        #[arg(long, default_value = "resnet")]
        cnn_block: String,

        #[arg(long, default_value = "info")]
        log_level: String,

        #[arg(long, default_value = "auto")]
        device: String,
    },
}

fn parse_device(value: &str) -> anyhow::Result<DevicePreference> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .with_context(|| format!("Unknown device '{value}' (expected auto, cpu, cuda or metal)"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            train_dir,
            val_dir,
            output_dir,
            run_name,
        } => {
            let run = load_config(&config)?;
            init_logging(&run.logging)?;
            let device = select_device(run.device)?;
            let run_dirs = RunDirs::create(&output_dir, &run_name)?;

            let summary =
                train_array_model(&run, &train_dir, &val_dir, &run_dirs, &run_name, &device)?;
            println!(
                "Best epoch {} (val_loss={:.5}), weights at {}",
                summary.best_epoch,
                summary.best_val_loss,
                summary.best_weights.display()
            );
            println!("Final validation: {}", summary.final_metrics);
        }

        Command::Search {
            train_data_dir,
            val_data_dir,
            run_name,
            save_dir,
            epochs,
            weights,
            batch_size,
            samples,
            seed,
            cnn_block,
            log_level,
            device,
        } => {
            init_logging(&LoggingConfig {
                level: log_level,
                ..LoggingConfig::default()
            })?;
            let device = select_device(parse_device(&device)?)?;

            let config = SearchConfig {
                train_dir: train_data_dir,
                val_dir: val_data_dir,
                run_name,
                save_dir,
                epochs,
                weights,
                batch_size,
                samples,
                seed,
                cnn_block,
            };
            let results = run_search(&config, &device)?;
            print!("{}", format_table(&results));
        }
    }

    Ok(())
}
