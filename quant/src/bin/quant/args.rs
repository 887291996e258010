use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use quant::config::{DEFAULT_IMG_SCALE, DEFAULT_MODULUS, DEFAULT_SEED_WEIGHT_SCALE};
use quant::Variant;

#[derive(Parser, Debug, Clone)]
#[command(name = "Quantized Inference Calibrator")]
#[command(version = "0.1.0")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Size of the rayon thread pool.
    #[arg(long, global = true, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Log per-layer and per-image details.
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Search for the largest weight scale that stays within the modulus bound.
    Calibrate {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        data: DataArgs,

        /// Fixed image scale.
        #[arg(long, default_value_t = DEFAULT_IMG_SCALE)]
        img_scale: u64,

        /// Weight scale the doubling starts from.
        #[arg(long, default_value_t = DEFAULT_SEED_WEIGHT_SCALE)]
        seed_scale: u64,

        /// Plaintext modulus the quantized values must fit.
        #[arg(long, default_value_t = DEFAULT_MODULUS)]
        modulus: u64,

        /// Bisect between the last accepted and first rejected scale.
        #[arg(long)]
        refine: bool,

        /// Evaluate samples on a single thread.
        #[arg(long)]
        sequential: bool,

        /// Directory to write the accepted integer parameters to.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Evaluate a fixed scale pair with the overflow bound enforced.
    Evaluate {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value_t = DEFAULT_IMG_SCALE)]
        img_scale: u64,

        #[arg(long)]
        weight_scale: u64,

        /// Plaintext modulus the quantized values must fit.
        #[arg(long, default_value_t = DEFAULT_MODULUS)]
        modulus: u64,

        /// Only record the peak magnitude, never fail on it.
        #[arg(long)]
        no_enforce: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ModelArgs {
    /// Network topology.
    #[arg(long, default_value_t = Variant::Standard)]
    pub variant: Variant,

    /// Trained float model (safetensors).
    #[arg(long, conflicts_with = "weights", required_unless_present = "weights")]
    pub model: Option<PathBuf>,

    /// Directory of float parameter CSV files (`conv1.weight.csv`, ...).
    #[arg(long)]
    pub weights: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DataArgs {
    /// Validation images in IDX format.
    #[arg(long, requires = "labels", required_unless_present = "csv")]
    pub images: Option<PathBuf>,

    /// Validation labels in IDX format.
    #[arg(long, requires = "images")]
    pub labels: Option<PathBuf>,

    /// Validation set as `label,pixel0,...` rows.
    #[arg(long, conflicts_with_all = ["images", "labels"])]
    pub csv: Option<PathBuf>,

    /// Use at most this many samples.
    #[arg(long)]
    pub limit: Option<usize>,
}
