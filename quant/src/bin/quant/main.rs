mod args;

use std::error::Error;

use args::{Args, Command, DataArgs, ModelArgs};
use candle_core::Device;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use quant::export::export_csv;
use quant::{
    calibrate, Bound, CalibrationConfig, EvalContext, Network, QuantizedNetwork, Samples, Tally,
};
use simplelog::{Config, SimpleLogger};

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    let device = Device::cuda_if_available(0)?;
    if device.is_cuda() {
        log::info!("Using CUDA for the float reference");
    } else {
        log::info!("Using CPU for the float reference");
    }

    match args.command {
        Command::Calibrate {
            model,
            data,
            img_scale,
            seed_scale,
            modulus,
            refine,
            sequential,
            export,
        } => {
            let network = load_network(&model, &device)?;
            let samples = load_samples(&data)?;

            let float_accuracy = network.accuracy(&samples, &device)?;
            log::info!("Float model accuracy: {:.2}%", float_accuracy * 100.0);

            let config = CalibrationConfig {
                img_scale,
                seed_weight_scale: seed_scale,
                bound: Bound::half_modulus(modulus),
                refine,
                parallel: !sequential,
            };
            log::info!(
                "Calibrating {} (modulus {}, bound {})",
                model.variant,
                modulus,
                config.bound
            );

            let result = calibrate(&network, &samples, &config)?.into_result()?;
            log::info!(
                "Accuracy drop: {:.2} pp",
                (float_accuracy - result.accuracy) * 100.0
            );

            if let Some(dir) = export {
                let quantized =
                    QuantizedNetwork::quantize(&network, result.img_scale, result.weight_scale)?;
                export_csv(&quantized, &dir)?;
            }
        }
        Command::Evaluate {
            model,
            data,
            img_scale,
            weight_scale,
            modulus,
            no_enforce,
        } => {
            let network = load_network(&model, &device)?;
            let samples = load_samples(&data)?;
            let quantized = QuantizedNetwork::quantize(&network, img_scale, weight_scale)?;
            let bound = Bound::half_modulus(modulus);

            let progress_bar = ProgressBar::new(samples.len() as u64);
            progress_bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.cyan} {pos}/{len} [{wide_bar:.cyan/blue}] {eta_precise} | {msg}")?,
            );

            let mut tally = Tally::default();
            for (i, sample) in samples.iter().enumerate() {
                let context = if no_enforce {
                    EvalContext::probing()
                } else {
                    EvalContext::enforcing(bound)
                }
                .with_peak(tally.peak_magnitude);

                let evaluation = quantized.forward(&sample.quantize(img_scale), context)?;
                let predicted = evaluation.predicted();
                log::debug!(
                    "Image {}: predicted {:?}, label {}",
                    i,
                    predicted,
                    sample.label
                );

                tally = tally.merge(Tally {
                    correct: (predicted == Some(sample.label as usize)) as usize,
                    total: 1,
                    peak_magnitude: evaluation.peak_magnitude(),
                });
                progress_bar.set_message(format!(
                    "acc: {:.2}%, peak: {}",
                    tally.accuracy() * 100.0,
                    tally.peak_magnitude
                ));
                progress_bar.inc(1);
            }
            progress_bar.finish();

            log::info!(
                "img_scale={} weight_scale={}: accuracy {:.2}% ({}/{}), peak {}, bound {}",
                img_scale,
                weight_scale,
                tally.accuracy() * 100.0,
                tally.correct,
                tally.total,
                tally.peak_magnitude,
                bound
            );
        }
    }

    log::info!("Done!");
    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::init(level, Config::default())?;

    Ok(args)
}

fn load_network(args: &ModelArgs, device: &Device) -> Result<Network, Box<dyn Error>> {
    let topology = args.variant.topology();

    let network = match (&args.model, &args.weights) {
        (Some(path), _) => Network::load_safetensors(path, topology, device)?,
        (None, Some(dir)) => Network::load_csv(dir, topology, device)?,
        (None, None) => return Err("either --model or --weights is required".into()),
    };

    log::info!("Loaded {} network", args.variant);
    Ok(network)
}

fn load_samples(args: &DataArgs) -> Result<Samples, Box<dyn Error>> {
    let mut samples = match (&args.csv, &args.images, &args.labels) {
        (Some(path), _, _) => Samples::open_csv(path)?,
        (None, Some(images), Some(labels)) => Samples::open_idx(images, labels)?,
        _ => return Err("either --csv or --images with --labels is required".into()),
    };

    if let Some(limit) = args.limit {
        samples.truncate(limit);
    }

    log::info!("Loaded {} validation samples", samples.len());
    Ok(samples)
}
