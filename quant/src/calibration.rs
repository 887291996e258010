use std::fmt;

use rayon::prelude::*;

use crate::bound::Bound;
use crate::config::CalibrationConfig;
use crate::error::{Error, Result};
use crate::network::{EvalContext, Network, QuantizedNetwork};
use crate::samples::{Sample, Samples};

/// Accumulated outcome of evaluating a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub correct: usize,
    pub total: usize,
    pub peak_magnitude: u64,
}

impl Tally {
    /// Sums counts and keeps the larger peak. Commutative and associative,
    /// so any reduction order gives the same tally.
    pub fn merge(self, other: Self) -> Self {
        Self {
            correct: self.correct + other.correct,
            total: self.total + other.total,
            peak_magnitude: self.peak_magnitude.max(other.peak_magnitude),
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

/// One tried weight scale. `tally` is `None` when the model could not be
/// quantized at that scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub weight_scale: u64,
    pub tally: Option<Tally>,
}

impl Probe {
    /// Accepted iff `bound` admits the peak magnitude, the same strict
    /// test an enforcing evaluation applies.
    pub fn within(&self, bound: Bound) -> bool {
        self.tally
            .is_some_and(|tally| bound.admits(tally.peak_magnitude))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub img_scale: u64,
    pub weight_scale: u64,
    pub accuracy: f64,
    pub peak_magnitude: u64,
}

impl fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "img_scale={} weight_scale={} accuracy={:.2}% peak={}",
            self.img_scale,
            self.weight_scale,
            self.accuracy * 100.0,
            self.peak_magnitude
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    Accepted(CalibrationResult),
    /// Not even the first doubling of the seed stayed within bound.
    Exhausted {
        img_scale: u64,
        seed_weight_scale: u64,
        rejected: Probe,
    },
}

impl Calibration {
    /// The accepted weight scale, or the seed if none was accepted.
    pub fn weight_scale(&self) -> u64 {
        match self {
            Calibration::Accepted(result) => result.weight_scale,
            Calibration::Exhausted {
                seed_weight_scale, ..
            } => *seed_weight_scale,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Calibration::Accepted(_))
    }

    pub fn into_result(self) -> Result<CalibrationResult> {
        match self {
            Calibration::Accepted(result) => Ok(result),
            Calibration::Exhausted {
                img_scale,
                seed_weight_scale,
                ..
            } => Err(Error::CalibrationExhausted {
                img_scale,
                seed: seed_weight_scale,
            }),
        }
    }
}

/// Evaluates every sample without enforcement.
pub fn evaluate_samples(
    network: &QuantizedNetwork,
    samples: &Samples,
    parallel: bool,
) -> Result<Tally> {
    let evaluate = |sample: &Sample| -> Result<Tally> {
        let input = sample.quantize(network.img_scale());
        let evaluation = network.forward(&input, EvalContext::probing())?;
        let correct = evaluation.predicted() == Some(sample.label as usize);

        Ok(Tally {
            correct: correct as usize,
            total: 1,
            peak_magnitude: evaluation.peak_magnitude(),
        })
    };

    if parallel {
        samples
            .as_slice()
            .par_iter()
            .map(evaluate)
            .try_reduce(Tally::default, |a, b| Ok(a.merge(b)))
    } else {
        samples
            .iter()
            .map(evaluate)
            .try_fold(Tally::default(), |acc, tally| tally.map(|t| acc.merge(t)))
    }
}

fn run_probe(
    network: &Network,
    samples: &Samples,
    config: &CalibrationConfig,
    weight_scale: u64,
) -> Result<Probe> {
    let tally = match QuantizedNetwork::quantize(network, config.img_scale, weight_scale) {
        Ok(quantized) => Some(evaluate_samples(&quantized, samples, config.parallel)?),
        Err(Error::ScaleOverflow { layer }) => {
            log::debug!("Weight scale {} overflows at {}", weight_scale, layer);
            None
        }
        Err(e) => return Err(e),
    };

    let probe = Probe {
        weight_scale,
        tally,
    };
    log_probe(config, &probe);
    Ok(probe)
}

fn log_probe(config: &CalibrationConfig, probe: &Probe) {
    let verdict = if probe.within(config.bound) {
        "SUCCESS"
    } else {
        "FAILURE"
    };

    match probe.tally {
        Some(tally) => log::info!(
            "img_scale={} weight_scale={}: {} (accuracy {:.2}%, peak {}, bound {})",
            config.img_scale,
            probe.weight_scale,
            verdict,
            tally.accuracy() * 100.0,
            tally.peak_magnitude,
            config.bound
        ),
        None => log::info!(
            "img_scale={} weight_scale={}: {} (scale overflow)",
            config.img_scale,
            probe.weight_scale,
            verdict
        ),
    }
}

/// Searches for the largest weight scale whose peak magnitude over
/// `samples` stays within `config.bound`, doubling from the seed.
///
/// A peak is within bound when it is strictly below it, so an accepted
/// scale also passes `EvalContext::enforcing` with the same bound.
///
/// The seed itself is never evaluated. With `config.refine` the gap between
/// the last accepted and the first rejected scale is bisected.
pub fn calibrate(
    network: &Network,
    samples: &Samples,
    config: &CalibrationConfig,
) -> Result<Calibration> {
    if samples.is_empty() {
        return Err(Error::EmptyDataset);
    }
    if config.img_scale == 0 || config.seed_weight_scale == 0 {
        return Err(Error::InvalidScale {
            img_scale: config.img_scale,
            weight_scale: config.seed_weight_scale,
        });
    }

    let mut weight_scale = config.seed_weight_scale;
    let mut accepted: Option<Probe> = None;

    let mut rejected = loop {
        let probe = match weight_scale.checked_mul(2) {
            Some(tentative) => run_probe(network, samples, config, tentative)?,
            None => Probe {
                weight_scale: u64::MAX,
                tally: None,
            },
        };

        if !probe.within(config.bound) {
            break probe;
        }
        weight_scale = probe.weight_scale;
        accepted = Some(probe);
    };

    if config.refine {
        if let Some(mut best) = accepted {
            while rejected.weight_scale - best.weight_scale > 1 {
                let mid = best.weight_scale + (rejected.weight_scale - best.weight_scale) / 2;
                let probe = run_probe(network, samples, config, mid)?;
                if probe.within(config.bound) {
                    best = probe;
                } else {
                    rejected = probe;
                }
            }
            accepted = Some(best);
        }
    }

    let calibration = match accepted {
        Some(Probe {
            weight_scale,
            tally: Some(tally),
        }) => Calibration::Accepted(CalibrationResult {
            img_scale: config.img_scale,
            weight_scale,
            accuracy: tally.accuracy(),
            peak_magnitude: tally.peak_magnitude,
        }),
        _ => Calibration::Exhausted {
            img_scale: config.img_scale,
            seed_weight_scale: config.seed_weight_scale,
            rejected,
        },
    };

    match &calibration {
        Calibration::Accepted(result) => log::info!("Calibrated: {}", result),
        Calibration::Exhausted { rejected, .. } => log::warn!(
            "No weight scale above {} stays within bound {} (first rejected: {})",
            config.seed_weight_scale,
            config.bound,
            rejected.weight_scale
        ),
    }

    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_merge() {
        let a = Tally {
            correct: 3,
            total: 5,
            peak_magnitude: 40,
        };
        let b = Tally {
            correct: 1,
            total: 1,
            peak_magnitude: 90,
        };
        let merged = a.merge(b);
        assert_eq!(merged, b.merge(a));
        assert_eq!(merged.correct, 4);
        assert_eq!(merged.total, 6);
        assert_eq!(merged.peak_magnitude, 90);
        assert!((merged.accuracy() - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(Tally::default().accuracy(), 0.0);
    }

    #[test]
    fn test_probe_within_matches_enforcement() {
        let probe = |peak| Probe {
            weight_scale: 2,
            tally: Some(Tally {
                correct: 0,
                total: 1,
                peak_magnitude: peak,
            }),
        };
        let bound = Bound::new(100);
        assert!(probe(99).within(bound));
        assert!(!probe(100).within(bound));
        assert!(!probe(101).within(bound));

        // ceil(9 / 2) = 5 is not admissible for t = 9
        let bound = Bound::half_modulus(9);
        assert!(probe(4).within(bound));
        assert!(!probe(5).within(bound));

        let overflowed = Probe {
            weight_scale: 2,
            tally: None,
        };
        assert!(!overflowed.within(bound));
    }

    #[test]
    fn test_exhausted_falls_back_to_seed() {
        let calibration = Calibration::Exhausted {
            img_scale: 2,
            seed_weight_scale: 4,
            rejected: Probe {
                weight_scale: 8,
                tally: None,
            },
        };
        assert_eq!(calibration.weight_scale(), 4);
        assert!(!calibration.is_accepted());
        assert!(matches!(
            calibration.into_result(),
            Err(Error::CalibrationExhausted { seed: 4, .. })
        ));
    }
}
