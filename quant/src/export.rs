use std::fs;
use std::path::{Path, PathBuf};

use utils::values::{load_values, save_values};

use crate::config::Int;
use crate::error::{Error, Result};
use crate::network::{QuantizedNetwork, Topology};

/// Writes one `<param>.csv` per parameter into `dir`, creating it if
/// needed. Each file is a single comma-separated line of integers.
/// Returns the written paths in declaration order.
pub fn export_csv(network: &QuantizedNetwork, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for (name, values) in network.named_parameters() {
        let path = param_path(dir, &name);
        save_values(&path, values)?;
        log::debug!("Wrote {} values to {}", values.len(), path.display());
        written.push(path);
    }

    log::info!(
        "Exported {} parameters (img_scale={}, weight_scale={}) to {}",
        written.len(),
        network.img_scale(),
        network.weight_scale(),
        dir.display()
    );
    Ok(written)
}

/// Reads a directory written by `export_csv` back into a quantized network.
pub fn load_csv(
    dir: &Path,
    topology: Topology,
    img_scale: u64,
    weight_scale: u64,
) -> Result<QuantizedNetwork> {
    QuantizedNetwork::from_parameters(topology, img_scale, weight_scale, |name| {
        let path = param_path(dir, name);
        if !path.exists() {
            return Err(Error::MissingParameter {
                name: name.to_string(),
            });
        }
        load_values::<Int>(&path).map_err(|e| Error::Parse {
            path,
            reason: e.to_string(),
        })
    })
}

fn param_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.csv", name))
}
