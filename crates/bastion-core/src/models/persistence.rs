//! On-disk format of trained networks.
//!
//! A model directory holds `params.json` (architecture, human readable) and
//! `model.bin`: an 8-byte magic header, the parameter count as a
//! little-endian `u64`, then every parameter as a little-endian `f64` in
//! [`TrainableModel::parameters`] order.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::ActivationType;
use crate::models::{Mlp, ModelError, NumericModel, TrainableModel};

pub const MODEL_BLOB: &str = "model.bin";
pub const MODEL_PARAMS: &str = "params.json";

const MAGIC: &[u8; 8] = b"BSTNMLP1";

/// Architecture stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub input_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub activations: Vec<ActivationType>,
    pub output_size: usize,
    pub num_parameters: usize,
}

fn io_error(path: &Path, source: std::io::Error) -> ModelError {
    ModelError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn format_error(path: &Path, reason: impl Into<String>) -> ModelError {
    ModelError::Format {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn save_mlp(mlp: &Mlp, dir: &Path) -> Result<(), ModelError> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let params = MlpParams {
        input_size: mlp.input_size(),
        hidden_sizes: mlp.hidden_sizes().to_vec(),
        activations: mlp.activations().to_vec(),
        output_size: mlp.output_size(),
        num_parameters: mlp.num_parameters(),
    };
    let params_path = dir.join(MODEL_PARAMS);
    let json = serde_json::to_string_pretty(&params)?;
    fs::write(&params_path, json).map_err(|e| io_error(&params_path, e))?;

    let values = mlp.parameters();
    let mut blob = Vec::with_capacity(MAGIC.len() + 8 + values.len() * 8);
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for v in &values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    let blob_path = dir.join(MODEL_BLOB);
    fs::write(&blob_path, blob).map_err(|e| io_error(&blob_path, e))?;

    info!(dir = %dir.display(), parameters = values.len(), "saved network");
    Ok(())
}

pub(crate) fn load_mlp(dir: &Path) -> Result<Mlp, ModelError> {
    let params_path = dir.join(MODEL_PARAMS);
    let json = fs::read_to_string(&params_path).map_err(|e| io_error(&params_path, e))?;
    let params: MlpParams = serde_json::from_str(&json)?;
    if params.output_size != 1 {
        return Err(format_error(
            &params_path,
            format!("output size {} is not scalar", params.output_size),
        ));
    }
    let mut mlp = Mlp::zeros(params.input_size, &params.hidden_sizes, &params.activations)?;
    if mlp.num_parameters() != params.num_parameters {
        return Err(format_error(
            &params_path,
            format!(
                "architecture has {} parameters, file declares {}",
                mlp.num_parameters(),
                params.num_parameters
            ),
        ));
    }

    let blob_path = dir.join(MODEL_BLOB);
    let blob = fs::read(&blob_path).map_err(|e| io_error(&blob_path, e))?;
    let Some(rest) = blob.strip_prefix(MAGIC.as_slice()) else {
        return Err(format_error(&blob_path, "missing header"));
    };
    if rest.len() < 8 {
        return Err(format_error(&blob_path, "truncated parameter count"));
    }
    let (count, payload) = rest.split_at(8);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(count);
    let count = u64::from_le_bytes(count_bytes) as usize;
    if count != params.num_parameters || payload.len() != count * 8 {
        return Err(format_error(
            &blob_path,
            format!(
                "expected {} parameters, found {} bytes for {count}",
                params.num_parameters,
                payload.len()
            ),
        ));
    }
    let values: Vec<f64> = payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect();
    mlp.set_parameters(&values)?;
    debug!(dir = %dir.display(), parameters = count, "loaded network");
    Ok(mlp)
}
