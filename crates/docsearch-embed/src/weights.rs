use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tokenizers::Tokenizer;
use tracing::debug;

pub fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let path = model_dir.join("tokenizer.json");
    Tokenizer::from_file(&path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))
}

pub fn read_config_json(model_dir: &Path) -> Result<String> {
    let path = model_dir.join("config.json");
    std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))
}

/// Load `pytorch_model.bin` or, failing that, `model.safetensors` as F32.
pub fn load_var_builder(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let pickle = model_dir.join("pytorch_model.bin");
    let safetensors = model_dir.join("model.safetensors");
    let tensors: HashMap<String, Tensor> = if pickle.exists() {
        debug!(path = %pickle.display(), "loading pickle weights");
        candle_core::pickle::read_all(&pickle)?.into_iter().collect()
    } else if safetensors.exists() {
        debug!(path = %safetensors.display(), "loading safetensors weights");
        candle_core::safetensors::load(&safetensors, device)?
    } else {
        bail!("No model weights found in {}", model_dir.display());
    };
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}
