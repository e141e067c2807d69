use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use docsearch_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;
use crate::weights::{load_tokenizer, load_var_builder, read_config_json};

const MAX_LEN: usize = 256;
const PAD_ID: u32 = 1;

/// BGE-M3 dense embedder: XLM-RoBERTa encoder, masked mean pooling, L2 norm.
pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    model_id: String,
}

impl BgeM3Embedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();
        let tokenizer = load_tokenizer(model_dir)?;
        let config_json = read_config_json(model_dir)?;
        let config: XLMRobertaConfig = serde_json::from_str(&config_json)?;
        let raw: serde_json::Value = serde_json::from_str(&config_json)?;
        let dim = raw["hidden_size"]
            .as_u64()
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))?;
        let vb = load_var_builder(model_dir, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        let model_id = format!(
            "bge-m3:{}",
            model_dir
                .file_name()
                .map_or_else(|| "local".into(), |n| n.to_string_lossy())
        );
        info!(
            model = %model_id,
            dim,
            elapsed_ms = started.elapsed().as_millis(),
            "embedding model loaded"
        );
        Ok(Self {
            model,
            tokenizer,
            device,
            dim,
            model_id,
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) =
            tokenize_on_device(&self.tokenizer, text, MAX_LEN, PAD_ID, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(
            &input_ids,
            &attention_mask,
            &token_type_ids,
            None,
            None,
            None,
        )?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let v: Vec<f32> = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        if v.len() != self.dim {
            return Err(anyhow!("model produced {} dims, expected {}", v.len(), self.dim));
        }
        Ok(v)
    }
}

impl Embedder for BgeM3Embedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        MAX_LEN
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let started = Instant::now();
        let out = texts
            .iter()
            .map(|t| self.embed_one(t))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            texts = texts.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "embedded batch"
        );
        Ok(out)
    }
}
