use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::{Linear, Module};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use docsearch_core::traits::PairScorer;

use crate::device::select_device;
use crate::tokenize::tokenize_pair_on_device;
use crate::weights::{load_tokenizer, load_var_builder, read_config_json};

const MAX_LEN: usize = 512;

/// ms-marco style cross-encoder: BERT, tanh pooler over `[CLS]`, one-logit head.
pub struct CrossEncoderScorer {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
}

impl CrossEncoderScorer {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();
        let tokenizer = load_tokenizer(model_dir)?;
        let config_json = read_config_json(model_dir)?;
        let config: BertConfig = serde_json::from_str(&config_json)?;
        let raw: serde_json::Value = serde_json::from_str(&config_json)?;
        let hidden = raw["hidden_size"]
            .as_u64()
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))?;

        let vb = load_var_builder(model_dir, &device)?;
        let bert = BertModel::load(vb.clone(), &config)?;
        let pooler = candle_nn::linear(hidden, hidden, vb.pp("bert.pooler.dense"))?;
        let classifier = candle_nn::linear(hidden, 1, vb.pp("classifier"))?;
        let model_id = format!(
            "cross-encoder:{}",
            model_dir
                .file_name()
                .map_or_else(|| "local".into(), |n| n.to_string_lossy())
        );
        info!(
            model = %model_id,
            elapsed_ms = started.elapsed().as_millis(),
            "rerank model loaded"
        );
        Ok(Self {
            bert,
            pooler,
            classifier,
            tokenizer,
            device,
            model_id,
        })
    }

    fn score_one(&self, query: &str, passage: &str) -> Result<f32> {
        let (input_ids, token_type_ids, attention_mask) =
            tokenize_pair_on_device(&self.tokenizer, query, passage, MAX_LEN, &self.device)?;
        let hidden = self
            .bert
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits: Tensor = self.classifier.forward(&pooled)?;
        let values: Vec<f32> = logits.to_device(&Device::Cpu)?.flatten_all()?.to_vec1()?;
        values
            .first()
            .copied()
            .ok_or_else(|| anyhow!("classifier produced no logit"))
    }
}

impl PairScorer for CrossEncoderScorer {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let started = Instant::now();
        let scores = passages
            .iter()
            .map(|p| self.score_one(query, p))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            pairs = passages.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "scored pairs"
        );
        Ok(scores)
    }
}
