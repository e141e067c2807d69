use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Encode one text into `[1, max_len]` id and mask tensors, padded with `pad_id`.
pub fn tokenize_on_device(
    tokenizer: &Tokenizer,
    text: &str,
    max_len: usize,
    pad_id: u32,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let enc = tokenizer
        .encode(text, true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let mut ids = enc.get_ids().to_vec();
    let mut mask = enc.get_attention_mask().to_vec();
    ids.truncate(max_len);
    mask.truncate(max_len);
    if ids.len() < max_len {
        let pad = max_len - ids.len();
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(0).take(pad));
    }
    let input_ids = Tensor::from_iter(ids, device)?.reshape((1, max_len))?;
    let attention_mask = Tensor::from_iter(mask, device)?.reshape((1, max_len))?;
    Ok((input_ids, attention_mask))
}

/// Encode a `(query, passage)` pair for a cross-encoder.
///
/// Returns `(input_ids, token_type_ids, attention_mask)`, each `[1, len]`
/// with `len <= max_len`. No padding: pairs are scored one at a time.
pub fn tokenize_pair_on_device(
    tokenizer: &Tokenizer,
    query: &str,
    passage: &str,
    max_len: usize,
    device: &Device,
) -> Result<(Tensor, Tensor, Tensor)> {
    let enc = tokenizer
        .encode((query, passage), true)
        .map_err(|e| anyhow!("Pair tokenization failed: {}", e))?;
    let len = enc.get_ids().len().min(max_len);
    let ids = enc.get_ids()[..len].to_vec();
    let type_ids = enc.get_type_ids()[..len].to_vec();
    let mask = enc.get_attention_mask()[..len].to_vec();
    let input_ids = Tensor::from_iter(ids, device)?.reshape((1, len))?;
    let token_type_ids = Tensor::from_iter(type_ids, device)?.reshape((1, len))?;
    let attention_mask = Tensor::from_iter(mask, device)?.reshape((1, len))?;
    Ok((input_ids, token_type_ids, attention_mask))
}
