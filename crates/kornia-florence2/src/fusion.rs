use crate::error::Florence2Error;
use crate::tensor::Tensor;

/// The joint input of the encoder: visual features followed by text embeddings.
///
/// Only built by [`fuse`], which guarantees an embedding of shape `[1, S, H]` and a mask of
/// shape `[1, S]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedInput {
    embeds: Tensor<f32>,
    attention_mask: Tensor<i64>,
}

impl FusedInput {
    /// Embeddings with shape `[1, S_v + S_t, H]`.
    pub fn embeds(&self) -> &Tensor<f32> {
        &self.embeds
    }

    /// Attention mask with shape `[1, S_v + S_t]`.
    pub fn attention_mask(&self) -> &Tensor<i64> {
        &self.attention_mask
    }

    pub fn into_attention_mask(self) -> Tensor<i64> {
        self.attention_mask
    }

    /// Length of the fused sequence.
    pub fn seq_len(&self) -> usize {
        self.attention_mask.shape()[1]
    }

    /// Size of the hidden axis.
    pub fn hidden_size(&self) -> usize {
        self.embeds.shape()[2]
    }
}

/// Concatenate visual features and text embeddings along the sequence axis.
///
/// The visual features always come first and are fully attended. The text mask is appended
/// after them in the same order.
///
/// # Arguments
///
/// * `image_features` - Visual features with shape `[1, S_v, H]`.
/// * `text_embeds` - Text embeddings with shape `[1, S_t, H]`.
/// * `text_mask` - Attention mask of the prompt, `S_t` entries.
pub fn fuse(
    image_features: &Tensor<f32>,
    text_embeds: &Tensor<f32>,
    text_mask: &[i64],
) -> Result<FusedInput, Florence2Error> {
    if image_features.rank() != 3 || image_features.shape()[0] != 1 {
        return Err(Florence2Error::ShapeMismatch {
            name: "image_features".to_string(),
            expected: vec![1, 0, 0],
            actual: image_features.shape().to_vec(),
        });
    }

    let text_len = text_embeds.shape().get(1).copied().unwrap_or(0);
    if text_mask.len() != text_len {
        return Err(Florence2Error::ShapeMismatch {
            name: "attention_mask".to_string(),
            expected: vec![1, text_len],
            actual: vec![1, text_mask.len()],
        });
    }

    let embeds = image_features.concat_axis1(text_embeds)?;

    let visual_len = image_features.shape()[1];
    let mut mask = Vec::with_capacity(visual_len + text_mask.len());
    mask.resize(visual_len, 1i64);
    mask.extend_from_slice(text_mask);
    let attention_mask = Tensor::from_shape_vec(vec![1, mask.len()], mask)?;

    log::debug!(
        "fused {} visual + {} text positions -> {:?}",
        visual_len,
        text_len,
        embeds.shape()
    );

    Ok(FusedInput {
        embeds,
        attention_mask,
    })
}
