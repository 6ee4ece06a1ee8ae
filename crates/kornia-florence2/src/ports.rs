//! The four model-execution ports and their tensor contracts.
//!
//! - vision: `pixel_values` `[1, 3, H, W]` -> `image_features` `[1, S_v, D]`
//! - embed: `input_ids` `[1, S]` -> `inputs_embeds` `[1, S, D]`
//! - encoder: `inputs_embeds`, `attention_mask` -> `last_hidden_state` `[1, S, D]`
//! - decoder: `inputs_embeds`, `encoder_hidden_states`, `encoder_attention_mask` -> `logits`
//!   `[1, T, V]`
//!
//! A port is anything implementing [`ModelPort`]; [`ModelPorts`] assembles the named inputs,
//! runs the port and checks the shape of what comes back.

use std::collections::BTreeMap;

use crate::error::Florence2Error;
use crate::fusion::FusedInput;
use crate::tensor::{take_f32, Tensor, TensorMap};

/// Input and output tensor names of the Florence-2 ONNX export.
pub mod names {
    pub const PIXEL_VALUES: &str = "pixel_values";
    pub const IMAGE_FEATURES: &str = "image_features";
    pub const INPUT_IDS: &str = "input_ids";
    pub const INPUTS_EMBEDS: &str = "inputs_embeds";
    pub const ATTENTION_MASK: &str = "attention_mask";
    pub const LAST_HIDDEN_STATE: &str = "last_hidden_state";
    pub const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";
    pub const ENCODER_ATTENTION_MASK: &str = "encoder_attention_mask";
    pub const LOGITS: &str = "logits";
}

/// A borrowed tensor handed to a port.
#[derive(Debug, Clone, Copy)]
pub enum TensorView<'a> {
    F32(&'a Tensor<f32>),
    I64(&'a Tensor<i64>),
}

impl TensorView<'_> {
    pub fn shape(&self) -> &[usize] {
        match self {
            TensorView::F32(t) => t.shape(),
            TensorView::I64(t) => t.shape(),
        }
    }
}

/// Named inputs of a single port call.
pub type PortInputs<'a> = BTreeMap<&'static str, TensorView<'a>>;

/// A side-effect-free numeric function over named tensors.
pub trait ModelPort {
    /// Run the port once.
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error>;
}

impl<F> ModelPort for F
where
    F: FnMut(&PortInputs<'_>) -> Result<TensorMap, Florence2Error>,
{
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        self(inputs)
    }
}

/// The vision, embedding, encoder and decoder ports of one model.
pub struct ModelPorts {
    vision: Box<dyn ModelPort>,
    embed: Box<dyn ModelPort>,
    encoder: Box<dyn ModelPort>,
    decoder: Box<dyn ModelPort>,
}

impl ModelPorts {
    pub fn new(
        vision: impl ModelPort + 'static,
        embed: impl ModelPort + 'static,
        encoder: impl ModelPort + 'static,
        decoder: impl ModelPort + 'static,
    ) -> Self {
        Self {
            vision: Box::new(vision),
            embed: Box::new(embed),
            encoder: Box::new(encoder),
            decoder: Box::new(decoder),
        }
    }

    /// Extract visual features from a `[1, 3, H, W]` pixel tensor.
    pub fn vision(&mut self, pixel_values: &Tensor<f32>) -> Result<Tensor<f32>, Florence2Error> {
        let shape = pixel_values.shape();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 3 {
            return Err(Florence2Error::ShapeMismatch {
                name: names::PIXEL_VALUES.to_string(),
                expected: vec![1, 3, 0, 0],
                actual: shape.to_vec(),
            });
        }

        let inputs = PortInputs::from([(names::PIXEL_VALUES, TensorView::F32(pixel_values))]);
        let mut outputs = self.vision.run(&inputs)?;
        let features = take_f32(&mut outputs, "vision", names::IMAGE_FEATURES)?;
        log_extra_outputs("vision", &outputs);

        check_rank3(names::IMAGE_FEATURES, &features, None, None)?;
        log::debug!("vision features: {:?}", features.shape());
        Ok(features)
    }

    /// Look up the embeddings of a `[1, S]` token-id tensor.
    pub fn embed(&mut self, input_ids: &Tensor<i64>) -> Result<Tensor<f32>, Florence2Error> {
        let shape = input_ids.shape();
        if shape.len() != 2 || shape[0] != 1 {
            return Err(Florence2Error::ShapeMismatch {
                name: names::INPUT_IDS.to_string(),
                expected: vec![1, 0],
                actual: shape.to_vec(),
            });
        }

        let inputs = PortInputs::from([(names::INPUT_IDS, TensorView::I64(input_ids))]);
        let mut outputs = self.embed.run(&inputs)?;
        let embeds = take_f32(&mut outputs, "embed", names::INPUTS_EMBEDS)?;
        log_extra_outputs("embed", &outputs);

        check_rank3(names::INPUTS_EMBEDS, &embeds, Some(shape[1]), None)?;
        Ok(embeds)
    }

    /// Run the cross-modal encoder over the fused sequence.
    pub fn encode(&mut self, fused: &FusedInput) -> Result<Tensor<f32>, Florence2Error> {
        let seq_len = fused.seq_len();
        let hidden = fused.hidden_size();

        let inputs = PortInputs::from([
            (names::INPUTS_EMBEDS, TensorView::F32(fused.embeds())),
            (names::ATTENTION_MASK, TensorView::I64(fused.attention_mask())),
        ]);
        let mut outputs = self.encoder.run(&inputs)?;
        let hidden_state = take_f32(&mut outputs, "encoder", names::LAST_HIDDEN_STATE)?;
        log_extra_outputs("encoder", &outputs);

        check_rank3(
            names::LAST_HIDDEN_STATE,
            &hidden_state,
            Some(seq_len),
            Some(hidden),
        )?;
        log::debug!("encoder hidden state: {:?}", hidden_state.shape());
        Ok(hidden_state)
    }

    /// Run the decoder over the embeddings of the tokens generated so far.
    ///
    /// Returns logits with shape `[1, T, V]`.
    pub fn decode(
        &mut self,
        inputs_embeds: &Tensor<f32>,
        encoder_hidden_states: &Tensor<f32>,
        encoder_attention_mask: &Tensor<i64>,
    ) -> Result<Tensor<f32>, Florence2Error> {
        let encoder_len = encoder_hidden_states.shape().get(1).copied().unwrap_or(0);
        if encoder_attention_mask.shape() != [1, encoder_len] {
            return Err(Florence2Error::ShapeMismatch {
                name: names::ENCODER_ATTENTION_MASK.to_string(),
                expected: vec![1, encoder_len],
                actual: encoder_attention_mask.shape().to_vec(),
            });
        }

        let inputs = PortInputs::from([
            (names::INPUTS_EMBEDS, TensorView::F32(inputs_embeds)),
            (
                names::ENCODER_HIDDEN_STATES,
                TensorView::F32(encoder_hidden_states),
            ),
            (
                names::ENCODER_ATTENTION_MASK,
                TensorView::I64(encoder_attention_mask),
            ),
        ]);
        let mut outputs = self.decoder.run(&inputs)?;
        let logits = take_f32(&mut outputs, "decoder", names::LOGITS)?;
        log_extra_outputs("decoder", &outputs);

        let steps = inputs_embeds.shape().get(1).copied();
        check_rank3(names::LOGITS, &logits, steps, None)?;
        Ok(logits)
    }
}

impl std::fmt::Debug for ModelPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPorts").finish_non_exhaustive()
    }
}

fn log_extra_outputs(port: &str, outputs: &TensorMap) {
    if !outputs.is_empty() {
        log::debug!("port {port} returned unused outputs {:?}", outputs.keys());
    }
}

// checks [1, seq, dim] against the known sequence length and hidden size
fn check_rank3(
    name: &str,
    tensor: &Tensor<f32>,
    seq_len: Option<usize>,
    dim: Option<usize>,
) -> Result<(), Florence2Error> {
    let shape = tensor.shape();
    let ok = shape.len() == 3
        && shape[0] == 1
        && seq_len.map_or(true, |s| shape[1] == s)
        && dim.map_or(true, |d| shape[2] == d);

    if !ok {
        return Err(Florence2Error::ShapeMismatch {
            name: name.to_string(),
            expected: vec![1, seq_len.unwrap_or(0), dim.unwrap_or(0)],
            actual: shape.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DynTensor;

    fn output(name: &str, tensor: Tensor<f32>) -> TensorMap {
        TensorMap::from([(name.to_string(), DynTensor::F32(tensor))])
    }

    fn unused(_: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        unreachable!("port not used in this test")
    }

    fn vision(inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        let pixels = inputs.get(names::PIXEL_VALUES).map(|v| v.shape().to_vec());
        assert_eq!(pixels, Some(vec![1, 3, 4, 4]));
        Ok(output(
            names::IMAGE_FEATURES,
            Tensor::from_shape_val(vec![1, 5, 2], 0.5),
        ))
    }

    #[test]
    fn vision_passes_named_pixels() -> Result<(), Florence2Error> {
        let mut ports = ModelPorts::new(vision, unused, unused, unused);

        let features = ports.vision(&Tensor::from_shape_val(vec![1, 3, 4, 4], 0.0))?;
        assert_eq!(features.shape(), &[1, 5, 2]);
        Ok(())
    }

    #[test]
    fn vision_rejects_bad_pixels() {
        let mut ports = ModelPorts::new(unused, unused, unused, unused);
        let result = ports.vision(&Tensor::from_shape_val(vec![3, 4, 4], 0.0));
        assert!(matches!(result, Err(Florence2Error::ShapeMismatch { .. })));
    }

    // returns one position too many for a three token input
    fn embed_too_long(_: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        Ok(output(
            names::INPUTS_EMBEDS,
            Tensor::from_shape_val(vec![1, 4, 2], 0.0),
        ))
    }

    fn no_outputs(_: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        Ok(TensorMap::new())
    }

    #[test]
    fn embed_checks_sequence_length() {
        let mut ports = ModelPorts::new(unused, embed_too_long, unused, unused);
        let ids = Tensor::from_shape_val(vec![1, 3], 0i64);
        assert!(matches!(
            ports.embed(&ids),
            Err(Florence2Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn missing_output_is_reported() {
        let mut ports = ModelPorts::new(unused, unused, unused, no_outputs);
        let result = ports.decode(
            &Tensor::from_shape_val(vec![1, 1, 2], 0.0),
            &Tensor::from_shape_val(vec![1, 3, 2], 0.0),
            &Tensor::from_shape_val(vec![1, 3], 1),
        );
        assert!(matches!(
            result,
            Err(Florence2Error::MissingTensor { ref name, .. }) if name == names::LOGITS
        ));
    }

    #[test]
    fn decode_rejects_mask_of_wrong_length() {
        let mut ports = ModelPorts::new(unused, unused, unused, unused);
        let result = ports.decode(
            &Tensor::from_shape_val(vec![1, 1, 2], 0.0),
            &Tensor::from_shape_val(vec![1, 3, 2], 0.0),
            &Tensor::from_shape_val(vec![1, 2], 1),
        );
        assert!(matches!(result, Err(Florence2Error::ShapeMismatch { .. })));
    }
}
