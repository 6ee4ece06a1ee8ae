//! Greedy autoregressive decoding.
//!
//! [`GreedyDecoder`] is a small state machine that only sees logits, so it can be driven by the
//! real decoder port or by hand in tests. [`generate`] wires it to the embed and decoder ports.

use crate::config::SpecialTokens;
use crate::error::Florence2Error;
use crate::ports::ModelPorts;
use crate::tensor::Tensor;

/// The state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// The history holds only the decoder start token.
    Start,
    Decoding,
    /// The model selected the end-of-sequence token.
    StoppedOnEos,
    /// The iteration budget ran out.
    StoppedOnMaxLength,
}

/// Index of the largest value, the lowest index winning ties.
///
/// NaN values never win. Returns `None` if there is no finite or infinite value to pick.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Greedy decoding over the logits of successive decoder calls.
#[derive(Debug, Clone)]
pub struct GreedyDecoder {
    token_ids: Vec<u32>,
    state: DecodeState,
    eos: u32,
    max_length: usize,
    steps: usize,
}

impl GreedyDecoder {
    /// Create a decoder whose history is seeded with `decoder_start`.
    ///
    /// # Arguments
    ///
    /// * `decoder_start` - The id every generation starts from.
    /// * `eos` - The id that ends generation.
    /// * `max_length` - Maximum number of decoding iterations.
    pub fn new(decoder_start: u32, eos: u32, max_length: usize) -> Self {
        Self {
            token_ids: vec![decoder_start],
            state: DecodeState::Start,
            eos,
            max_length,
            steps: 0,
        }
    }

    pub fn from_special_tokens(special_tokens: SpecialTokens, max_length: usize) -> Self {
        Self::new(special_tokens.decoder_start, special_tokens.eos, max_length)
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// The id history, starting with the decoder start token.
    pub fn token_ids(&self) -> &[u32] {
        &self.token_ids
    }

    /// Number of decoder calls consumed so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn into_token_ids(self) -> Vec<u32> {
        self.token_ids
    }

    /// Leave [`DecodeState::Start`].
    ///
    /// With a zero budget the decoder stops right away without any decoder call.
    pub fn begin(&mut self) {
        if self.state != DecodeState::Start {
            return;
        }
        self.state = if self.max_length == 0 {
            DecodeState::StoppedOnMaxLength
        } else {
            DecodeState::Decoding
        };
    }

    /// Consume the logits of one decoder call.
    ///
    /// The logits have shape `[1, T, V]`; only the last position is read. The selected id is
    /// appended to the history. Selecting `eos` moves to [`DecodeState::StoppedOnEos`], spending
    /// the last allowed iteration moves to [`DecodeState::StoppedOnMaxLength`].
    pub fn advance(&mut self, logits: &Tensor<f32>) -> Result<DecodeState, Florence2Error> {
        self.begin();
        if self.state != DecodeState::Decoding {
            return Ok(self.state);
        }

        let vocab = match logits.shape() {
            [_, _, vocab] => *vocab,
            shape => {
                return Err(Florence2Error::ShapeMismatch {
                    name: "logits".to_string(),
                    expected: vec![1, self.token_ids.len(), 0],
                    actual: shape.to_vec(),
                })
            }
        };
        if vocab == 0 || logits.numel() == 0 {
            return Err(Florence2Error::EmptyLogits);
        }

        let data = logits.as_slice();
        let last = &data[data.len() - vocab..];
        let next = argmax(last).ok_or(Florence2Error::EmptyLogits)? as u32;

        self.steps += 1;
        self.token_ids.push(next);

        if next == self.eos {
            self.state = DecodeState::StoppedOnEos;
        } else if self.steps >= self.max_length {
            self.state = DecodeState::StoppedOnMaxLength;
        }

        log::debug!("step {}: token {next} -> {:?}", self.steps, self.state);
        Ok(self.state)
    }
}

/// Ids produced by a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOutput {
    /// The id history, decoder start token first and `eos` last when it was selected.
    pub token_ids: Vec<u32>,
    pub state: DecodeState,
    /// Number of decoder calls.
    pub steps: usize,
}

/// Run greedy decoding against fixed encoder outputs.
///
/// Each iteration embeds the whole history and runs the decoder over it; no key/value cache is
/// kept between iterations.
///
/// # Arguments
///
/// * `ports` - The model ports, only `embed` and `decoder` are used.
/// * `encoder_hidden_states` - Encoder output with shape `[1, S, H]`.
/// * `encoder_attention_mask` - Mask of the fused sequence with shape `[1, S]`.
/// * `special_tokens` - Provides the decoder start and eos ids.
/// * `max_length` - Maximum number of decoding iterations.
pub fn generate(
    ports: &mut ModelPorts,
    encoder_hidden_states: &Tensor<f32>,
    encoder_attention_mask: &Tensor<i64>,
    special_tokens: SpecialTokens,
    max_length: usize,
) -> Result<DecodeOutput, Florence2Error> {
    let mut decoder = GreedyDecoder::from_special_tokens(special_tokens, max_length);
    decoder.begin();

    while decoder.state() == DecodeState::Decoding {
        let ids = decoder
            .token_ids()
            .iter()
            .map(|&id| id as i64)
            .collect::<Vec<_>>();
        let ids = Tensor::from_shape_vec(vec![1, ids.len()], ids)?;

        let embeds = ports.embed(&ids)?;
        let logits = ports.decode(&embeds, encoder_hidden_states, encoder_attention_mask)?;
        decoder.advance(&logits)?;
    }

    log::debug!(
        "generation finished after {} steps: {:?}",
        decoder.steps(),
        decoder.state()
    );

    let state = decoder.state();
    let steps = decoder.steps();
    Ok(DecodeOutput {
        token_ids: decoder.into_token_ids(),
        state,
        steps,
    })
}
