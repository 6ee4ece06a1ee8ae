use std::path::Path;

use tokenizers::{Tokenizer, TruncationParams};

use crate::config::{Florence2Config, SpecialTokens};
use crate::error::Florence2Error;
use crate::tensor::Tensor;

/// Token ids of a prompt and their attention mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPrompt {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl EncodedPrompt {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The ids as a `[1, S]` tensor.
    pub fn ids_tensor(&self) -> Result<Tensor<i64>, Florence2Error> {
        Tensor::from_shape_vec(vec![1, self.ids.len()], self.ids.clone())
    }
}

/// Tokenizer adapter turning prompts into ids and ids back into text.
pub struct TextEncoder {
    tokenizer: Tokenizer,
    special_tokens: SpecialTokens,
    max_length: usize,
}

impl TextEncoder {
    /// Wrap a tokenizer, truncating every encoded prompt to `max_length` tokens.
    pub fn new(
        mut tokenizer: Tokenizer,
        special_tokens: SpecialTokens,
        max_length: usize,
    ) -> Result<Self, Florence2Error> {
        // no padding: the sequence length is the real token count
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(Florence2Error::tokenizer)?;

        Ok(Self {
            tokenizer,
            special_tokens,
            max_length,
        })
    }

    /// Load a `tokenizer.json` file.
    pub fn from_file(
        path: impl AsRef<Path>,
        special_tokens: SpecialTokens,
        max_length: usize,
    ) -> Result<Self, Florence2Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Florence2Error::AssetNotFound(path.to_path_buf()));
        }

        log::info!("Loading tokenizer from {}", path.display());
        let tokenizer = Tokenizer::from_file(path).map_err(Florence2Error::tokenizer)?;
        Self::new(tokenizer, special_tokens, max_length)
    }

    pub fn from_config(config: &Florence2Config) -> Result<Self, Florence2Error> {
        Self::from_file(
            config.tokenizer_path(),
            config.special_tokens,
            config.max_prompt_tokens,
        )
    }

    /// Tokenize a prompt that was already resolved to its instruction.
    pub fn encode(&self, prompt: &str) -> Result<EncodedPrompt, Florence2Error> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Florence2Error::tokenizer)?;

        let ids = encoding
            .get_ids()
            .iter()
            .map(|&id| id as i64)
            .collect::<Vec<_>>();

        // positions holding the pad id are masked out
        let attention_mask = ids
            .iter()
            .zip(encoding.get_attention_mask())
            .map(|(&id, &m)| i64::from(m != 0 && id != self.special_tokens.pad as i64))
            .collect::<Vec<_>>();

        log::debug!("prompt {prompt:?} -> {} tokens", ids.len());

        Ok(EncodedPrompt {
            ids,
            attention_mask,
        })
    }

    /// Decode generated ids, dropping special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String, Florence2Error> {
        self.tokenizer
            .decode(ids, true)
            .map_err(Florence2Error::tokenizer)
    }

    /// Decode generated ids keeping added tokens such as `<loc_N>`.
    ///
    /// The sequence markers `<s>`, `</s>` and `<pad>` are still removed.
    pub fn decode_raw(&self, ids: &[u32]) -> Result<String, Florence2Error> {
        let special = self.special_tokens;
        let kept = ids
            .iter()
            .copied()
            .filter(|id| *id != special.pad && *id != special.bos && *id != special.eos)
            .collect::<Vec<_>>();
        let text = self
            .tokenizer
            .decode(&kept, false)
            .map_err(Florence2Error::tokenizer)?;
        Ok(text
            .replace("</s>", "")
            .replace("<s>", "")
            .replace("<pad>", ""))
    }
}

impl std::fmt::Debug for TextEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextEncoder")
            .field("special_tokens", &self.special_tokens)
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}
