use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Florence2Error;

/// Special token ids shared by the tokenizer and the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecialTokens {
    pub pad: u32,
    pub bos: u32,
    pub eos: u32,
    /// The id that seeds autoregressive generation.
    pub decoder_start: u32,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            pad: 1,
            bos: 0,
            eos: 2,
            decoder_start: 2,
        }
    }
}

/// The four model endpoints of the Florence-2 export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Vision,
    Embed,
    Encoder,
    Decoder,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Vision,
        ModelKind::Embed,
        ModelKind::Encoder,
        ModelKind::Decoder,
    ];

    /// A short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Vision => "vision",
            ModelKind::Embed => "embed",
            ModelKind::Encoder => "encoder",
            ModelKind::Decoder => "decoder",
        }
    }
}

/// Configuration for the Florence-2 pipeline.
///
/// Built once at startup and handed explicitly to the model loader and the orchestrator.
/// Any field missing from a JSON overlay keeps its default value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Florence2Config {
    /// Directory holding the ONNX files and the tokenizer.
    pub model_dir: PathBuf,
    pub vision_model_file: String,
    pub embed_model_file: String,
    pub encoder_model_file: String,
    pub decoder_model_file: String,
    pub tokenizer_file: String,
    /// Side of the square image fed to the vision encoder.
    pub image_size: u32,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub special_tokens: SpecialTokens,
    /// Prompts are truncated to this many tokens.
    pub max_prompt_tokens: usize,
    /// Default number of decoding iterations.
    pub max_length: usize,
    /// Intra-op threads for each ONNX Runtime session.
    pub num_threads: usize,
    /// Enable all ONNX Runtime graph optimizations.
    pub optimize_graph: bool,
}

impl Default for Florence2Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/florence2"),
            vision_model_file: "vision_encoder.onnx".to_string(),
            embed_model_file: "embed_tokens.onnx".to_string(),
            encoder_model_file: "encoder_model.onnx".to_string(),
            decoder_model_file: "decoder_model.onnx".to_string(),
            tokenizer_file: "tokenizer.json".to_string(),
            image_size: 768,
            image_mean: [0.485, 0.456, 0.406],
            image_std: [0.229, 0.224, 0.225],
            special_tokens: SpecialTokens::default(),
            max_prompt_tokens: 128,
            max_length: 50,
            num_threads: 4,
            optimize_graph: true,
        }
    }
}

impl Florence2Config {
    /// Default configuration rooted at `model_dir`.
    pub fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Default::default()
        }
    }

    /// Read a configuration overlay from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Florence2Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Florence2Error::AssetNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the ONNX file backing a model endpoint.
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        let file = match kind {
            ModelKind::Vision => &self.vision_model_file,
            ModelKind::Embed => &self.embed_model_file,
            ModelKind::Encoder => &self.encoder_model_file,
            ModelKind::Decoder => &self.decoder_model_file,
        };
        self.model_dir.join(file)
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.tokenizer_file)
    }

    /// Check that every model file and the tokenizer exist.
    pub fn check_assets(&self) -> Result<(), Florence2Error> {
        let paths = ModelKind::ALL
            .iter()
            .map(|kind| self.model_path(*kind))
            .chain(std::iter::once(self.tokenizer_path()));

        for path in paths {
            if !path.exists() {
                return Err(Florence2Error::AssetNotFound(path));
            }
        }
        Ok(())
    }

    /// Check that the numeric parameters are usable.
    pub fn validate(&self) -> Result<(), Florence2Error> {
        if self.image_size == 0 {
            return Err(Florence2Error::InvalidConfig(
                "image_size must be greater than zero".to_string(),
            ));
        }

        if self.image_std.iter().any(|s| *s <= 0.0) {
            return Err(Florence2Error::InvalidConfig(format!(
                "image_std must be positive, got {:?}",
                self.image_std
            )));
        }

        if self.max_prompt_tokens == 0 {
            return Err(Florence2Error::InvalidConfig(
                "max_prompt_tokens must be greater than zero".to_string(),
            ));
        }

        if self.num_threads == 0 {
            return Err(Florence2Error::InvalidConfig(
                "num_threads must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
