use std::path::Path;

use image::DynamicImage;

use crate::config::Florence2Config;
use crate::decoder::{self, DecodeState};
use crate::error::Florence2Error;
use crate::fusion::fuse;
use crate::location::ImageSize;
use crate::ports::ModelPorts;
use crate::postprocess::{parse_output, Florence2Result};
use crate::preprocess::{load_image, ImagePreprocessor};
use crate::task::{resolve_task_prompt, Florence2Task};
use crate::tensor::Tensor;
use crate::text::TextEncoder;

/// Every intermediate tensor of one inference pass.
#[derive(Debug, Clone)]
pub struct InferenceBundle {
    /// Visual features `[1, S_v, H]`.
    pub image_features: Tensor<f32>,
    /// Prompt embeddings `[1, S_t, H]`.
    pub text_embeds: Tensor<f32>,
    /// Encoder output `[1, S_v + S_t, H]`.
    pub encoder_hidden_states: Tensor<f32>,
    /// Mask of the fused sequence `[1, S_v + S_t]`.
    pub encoder_attention_mask: Tensor<i64>,
    /// Decoder logits of the start token `[1, 1, V]`.
    pub logits: Tensor<f32>,
    /// Size of the image before preprocessing.
    pub image_size: ImageSize,
}

/// The result of greedy generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// The id history, decoder start token first.
    pub token_ids: Vec<u32>,
    /// The decoded text, special tokens removed.
    pub text: String,
    pub state: DecodeState,
}

/// The Florence-2 pipeline.
///
/// Holds the configuration, the model ports, the tokenizer and the image preprocessor. All of
/// them are created once and reused by every call; nothing from one call leaks into the next.
///
/// # Example
///
/// ```no_run
/// use kornia_florence2::{Florence2, Florence2Config};
///
/// let mut model = Florence2::load(Florence2Config::with_model_dir("models/florence2"))?;
/// let image = kornia_florence2::load_image("car.jpg")?;
/// let bundle = model.run_inference(&image, "<CAPTION>")?;
/// let generation = model.generate_text(&bundle, 50)?;
/// println!("{}", generation.text);
/// # Ok::<(), kornia_florence2::Florence2Error>(())
/// ```
#[derive(Debug)]
pub struct Florence2 {
    config: Florence2Config,
    ports: ModelPorts,
    text_encoder: TextEncoder,
    preprocessor: ImagePreprocessor,
}

impl Florence2 {
    /// Assemble a pipeline from already-built parts.
    pub fn new(
        config: Florence2Config,
        ports: ModelPorts,
        text_encoder: TextEncoder,
    ) -> Result<Self, Florence2Error> {
        config.validate()?;
        let preprocessor = ImagePreprocessor::from_config(&config);
        Ok(Self {
            config,
            ports,
            text_encoder,
            preprocessor,
        })
    }

    /// Load the ONNX models and the tokenizer named in the configuration.
    pub fn load(config: Florence2Config) -> Result<Self, Florence2Error> {
        config.validate()?;
        let ports = ModelPorts::from_config(&config)?;
        let text_encoder = TextEncoder::from_config(&config)?;
        Self::new(config, ports, text_encoder)
    }

    pub fn text_encoder(&self) -> &TextEncoder {
        &self.text_encoder
    }

    /// Run the vision, embedding, encoder and first decoder step for an image and a prompt.
    ///
    /// The prompt is either one of the input-free task tokens, which is translated into its
    /// instruction, or free text that is tokenized as is.
    pub fn run_inference(
        &mut self,
        image: &DynamicImage,
        prompt: &str,
    ) -> Result<InferenceBundle, Florence2Error> {
        let image_size = ImageSize::from(image);
        let pixel_values = self.preprocessor.process(image)?;
        let image_features = self.ports.vision(&pixel_values)?;

        let instruction = resolve_task_prompt(prompt);
        let encoded = self.text_encoder.encode(instruction)?;
        let text_embeds = self.ports.embed(&encoded.ids_tensor()?)?;

        let fused = fuse(&image_features, &text_embeds, &encoded.attention_mask)?;
        let encoder_hidden_states = self.ports.encode(&fused)?;

        // first decoder step over the start token alone
        let start = self.config.special_tokens.decoder_start as i64;
        let start_ids = Tensor::from_shape_vec(vec![1, 1], vec![start])?;
        let start_embeds = self.ports.embed(&start_ids)?;
        let logits = self.ports.decode(
            &start_embeds,
            &encoder_hidden_states,
            fused.attention_mask(),
        )?;

        log::debug!(
            "inference: {} visual + {} prompt positions, logits {:?}",
            image_features.shape()[1],
            encoded.len(),
            logits.shape()
        );

        Ok(InferenceBundle {
            image_features,
            text_embeds,
            encoder_hidden_states,
            encoder_attention_mask: fused.into_attention_mask(),
            logits,
            image_size,
        })
    }

    /// Same as [`Florence2::run_inference`] for an image on disk.
    pub fn run_inference_path(
        &mut self,
        image_path: impl AsRef<Path>,
        prompt: &str,
    ) -> Result<InferenceBundle, Florence2Error> {
        let image = load_image(image_path)?;
        self.run_inference(&image, prompt)
    }

    /// Greedily decode text from the encoder outputs of a bundle.
    ///
    /// The encoder is not run again; each iteration calls the embed and decoder ports once.
    pub fn generate_text(
        &mut self,
        bundle: &InferenceBundle,
        max_length: usize,
    ) -> Result<Generation, Florence2Error> {
        let output = decoder::generate(
            &mut self.ports,
            &bundle.encoder_hidden_states,
            &bundle.encoder_attention_mask,
            self.config.special_tokens,
            max_length,
        )?;

        let text = self.text_encoder.decode(&output.token_ids)?;
        log::debug!("generated {:?} ({:?})", text, output.state);

        Ok(Generation {
            token_ids: output.token_ids,
            text,
            state: output.state,
        })
    }

    /// Run a task end to end and parse its output.
    ///
    /// # Arguments
    ///
    /// * `image` - The input image.
    /// * `task` - The task to run.
    /// * `input` - Location tokens for region tasks, a phrase for text tasks, ignored otherwise.
    pub fn run_task(
        &mut self,
        image: &DynamicImage,
        task: Florence2Task,
        input: Option<&str>,
    ) -> Result<Florence2Result, Florence2Error> {
        let prompt = task.build_prompt(input)?;
        let bundle = self.run_inference(image, &prompt)?;
        let generation = self.generate_text(&bundle, self.config.max_length)?;
        let raw = self.text_encoder.decode_raw(&generation.token_ids)?;
        parse_output(task, &raw, bundle.image_size)
    }
}
