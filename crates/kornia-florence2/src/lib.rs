//! # Kornia Florence-2
//!
//! Inference pipeline for the Florence-2 vision-language model exported as four ONNX graphs.
//!
//! An image and a task prompt go through:
//!
//! - **Preprocessing**: resize to 768x768 with Lanczos3 and ImageNet normalization
//! - **Vision encoder**: visual features from the pixel tensor
//! - **Text encoder**: task token resolution, tokenization and embedding
//! - **Fusion**: visual features followed by the prompt embeddings, with a joint mask
//! - **Encoder**: one pass over the fused sequence
//! - **Greedy decoding**: token by token until end-of-sequence or the length budget
//!
//! Detection, OCR and segmentation tasks emit `<loc_N>` tokens that [`parse_output`] turns
//! into boxes and polygons in the coordinates of the original image.

/// Pipeline configuration and model file layout.
pub mod config;

/// Greedy autoregressive decoding.
pub mod decoder;

/// Error type for the pipeline.
pub mod error;

/// Visual and text sequence fusion.
pub mod fusion;

/// Location token encoding and decoding.
pub mod location;

/// ONNX Runtime backed model ports.
pub mod onnx;

/// End-to-end orchestration.
pub mod pipeline;

/// Model port contracts.
pub mod ports;

/// Task output parsing.
pub mod postprocess;

/// Image preprocessing.
pub mod preprocess;

/// Task tokens and prompts.
pub mod task;

/// Dense tensors exchanged with the ports.
pub mod tensor;

/// Tokenizer adapter.
pub mod text;

pub use crate::config::{Florence2Config, ModelKind, SpecialTokens};
pub use crate::decoder::{DecodeState, GreedyDecoder};
pub use crate::error::Florence2Error;
pub use crate::location::{BoundingBox, ImageSize, Point, Region};
pub use crate::pipeline::{Florence2, Generation, InferenceBundle};
pub use crate::ports::{ModelPort, ModelPorts};
pub use crate::postprocess::{parse_output, Florence2Result};
pub use crate::preprocess::{load_image, ImagePreprocessor};
pub use crate::task::{resolve_task_prompt, Florence2Task};
pub use crate::text::TextEncoder;
