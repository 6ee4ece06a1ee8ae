use std::path::PathBuf;

/// Error type for the Florence-2 pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Florence2Error {
    /// A model or tokenizer file is missing from the model directory.
    #[error("Asset not found: {0}")]
    AssetNotFound(PathBuf),

    /// The configuration is not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be parsed.
    #[error(transparent)]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The input image could not be read or decoded.
    #[error("Failed to load image")]
    ImageLoad(#[from] image::ImageError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// ONNX Runtime failed to create a session or to run it.
    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    /// Tensor data does not match the declared shape.
    #[error("Data length ({0}) does not match the tensor shape ({1:?})")]
    InvalidTensorData(usize, Vec<usize>),

    /// A tensor handed to or returned by a model port violates its contract.
    #[error("Shape mismatch for `{name}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A tensor has the wrong element type.
    #[error("Tensor `{name}` has dtype {actual}, expected {expected}")]
    DTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A named tensor is missing from the inputs or outputs of a port.
    #[error("Port `{port}` is missing tensor `{name}`")]
    MissingTensor { port: String, name: String },

    /// The decoder returned an empty vocabulary axis.
    #[error("Empty logits")]
    EmptyLogits,

    /// Location tokens could not be parsed into coordinates.
    #[error("Invalid location tokens: {0}")]
    InvalidLocationTokens(String),

    /// The task needs an input that was not provided.
    #[error("Task {0} requires an input")]
    MissingTaskInput(&'static str),
}

impl Florence2Error {
    pub(crate) fn ort(err: impl std::fmt::Display) -> Self {
        Self::Ort(err.to_string())
    }

    pub(crate) fn tokenizer(err: impl std::fmt::Display) -> Self {
        Self::Tokenizer(err.to_string())
    }
}
