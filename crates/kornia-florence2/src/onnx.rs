use std::borrow::Cow;
use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::TensorRef;

use crate::config::{Florence2Config, ModelKind};
use crate::error::Florence2Error;
use crate::ports::{names, ModelPort, ModelPorts, PortInputs, TensorView};
use crate::tensor::{DynTensor, Tensor, TensorMap};

/// A model port backed by an ONNX Runtime session.
///
/// Only the outputs the pipeline reads are extracted. The exported decoder also returns its
/// `present.*` key/value tensors, which are left inside the session outputs.
pub struct OnnxPort {
    name: &'static str,
    session: Session,
    output_names: Vec<String>,
}

/// The outputs read from each model.
pub fn required_outputs(kind: ModelKind) -> &'static [&'static str] {
    match kind {
        ModelKind::Vision => &[names::IMAGE_FEATURES],
        ModelKind::Embed => &[names::INPUTS_EMBEDS],
        ModelKind::Encoder => &[names::LAST_HIDDEN_STATE],
        ModelKind::Decoder => &[names::LOGITS],
    }
}

/// Pick the `required` names out of the outputs a session declares.
///
/// # Errors
///
/// Returns [`Florence2Error::MissingTensor`] if the session lacks one of them.
pub fn select_outputs(
    port: &str,
    available: &[String],
    required: &[&str],
) -> Result<Vec<String>, Florence2Error> {
    let selected = required
        .iter()
        .map(|&name| {
            available
                .iter()
                .find(|output| output.as_str() == name)
                .cloned()
                .ok_or_else(|| Florence2Error::MissingTensor {
                    port: port.to_string(),
                    name: name.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let skipped = available.len() - selected.len();
    if skipped > 0 {
        log::debug!("{port}: ignoring {skipped} unused outputs");
    }
    Ok(selected)
}

impl OnnxPort {
    /// Load an ONNX model from disk.
    ///
    /// # Arguments
    ///
    /// * `kind` - Which of the four models this is, selects the outputs to read.
    /// * `path` - Path to the `.onnx` file.
    /// * `num_threads` - Intra-op threads of the session.
    /// * `optimize` - Enable all graph optimizations.
    pub fn load(
        kind: ModelKind,
        path: impl AsRef<Path>,
        num_threads: usize,
        optimize: bool,
    ) -> Result<Self, Florence2Error> {
        let name = kind.name();
        let path = path.as_ref();
        if !path.exists() {
            return Err(Florence2Error::AssetNotFound(path.to_path_buf()));
        }

        let level = if optimize {
            GraphOptimizationLevel::Level3
        } else {
            GraphOptimizationLevel::Disable
        };

        log::info!("Loading {name} model from {}", path.display());
        let session = Session::builder()
            .map_err(Florence2Error::ort)?
            .with_optimization_level(level)
            .map_err(Florence2Error::ort)?
            .with_intra_threads(num_threads)
            .map_err(Florence2Error::ort)?
            .commit_from_file(path)
            .map_err(Florence2Error::ort)?;

        let input_names = session
            .inputs
            .iter()
            .map(|input| input.name.to_string())
            .collect::<Vec<_>>();
        let available = session
            .outputs
            .iter()
            .map(|output| output.name.to_string())
            .collect::<Vec<_>>();
        log::info!("  {name} inputs: {input_names:?}");
        log::info!("  {name} outputs: {available:?}");

        let output_names = select_outputs(name, &available, required_outputs(kind))?;

        Ok(Self {
            name,
            session,
            output_names,
        })
    }

}

impl ModelPort for OnnxPort {
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        let mut values: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for (&name, tensor) in inputs {
            // borrowed views, the data is not copied into the session
            let value: SessionInputValue<'_> = match tensor {
                TensorView::F32(t) => {
                    TensorRef::from_array_view((ort_shape(t.shape()), t.as_slice()))
                        .map_err(Florence2Error::ort)?
                        .into()
                }
                TensorView::I64(t) => {
                    TensorRef::from_array_view((ort_shape(t.shape()), t.as_slice()))
                        .map_err(Florence2Error::ort)?
                        .into()
                }
            };
            values.push((Cow::Borrowed(name), value));
        }

        let outputs = self.session.run(values).map_err(Florence2Error::ort)?;

        let mut result = TensorMap::new();
        for name in &self.output_names {
            let Some(value) = outputs.get(name.as_str()) else {
                return Err(Florence2Error::MissingTensor {
                    port: self.name.to_string(),
                    name: name.clone(),
                });
            };

            // the selected outputs are all float tensors
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(Florence2Error::ort)?;
            let shape = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
            let tensor = Tensor::from_shape_vec(shape, data.to_vec())?;
            result.insert(name.clone(), DynTensor::F32(tensor));
        }

        Ok(result)
    }
}

impl std::fmt::Debug for OnnxPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxPort")
            .field("name", &self.name)
            .field("output_names", &self.output_names)
            .finish_non_exhaustive()
    }
}

fn ort_shape(shape: &[usize]) -> Vec<i64> {
    shape.iter().map(|&d| d as i64).collect()
}

impl ModelPorts {
    /// Load the four ONNX sessions named in the configuration.
    ///
    /// Every asset is checked before the first session is created, so a missing decoder is
    /// reported without paying for the vision encoder load.
    pub fn from_config(config: &Florence2Config) -> Result<Self, Florence2Error> {
        config.check_assets()?;

        let load = |kind: ModelKind| {
            OnnxPort::load(
                kind,
                config.model_path(kind),
                config.num_threads,
                config.optimize_graph,
            )
        };

        Ok(ModelPorts::new(
            load(ModelKind::Vision)?,
            load(ModelKind::Embed)?,
            load(ModelKind::Encoder)?,
            load(ModelKind::Decoder)?,
        ))
    }
}
