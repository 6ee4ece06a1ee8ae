use std::cell::RefCell;
use std::rc::Rc;

use image::{DynamicImage, Rgb, RgbImage};
use kornia_florence2::ports::{names, PortInputs, TensorView};
use kornia_florence2::tensor::{DynTensor, Tensor, TensorMap};
use kornia_florence2::{
    DecodeState, Florence2, Florence2Config, Florence2Error, Florence2Task, ModelPort, ModelPorts,
    TextEncoder,
};

const HIDDEN: usize = 8;
const VISUAL_LEN: usize = 4;
const VOCAB: usize = 26;
const EOS: u32 = 2;

const CAR: u32 = 11;
const A: u32 = 10;
const GREEN: u32 = 20;
const LOC_10: u32 = 13;
const LOC_20: u32 = 14;
const LOC_500: u32 = 15;
const LOC_999: u32 = 16;

fn f32_output(name: &str, tensor: Tensor<f32>) -> TensorMap {
    TensorMap::from([(name.to_string(), DynTensor::F32(tensor))])
}

fn f32_input<'a>(inputs: &'a PortInputs<'_>, name: &str) -> &'a Tensor<f32> {
    match inputs.get(name) {
        Some(TensorView::F32(t)) => t,
        other => panic!("expected f32 input `{name}`, got {other:?}"),
    }
}

fn i64_input<'a>(inputs: &'a PortInputs<'_>, name: &str) -> &'a Tensor<i64> {
    match inputs.get(name) {
        Some(TensorView::I64(t)) => t,
        other => panic!("expected i64 input `{name}`, got {other:?}"),
    }
}

/// Calls seen by the stub ports.
#[derive(Debug, Default)]
struct Calls {
    encoder: usize,
    decoder: usize,
    encoder_mask: Vec<i64>,
    decoder_lengths: Vec<usize>,
    pixel_range: Option<(f32, f32)>,
}

/// Records the value range of the pixels it receives.
struct StubVision {
    calls: Rc<RefCell<Calls>>,
}

impl ModelPort for StubVision {
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        let pixels = f32_input(inputs, names::PIXEL_VALUES);
        assert_eq!(pixels.shape(), &[1, 3, 768, 768]);

        let (min, max) = pixels
            .as_slice()
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        self.calls.borrow_mut().pixel_range = Some((min, max));

        Ok(f32_output(
            names::IMAGE_FEATURES,
            Tensor::from_shape_val(vec![1, VISUAL_LEN, HIDDEN], 0.25),
        ))
    }
}

/// Embeds every id as a vector filled with the id itself.
struct StubEmbed {
    hidden: usize,
}

impl ModelPort for StubEmbed {
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        let ids = i64_input(inputs, names::INPUT_IDS);
        let data = ids
            .as_slice()
            .iter()
            .flat_map(|&id| std::iter::repeat(id as f32).take(self.hidden))
            .collect::<Vec<_>>();
        let embeds = Tensor::from_shape_vec(vec![1, ids.shape()[1], self.hidden], data)?;
        Ok(f32_output(names::INPUTS_EMBEDS, embeds))
    }
}

/// Returns its input embeddings as the hidden state.
struct StubEncoder {
    calls: Rc<RefCell<Calls>>,
}

impl ModelPort for StubEncoder {
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        let embeds = f32_input(inputs, names::INPUTS_EMBEDS);
        let mask = i64_input(inputs, names::ATTENTION_MASK);

        let mut calls = self.calls.borrow_mut();
        calls.encoder += 1;
        calls.encoder_mask = mask.as_slice().to_vec();

        Ok(f32_output(names::LAST_HIDDEN_STATE, embeds.clone()))
    }
}

/// Emits `script[T - 1]` at the last of `T` positions, `eos` once the script runs out.
struct ScriptedDecoder {
    script: Vec<u32>,
    calls: Rc<RefCell<Calls>>,
}

impl ModelPort for ScriptedDecoder {
    fn run(&mut self, inputs: &PortInputs<'_>) -> Result<TensorMap, Florence2Error> {
        let embeds = f32_input(inputs, names::INPUTS_EMBEDS);
        let hidden = f32_input(inputs, names::ENCODER_HIDDEN_STATES);
        let mask = i64_input(inputs, names::ENCODER_ATTENTION_MASK);
        assert_eq!(mask.shape()[1], hidden.shape()[1]);

        let steps = embeds.shape()[1];
        let mut calls = self.calls.borrow_mut();
        calls.decoder += 1;
        calls.decoder_lengths.push(steps);

        let next = self.script.get(steps - 1).copied().unwrap_or(EOS) as usize;
        let mut data = vec![0.0f32; steps * VOCAB];
        data[(steps - 1) * VOCAB + next] = 1.0;
        Ok(f32_output(
            names::LOGITS,
            Tensor::from_shape_vec(vec![1, steps, VOCAB], data)?,
        ))
    }
}

fn text_encoder() -> Result<TextEncoder, Florence2Error> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/tokenizer.json");
    let config = Florence2Config::default();
    TextEncoder::from_file(path, config.special_tokens, config.max_prompt_tokens)
}

fn pipeline(script: Vec<u32>) -> Result<(Florence2, Rc<RefCell<Calls>>), Florence2Error> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let ports = ModelPorts::new(
        StubVision {
            calls: calls.clone(),
        },
        StubEmbed { hidden: HIDDEN },
        StubEncoder {
            calls: calls.clone(),
        },
        ScriptedDecoder {
            script,
            calls: calls.clone(),
        },
    );
    let model = Florence2::new(Florence2Config::default(), ports, text_encoder()?)?;
    Ok((model, calls))
}

fn test_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

#[test]
fn caption_stopping_on_first_step() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![EOS])?;
    let image = test_image(1024, 768);

    let bundle = model.run_inference(&image, "<CAPTION>")?;

    // ImageNet normalization of [0, 1] pixels spans about [-2.12, 2.64]
    let (min, max) = calls.borrow().pixel_range.expect("vision port was called");
    assert!((-2.2..-1.9).contains(&min), "min pixel {min}");
    assert!((2.2..2.7).contains(&max), "max pixel {max}");

    // "What does the image describe?" -> <s> what does the image describe ? </s>
    let text_len = 8;
    assert_eq!(bundle.image_features.shape(), &[1, VISUAL_LEN, HIDDEN]);
    assert_eq!(bundle.text_embeds.shape(), &[1, text_len, HIDDEN]);
    assert_eq!(
        bundle.encoder_hidden_states.shape(),
        &[1, VISUAL_LEN + text_len, HIDDEN]
    );
    assert_eq!(
        bundle.encoder_attention_mask.shape(),
        &[1, VISUAL_LEN + text_len]
    );
    assert!(bundle.encoder_attention_mask.as_slice().iter().all(|&m| m == 1));
    assert_eq!(bundle.logits.shape(), &[1, 1, VOCAB]);
    assert_eq!(bundle.image_size.width, 1024);
    assert_eq!(bundle.image_size.height, 768);

    let generation = model.generate_text(&bundle, 50)?;
    assert_eq!(generation.token_ids, vec![2, 2]);
    assert_eq!(generation.state, DecodeState::StoppedOnEos);
    assert_eq!(generation.text, "");
    Ok(())
}

#[test]
fn fused_sequence_puts_visual_features_first() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![EOS])?;
    let bundle = model.run_inference(&test_image(32, 32), "hello")?;

    // visual positions carry 0.25, prompt positions carry their token id
    let hidden = bundle.encoder_hidden_states.as_slice();
    assert!(hidden[..VISUAL_LEN * HIDDEN].iter().all(|&v| v == 0.25));
    let prompt_firsts = hidden[VISUAL_LEN * HIDDEN..]
        .chunks(HIDDEN)
        .map(|c| c[0])
        .collect::<Vec<_>>();
    assert_eq!(prompt_firsts, vec![0.0, 12.0, 2.0]);

    assert_eq!(calls.borrow().encoder_mask, vec![1; VISUAL_LEN + 3]);
    Ok(())
}

#[test]
fn stops_on_max_length() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![CAR; 10])?;
    let bundle = model.run_inference(&test_image(64, 48), "<CAPTION>")?;

    let generation = model.generate_text(&bundle, 3)?;
    assert_eq!(generation.state, DecodeState::StoppedOnMaxLength);
    assert_eq!(generation.token_ids, vec![2, CAR, CAR, CAR]);
    assert_eq!(generation.text, "car car car");

    // one step in run_inference plus exactly three generation steps
    assert_eq!(calls.borrow().decoder, 1 + 3);
    assert_eq!(calls.borrow().decoder_lengths[1..], [1, 2, 3]);
    Ok(())
}

#[test]
fn halts_when_eos_is_selected() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![A, GREEN, CAR, EOS])?;
    let bundle = model.run_inference(&test_image(64, 64), "<CAPTION>")?;
    let decoder_calls_before = calls.borrow().decoder;

    let generation = model.generate_text(&bundle, 50)?;
    assert_eq!(generation.state, DecodeState::StoppedOnEos);
    assert_eq!(generation.token_ids, vec![2, A, GREEN, CAR, EOS]);
    assert_eq!(generation.text, "a green car");
    assert_eq!(calls.borrow().decoder - decoder_calls_before, 4);
    Ok(())
}

#[test]
fn encoder_runs_once_per_generation() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![CAR; 20])?;
    let bundle = model.run_inference(&test_image(40, 30), "<OCR>")?;
    assert_eq!(calls.borrow().encoder, 1);

    model.generate_text(&bundle, 20)?;
    assert_eq!(calls.borrow().encoder, 1);

    // a second generation from the same bundle reuses the encoder output too
    model.generate_text(&bundle, 5)?;
    assert_eq!(calls.borrow().encoder, 1);
    Ok(())
}

#[test]
fn zero_max_length_skips_decoding() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![CAR])?;
    let bundle = model.run_inference(&test_image(16, 16), "<CAPTION>")?;
    let before = calls.borrow().decoder;

    let generation = model.generate_text(&bundle, 0)?;
    assert_eq!(generation.token_ids, vec![2]);
    assert_eq!(generation.state, DecodeState::StoppedOnMaxLength);
    assert_eq!(calls.borrow().decoder, before);
    Ok(())
}

#[test]
fn hidden_size_mismatch_is_a_contract_error() -> Result<(), Florence2Error> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let ports = ModelPorts::new(
        StubVision {
            calls: calls.clone(),
        },
        StubEmbed { hidden: HIDDEN + 1 },
        StubEncoder {
            calls: calls.clone(),
        },
        ScriptedDecoder {
            script: vec![],
            calls: calls.clone(),
        },
    );
    let mut model = Florence2::new(Florence2Config::default(), ports, text_encoder()?)?;

    let result = model.run_inference(&test_image(16, 16), "<CAPTION>");
    assert!(matches!(result, Err(Florence2Error::ShapeMismatch { .. })));
    assert_eq!(calls.borrow().encoder, 0);
    Ok(())
}

#[test]
fn object_detection_task_end_to_end() -> Result<(), Florence2Error> {
    let (mut model, _) = pipeline(vec![CAR, LOC_10, LOC_20, LOC_500, LOC_999, EOS])?;
    let image = test_image(1000, 500);

    let result = model.run_task(&image, Florence2Task::ObjectDetection, None)?;

    assert_eq!(result.text, "car <loc_10> <loc_20> <loc_500> <loc_999>");
    assert_eq!(result.boxes.len(), 1);
    let detection = &result.boxes[0];
    assert_eq!(detection.label, "car");
    approx::assert_relative_eq!(detection.bbox.x, 10.5);
    approx::assert_relative_eq!(detection.bbox.y, 10.25);
    approx::assert_relative_eq!(detection.bbox.w, 490.0);
    approx::assert_relative_eq!(detection.bbox.h, 489.5);
    Ok(())
}

#[test]
fn input_task_without_input_fails_before_inference() -> Result<(), Florence2Error> {
    let (mut model, calls) = pipeline(vec![])?;
    let result = model.run_task(&test_image(8, 8), Florence2Task::RegionToCategory, None);
    assert!(matches!(result, Err(Florence2Error::MissingTaskInput(_))));
    assert_eq!(calls.borrow().encoder, 0);
    Ok(())
}

#[test]
fn run_inference_path_reads_image() -> Result<(), Florence2Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("input.png");
    test_image(20, 10).save(&path)?;

    let (mut model, _) = pipeline(vec![EOS])?;
    let bundle = model.run_inference_path(&path, "<CAPTION>")?;
    assert_eq!(bundle.image_size.width, 20);
    assert_eq!(bundle.image_size.height, 10);

    let missing = model.run_inference_path(dir.path().join("missing.png"), "<CAPTION>");
    assert!(matches!(missing, Err(Florence2Error::IoError(_))));
    Ok(())
}
