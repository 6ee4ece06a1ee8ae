use argh::FromArgs;
use std::path::PathBuf;
use std::time::Instant;

use kornia_florence2::task::TaskOutput;
use kornia_florence2::{parse_output, Florence2, Florence2Config, Florence2Task};

#[derive(FromArgs)]
/// Run a Florence-2 task on an image with ONNX Runtime
struct Args {
    /// path to an input image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// directory with the ONNX models and tokenizer.json
    #[argh(option, short = 'm')]
    model_dir: Option<PathBuf>,

    /// a task token such as <OD>, or a free-form question
    #[argh(option, short = 'p', default = "String::from(\"<CAPTION>\")")]
    prompt: String,

    /// region tokens or phrase for tasks that take an input
    #[argh(option)]
    task_input: Option<String>,

    /// maximum number of generated tokens
    #[argh(option, default = "50")]
    max_length: usize,

    /// path to the ORT dylib
    #[argh(option)]
    ort_dylib_path: Option<PathBuf>,

    /// optional JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    if let Some(ort_dylib_path) = &args.ort_dylib_path {
        // required by ORT dynamic loader
        std::env::set_var("ORT_DYLIB_PATH", ort_dylib_path);
    }

    let mut config = match &args.config {
        Some(path) => Florence2Config::from_json_file(path)?,
        None => Florence2Config::default(),
    };
    if let Some(model_dir) = args.model_dir {
        config.model_dir = model_dir;
    }
    config.max_length = args.max_length;

    let mut model = Florence2::load(config)?;
    let image = kornia_florence2::load_image(&args.image_path)?;

    let task = Florence2Task::from_token(&args.prompt);
    let prompt = match task {
        Some(task) => task.build_prompt(args.task_input.as_deref())?,
        None => args.prompt.clone(),
    };

    let now = Instant::now();
    let bundle = model.run_inference(&image, &prompt)?;
    let generation = model.generate_text(&bundle, args.max_length)?;
    log::info!("Generation took {:?}", now.elapsed());

    println!("Prompt: {}", args.prompt);
    println!("Text: {}", generation.text);
    println!("Token ids: {:?}", generation.token_ids);
    println!("Stopped: {:?}", generation.state);

    let Some(task) = task.filter(|t| t.output() != TaskOutput::Text) else {
        return Ok(());
    };

    let raw = model.text_encoder().decode_raw(&generation.token_ids)?;
    let result = parse_output(task, &raw, bundle.image_size)?;

    for b in &result.boxes {
        println!(
            "box `{}`: x={:.1} y={:.1} w={:.1} h={:.1}",
            b.label, b.bbox.x, b.bbox.y, b.bbox.w, b.bbox.h
        );
    }
    for q in &result.quad_boxes {
        let points = q.points.map(|p| (p.x.round(), p.y.round()));
        println!("quad `{}`: {:?}", q.label, points);
    }
    for p in &result.polygons {
        println!(
            "polygon `{}`: {} points",
            p.label.as_deref().unwrap_or(""),
            p.points.len()
        );
    }

    Ok(())
}
