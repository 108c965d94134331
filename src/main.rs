use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use kornia_owl::{
    Annotator, CropRect, DetectionSet, LabelPlacement, ModelKind, Owl, OwlConfig, Prompt,
    QuerySpec, SelectionState, TaskKind, parse_queries, read_image, save_annotated,
};

#[derive(FromArgs)]
/// Open-vocabulary object detection with OWL-ViT and OWLv2.
/// Values not given as flags are asked for interactively.
struct Args {
    /// the model to use: owlv2 (1) or owlvit (2)
    #[argh(option)]
    model: Option<ModelKind>,

    /// the detection task: text (1) or image (2)
    #[argh(option)]
    task: Option<TaskKind>,

    /// image to search, for text queries
    #[argh(option)]
    image: Option<PathBuf>,

    /// comma separated text queries
    #[argh(option)]
    queries: Option<String>,

    /// image holding the exemplar object, for image queries
    #[argh(option)]
    reference: Option<PathBuf>,

    /// image to search, for image queries
    #[argh(option)]
    target: Option<PathBuf>,

    /// exemplar crop in the reference image as x,y,width,height
    #[argh(option)]
    crop: Option<String>,

    /// the confidence threshold for text queries
    #[argh(option, default = "0.3")]
    text_threshold: f32,

    /// the confidence threshold for image queries
    #[argh(option, default = "0.5")]
    image_threshold: f32,

    /// the nms threshold for image queries
    #[argh(option, default = "0.5")]
    nms_threshold: f32,

    /// optional per-query nms threshold for text queries
    #[argh(option)]
    text_nms_threshold: Option<f32>,

    /// directory receiving the annotated image
    #[argh(option, default = "PathBuf::from(\"results\")")]
    output_dir: PathBuf,

    /// do not draw labels next to the boxes
    #[argh(switch)]
    no_labels: bool,

    /// draw labels above the boxes instead of centered
    #[argh(switch)]
    label_above: bool,

    /// run on the GPU when available
    #[argh(switch)]
    use_cuda: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Args = argh::from_env();

    let stdin = std::io::stdin();
    let mut prompt = Prompt::new(stdin.lock(), std::io::stdout());

    let model = match args.model {
        Some(model) => model,
        None => prompt.choose_model()?,
    };
    let task = match args.task {
        Some(task) => task,
        None => prompt.choose_task()?,
    };

    let config = OwlConfig {
        model,
        text_score_threshold: args.text_threshold,
        image_score_threshold: args.image_threshold,
        nms_threshold: args.nms_threshold,
        text_nms_threshold: args.text_nms_threshold,
        use_cpu: !args.use_cuda,
    };

    tracing::info!("loading {model}");
    let owl = Owl::new(config).context("failed to load the detector")?;

    let (image, query) = match task {
        TaskKind::Text => text_task(&args, &mut prompt)?,
        TaskKind::Image => image_task(&args, &mut prompt)?,
    };

    let detections = match owl.detect(&image, &query) {
        Ok(detections) => detections,
        Err(err) if err.is_recoverable() => {
            prompt.say(format!("{err}"))?;
            DetectionSet::default()
        }
        Err(err) => return Err(err).context("detection failed"),
    };
    prompt.say(detections.summary())?;

    let placement = if args.label_above {
        LabelPlacement::Above
    } else {
        LabelPlacement::Centered
    };
    let annotated = Annotator::new()?
        .with_labels(!args.no_labels)
        .with_placement(placement)
        .annotate(&image, &detections)?;
    let path = save_annotated(&annotated, &args.output_dir)?;
    prompt.say(format!("Annotated image saved to {}", path.display()))?;

    Ok(())
}

type Input = kornia_image::Image<u8, 3>;

fn read_image_or_ask<R: BufRead, W: Write>(
    path: Option<&PathBuf>,
    question: &str,
    prompt: &mut Prompt<R, W>,
) -> Result<Input> {
    if let Some(path) = path {
        match read_image(path) {
            Ok(image) => return Ok(image),
            Err(err) => prompt.say(format!("{err}"))?,
        }
    }
    loop {
        let path = prompt.read_path(question)?;
        match read_image(&path) {
            Ok(image) => return Ok(image),
            Err(err) => prompt.say(format!("{err}"))?,
        }
    }
}

fn text_task<R: BufRead, W: Write>(
    args: &Args,
    prompt: &mut Prompt<R, W>,
) -> Result<(Input, QuerySpec)> {
    let image = read_image_or_ask(args.image.as_ref(), "Image path: ", prompt)?;
    let queries = match args.queries.as_deref().map(parse_queries) {
        Some(Ok(queries)) => queries,
        Some(Err(err)) => {
            prompt.say(format!("{err}"))?;
            prompt.read_queries()?
        }
        None => prompt.read_queries()?,
    };
    Ok((image, QuerySpec::Text(queries)))
}

fn image_task<R: BufRead, W: Write>(
    args: &Args,
    prompt: &mut Prompt<R, W>,
) -> Result<(Input, QuerySpec)> {
    let reference = read_image_or_ask(args.reference.as_ref(), "Reference image path: ", prompt)?;
    let mut selection = SelectionState::new(reference.width(), reference.height());
    let initial = args.crop.as_deref().map(CropRect::parse);
    let exemplar = prompt.crop_reference(&reference, initial, &mut selection)?;

    let target = read_image_or_ask(args.target.as_ref(), "Target image path: ", prompt)?;
    Ok((target, QuerySpec::Image(exemplar)))
}
