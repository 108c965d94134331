use argh::FromArgs;
use std::path::PathBuf;

use kornia_io::functional as F;
use kornia_owl::{ModelKind, Owl, OwlConfig, parse_queries};

#[derive(FromArgs)]
/// OWL text query inference application arguments
struct Args {
    /// path to an input image
    #[argh(option)]
    image_path: PathBuf,

    /// comma separated text queries
    #[argh(option, default = "\"person\".to_string()")]
    queries: String,

    /// the model to use: owlv2 or owlvit
    #[argh(option, default = "ModelKind::OwlV2")]
    model: ModelKind,

    /// the confidence threshold for the model
    #[argh(option, default = "0.3")]
    score_threshold: f32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = argh::from_env();

    let rec = rerun::RecordingStreamBuilder::new("OWL Inference App").spawn()?;

    let config = OwlConfig {
        model: args.model,
        text_score_threshold: args.score_threshold,
        ..Default::default()
    };

    let model = Owl::new(config)?;

    // read the image as RGB8
    let image = F::read_image_any(args.image_path)?;
    let queries = parse_queries(&args.queries)?;

    // perform inference and get the detections
    let detections = model.detect_by_text(&image, &queries)?;
    println!("{}", detections.summary());

    rec.log(
        "image",
        &rerun::Image::from_elements(
            image.as_slice(),
            image.size().into(),
            rerun::ColorModel::RGB,
        ),
    )?;

    let mut boxes_mins = Vec::new();
    let mut boxes_sizes = Vec::new();
    let mut class_ids = Vec::new();
    let labels = detections.display_labels();
    for detection in &detections {
        let bbox = &detection.bbox;
        boxes_mins.push((bbox.xmin, bbox.ymin));
        boxes_sizes.push((bbox.xmax - bbox.xmin, bbox.ymax - bbox.ymin));
        class_ids.push(bbox.class as u16);
    }

    rec.log(
        "boxes",
        &rerun::Boxes2D::from_mins_and_sizes(boxes_mins, boxes_sizes)
            .with_class_ids(class_ids)
            .with_labels(labels),
    )?;

    Ok(())
}
