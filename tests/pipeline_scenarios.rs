use anyhow::Result;
use tempfile::tempdir;

use fruit_freshness::classify::{ClassifierBackend, CropTensor};
use fruit_freshness::detect::StubDetectorBackend;
use fruit_freshness::ingest::{open_source, SourceConfig};
use fruit_freshness::pipeline::annotate::{FRESH_COLOUR, ROTTEN_COLOUR};
use fruit_freshness::pipeline::{run_stream, StreamController, StreamEnd};
use fruit_freshness::{
    BoundingBox, ChannelOrder, Detection, DetectionMode, Detector, Frame, FreshnessClassifier,
    FreshnessLabel, Pipeline,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 160;
const APPLE_BOX: (u32, u32, u32, u32) = (20, 30, 120, 130);
const BANANA_BOX: (u32, u32, u32, u32) = (180, 40, 300, 120);

/// Scores a crop by its mean red level: bright red reads as a fresh apple,
/// anything duller as a rotten banana.
struct MeanColourBackend;

impl ClassifierBackend for MeanColourBackend {
    fn name(&self) -> &'static str {
        "mean-colour"
    }

    fn logits(&mut self, input: &CropTensor) -> Result<Vec<f32>> {
        let mut logits = vec![0.0; FreshnessLabel::ALL.len()];
        let label = if input.channel_mean(0) > 1.0 {
            FreshnessLabel::AppleFresh
        } else {
            FreshnessLabel::BananaRotten
        };
        logits[label.index()] = 4.0;
        Ok(logits)
    }
}

fn inside(x: u32, y: u32, (x1, y1, x2, y2): (u32, u32, u32, u32)) -> bool {
    x >= x1 && x < x2 && y >= y1 && y < y2
}

/// Fresh red apple on the left, brown banana on the right, stored as BGR the
/// way camera frames arrive.
fn market_scene() -> Frame {
    let mut pixels = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let rgb = if inside(x, y, APPLE_BOX) {
                [220, 30, 30]
            } else if inside(x, y, BANANA_BOX) {
                [110, 80, 20]
            } else {
                [128, 128, 128]
            };
            pixels.extend_from_slice(&[rgb[2], rgb[1], rgb[0]]);
        }
    }
    Frame::new(pixels, WIDTH, HEIGHT, ChannelOrder::Bgr).expect("scene frame")
}

fn bbox((x1, y1, x2, y2): (u32, u32, u32, u32)) -> BoundingBox {
    BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
}

fn pipeline() -> Result<Pipeline> {
    let targets: Vec<String> = ["apple", "banana", "orange"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let detector = Detector::new(
        StubDetectorBackend::new(vec![
            Detection::new(bbox(APPLE_BOX), 47, "apple", 0.88),
            Detection::new(BoundingBox::new(0, 0, 60, 150), 0, "person", 0.95),
            Detection::new(bbox(BANANA_BOX), 46, "banana", 0.71),
        ]),
        &targets,
    )?;
    Ok(Pipeline::new(
        detector,
        FreshnessClassifier::new(MeanColourBackend),
    ))
}

#[test]
fn fresh_apple_and_rotten_banana_are_labelled() -> Result<()> {
    let pipeline = pipeline()?;
    let result = pipeline.predict(&market_scene(), DetectionMode::OneShot)?;

    assert_eq!(result.total_detections, 2);
    let labels: Vec<_> = result.predictions.iter().map(|r| r.label()).collect();
    assert_eq!(
        labels,
        vec![
            Some(FreshnessLabel::AppleFresh),
            Some(FreshnessLabel::BananaRotten)
        ]
    );
    for record in &result.predictions {
        assert!(!record.bbox().is_degenerate());
        let json = serde_json::to_value(record)?;
        assert!(json["confidence"].as_f64().unwrap_or(0.0) > 0.5);
    }
    assert_eq!(result.predictions[0].bbox(), bbox(APPLE_BOX));
    assert_eq!(result.predictions[1].detected_object(), "banana");
    Ok(())
}

#[test]
fn annotation_colours_boxes_by_freshness() -> Result<()> {
    let pipeline = pipeline()?;
    let mut frame = market_scene();
    let result = pipeline.predict(&frame, DetectionMode::Streaming)?;
    pipeline.annotate(&mut frame, &result.predictions);

    assert_eq!(frame.rgb_at(APPLE_BOX.0, 80), FRESH_COLOUR);
    assert_eq!(frame.rgb_at(BANANA_BOX.0, 80), ROTTEN_COLOUR);
    // Interior pixels are left alone.
    assert_eq!(frame.rgb_at(70, 80), [220, 30, 30]);
    Ok(())
}

#[test]
fn image_directory_streams_every_file_then_ends() -> Result<()> {
    let dir = tempdir()?;
    for name in ["a.jpg", "b.png"] {
        market_scene().to_rgb_image().save(dir.path().join(name))?;
    }
    std::fs::write(dir.path().join("notes.txt"), "not an image")?;

    let source = open_source(&SourceConfig {
        location: dir.path().to_string_lossy().to_string(),
        width: WIDTH,
        height: HEIGHT,
    })?;
    let controller = StreamController::new();
    let session = controller.start()?;
    let mut out = Vec::new();
    let pipeline = pipeline()?;
    let summary = run_stream(&pipeline, source, session, &mut out, 80);

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.end, StreamEnd::SourceExhausted);
    let parts = out.windows(7).filter(|w| *w == b"--frame").count();
    assert_eq!(parts, 2);
    Ok(())
}
