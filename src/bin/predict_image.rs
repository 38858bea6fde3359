//! predict_image - run the detection and freshness pipeline on one image

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use fruit_freshness::{DetectionMode, Frame, FreshdConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image file to analyse.
    image: PathBuf,
    /// Write the annotated image to this path.
    #[arg(long, value_name = "OUT")]
    annotate: Option<PathBuf>,
    /// Use the streaming detector thresholds instead of the one-shot ones.
    #[arg(long)]
    streaming: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = FreshdConfig::load()?;
    let pipeline = Pipeline::from_config(&config)?;

    let bytes = std::fs::read(&args.image)
        .map_err(|e| anyhow!("failed to read image {}: {}", args.image.display(), e))?;
    let mut frame = Frame::decode(&bytes)?;
    let mode = if args.streaming {
        DetectionMode::Streaming
    } else {
        DetectionMode::OneShot
    };
    let result = pipeline.predict(&frame, mode)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(out) = &args.annotate {
        pipeline.annotate(&mut frame, &result.predictions);
        frame
            .to_rgb_image()
            .save(out)
            .map_err(|e| anyhow!("failed to write {}: {}", out.display(), e))?;
        log::info!("annotated image written to {}", out.display());
    }
    Ok(())
}
