//! calibrate - derive the camera focal length for distance estimation
//!
//! Place an object of known width at a measured distance, then either pass
//! its apparent width in pixels or two snapshots (empty scene and scene with
//! the object). Prints a `[calibration]` section for the config file.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};

use motion_sentinel::{
    Calibration, DistanceEstimator, Frame, MotionDetector, MotionParams, DEFAULT_FRAME_HEIGHT,
    DEFAULT_FRAME_WIDTH,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Derive the focal length used for distance estimates")]
struct Args {
    /// Measured distance from the camera to the object, in meters.
    #[arg(long)]
    distance_m: f64,

    /// Real width of the object, in meters.
    #[arg(long, default_value_t = 0.2)]
    known_width_m: f64,

    /// Apparent width of the object, in pixels at 640x480.
    #[arg(long, conflicts_with_all = ["background", "object"])]
    perceived_width_px: Option<f64>,

    /// Snapshot of the empty scene.
    #[arg(long, requires = "object")]
    background: Option<PathBuf>,

    /// Snapshot of the same scene with the object in place.
    #[arg(long, requires = "background")]
    object: Option<PathBuf>,
}

#[derive(Serialize)]
struct CalibrationSection {
    calibration: Calibration,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let perceived_width_px = match (args.perceived_width_px, &args.background, &args.object) {
        (Some(width), _, _) => width,
        (None, Some(background), Some(object)) => measure_width(background, object)?,
        _ => {
            return Err(anyhow!(
                "pass either --perceived-width-px or both --background and --object"
            ))
        }
    };

    let focal_length_px = DistanceEstimator::focal_length_from_reference(
        args.distance_m,
        args.known_width_m,
        perceived_width_px,
    )?;
    log::info!(
        "object {:.3} m wide appears {:.1} px wide at {:.2} m",
        args.known_width_m,
        perceived_width_px,
        args.distance_m
    );

    let section = CalibrationSection {
        calibration: Calibration {
            known_width_m: args.known_width_m,
            focal_length_px,
        },
    };
    print!("{}", toml::to_string(&section)?);
    Ok(())
}

/// Width of the largest region that differs between the two snapshots.
fn measure_width(background: &Path, object: &Path) -> Result<f64> {
    let before = load_frame(background)?;
    let after = load_frame(object)?;
    let params = MotionParams::default();
    let result = MotionDetector::new(params).detect(&before, &after);
    let region = result
        .significant(params.min_area)
        .max_by(|a, b| a.area.total_cmp(&b.area))
        .ok_or_else(|| anyhow!("no object found between the two snapshots"))?;
    log::info!(
        "largest region {}x{} at ({}, {})",
        region.width,
        region.height,
        region.x,
        region.y
    );
    Ok(region.width as f64)
}

fn load_frame(path: &Path) -> Result<Frame> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Frame::decode_jpeg(&bytes)
        .with_context(|| format!("decode {}", path.display()))?
        .resized(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT))
}
