//! bvh2x3d - convert a BVH motion capture file to X3D H-Anim
//!
//! Writes `<base>.bvh.txt` (the parsed file written back as BVH) and `<base>.x3d`.

use anyhow::{bail, Context, Result};
use bvh_hanim::{is_fatal, parse_bytes, to_bvh_text, to_x3d_text, BvhError, ParseOptions, Severity, X3dOptions};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bvh2x3d")]
#[command(about = "Convert a BVH motion capture file to an X3D H-Anim humanoid")]
#[command(version)]
struct Args {
    /// Input .bvh file
    input: PathBuf,

    /// Output directory (defaults to the input file's directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Omit joint spheres, bone lines and site shapes
    #[arg(long)]
    no_ball_and_stick: bool,

    /// Omit viewpoints and site illustrations
    #[arg(long)]
    no_illustrations: bool,

    /// Add an HAnimSegment for every parent/child bone
    #[arg(long)]
    bone_segment_joints: bool,

    /// Omit the per-joint OFFSET/CHANNELS comments
    #[arg(long)]
    no_channel_comments: bool,

    /// Omit the trailing comment holding every motion frame
    #[arg(long)]
    no_frame_data: bool,

    /// Reproduce the legacy bounding box (a new maximum X lands in max Z)
    #[arg(long)]
    strict_bounding_box: bool,

    /// X3D version written into the document header
    #[arg(long, default_value = "3.3")]
    x3d_version: String,
}

impl Args {
    fn parse_options(&self) -> ParseOptions {
        ParseOptions::default().with_strict_bounding_box(self.strict_bounding_box)
    }

    fn x3d_options(&self) -> X3dOptions {
        X3dOptions::default()
            .with_ball_and_stick(!self.no_ball_and_stick)
            .with_illustrations(!self.no_illustrations)
            .with_bone_segment_joints(self.bone_segment_joints)
            .with_channel_comments(!self.no_channel_comments)
            .with_frame_data_comment(!self.no_frame_data)
            .with_x3d_version(self.x3d_version.clone())
    }
}

fn write_output(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|source| BvhError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let bytes = fs::read(&args.input).with_context(|| format!("Failed to read {}", args.input.display()))?;
    let (hierarchy, diagnostics) = parse_bytes(&bytes, &args.parse_options())
        .with_context(|| format!("Failed to parse {}", args.input.display()))?;

    for diagnostic in &diagnostics {
        match diagnostic.severity {
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Fatal => error!("{}", diagnostic),
        }
    }

    let base = args
        .input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .context("Input path has no file name")?
        .to_string();
    let output_dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => args.input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    if !output_dir.as_os_str().is_empty() {
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    }

    let x3d_name = format!("{}.x3d", base);
    write_output(&output_dir.join(format!("{}.bvh.txt", base)), &to_bvh_text(&hierarchy))?;
    write_output(
        &output_dir.join(&x3d_name),
        &to_x3d_text(&hierarchy, &x3d_name, &args.x3d_options()),
    )?;

    info!(
        joints = hierarchy.joints.len(),
        frames = hierarchy.motion.as_ref().map_or(0, |m| m.frame_count()),
        diagnostics = diagnostics.len(),
        "Converted {}",
        args.input.display()
    );

    if is_fatal(&diagnostics) {
        bail!("{} could not be fully parsed", args.input.display());
    }
    Ok(())
}
