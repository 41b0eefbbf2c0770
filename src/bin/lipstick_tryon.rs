use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use rs_lipstick_pipeline::config::config::PipelineConfig;
use rs_lipstick_pipeline::modules::landmark_provider::StaticLandmarkProvider;
use rs_lipstick_pipeline::pipeline::lipstick::{parse_color_str, LipstickSpec};
use rs_lipstick_pipeline::utils::image::{read_image, write_image};
use rs_lipstick_pipeline::{LipstickError, LipstickPipeline, Texture};

/// Apply a virtual lipstick to the faces in an image.
#[derive(Debug, Parser)]
#[command(name = "lipstick-tryon", version, about)]
struct Cli {
    /// Input image
    image: PathBuf,

    /// Landmarks from the face model: JSON array of faces, each an array of {x, y} normalized points
    #[arg(long)]
    landmarks: PathBuf,

    /// Lipstick colour as R,G,B
    #[arg(long, default_value = "200,30,40")]
    color: String,

    #[arg(long, default_value = "matte")]
    texture: String,

    /// Opacity in [0, 1]; defaults per texture
    #[arg(long)]
    opacity: Option<f32>,

    /// Fixed seed for the texture grain
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum number of faces to render
    #[arg(long)]
    max_faces: Option<usize>,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "lipstick.png")]
    output: PathBuf,

    /// Print the sampled skin tone (HSV) of the best face
    #[arg(long)]
    skin_tone: bool,

    /// Also write the lip mask of the best face
    #[arg(long)]
    mask_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::new(),
    };
    if let Some(seed) = cli.seed {
        config.renderer.noise_seed = Some(seed);
    }
    if let Some(max_faces) = cli.max_faces {
        config.detector.max_num_faces = max_faces;
    }

    let texture: Texture = cli.texture.parse()?;
    let color = parse_color_str(&cli.color)?;
    let spec = LipstickSpec::new(texture, color, cli.opacity.unwrap_or_else(|| texture.default_opacity()))?;

    let raw = std::fs::read_to_string(&cli.landmarks)
        .with_context(|| format!("reading {}", cli.landmarks.display()))?;
    let provider = StaticLandmarkProvider::from_json(&raw)
        .with_context(|| format!("parsing {}", cli.landmarks.display()))?;

    let image_path = cli.image.to_string_lossy().into_owned();
    let image = read_image(&image_path)?;
    let mut pipeline = LipstickPipeline::new(Arc::new(provider), config)?;

    if cli.skin_tone {
        match pipeline.skin_tone(&image)? {
            Some([h, s, v]) => println!("skin tone (hsv): {h:.1} {s:.1} {v:.1}"),
            None => println!("skin tone: not sampled"),
        }
    }

    if let Some(mask_path) = &cli.mask_out {
        let masks = pipeline.lip_masks(&image)?;
        write_image(&mask_path.to_string_lossy(), &masks[0])?;
    }

    let rendered = match pipeline.render(&image, &spec) {
        Ok(rendered) => rendered,
        Err(e @ (LipstickError::NoFaceDetected | LipstickError::NoLipsDetected)) => {
            tracing::warn!(error = %e, "nothing to render");
            return Err(e.into())
        }
        Err(e) => return Err(e.into()),
    };
    write_image(&cli.output.to_string_lossy(), &rendered)?;
    tracing::info!(output = %cli.output.display(), "wrote result");
    Ok(())
}
