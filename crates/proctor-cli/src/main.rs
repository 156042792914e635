use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use proctor_core::{BodyMode, DetectorConfig, Frame, Pipeline};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "proctor", about = "Proctor frame analysis CLI")]
struct Cli {
    /// Directory containing the ONNX models
    #[arg(long, global = true, env = "PROCTOR_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single image
    Analyze {
        /// Image file (JPEG, PNG, ...), or base64 text with --base64
        file: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Capability::Unified)]
        capability: Capability,
        /// Treat the file as a base64 payload (data URLs accepted)
        #[arg(long)]
        base64: bool,
        #[arg(long, value_enum, default_value_t = Mode::Simple)]
        body_mode: Mode,
        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },
    /// Show which models load and what the pipeline falls back to
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Capability {
    HeadPose,
    MultiPerson,
    BodyVisibility,
    Unified,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Simple,
    Positional,
}

impl From<Mode> for BodyMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Simple => BodyMode::Simple,
            Mode::Positional => BodyMode::Positional,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = DetectorConfig::default();
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    match cli.command {
        Commands::Analyze {
            file,
            capability,
            base64,
            body_mode,
            pretty,
        } => {
            config.body_mode = body_mode.into();
            let frame = load_frame(&file, base64)?;
            tracing::debug!(width = frame.width, height = frame.height, "frame loaded");

            let mut pipeline = Pipeline::load(&config);
            let value = match capability {
                Capability::HeadPose => serde_json::to_value(pipeline.head_pose(&frame))?,
                Capability::MultiPerson => serde_json::to_value(pipeline.multi_person(&frame))?,
                Capability::BodyVisibility => serde_json::to_value(pipeline.body_visibility(&frame))?,
                Capability::Unified => serde_json::to_value(pipeline.analyze(&frame))?,
            };
            print_json(&value, pretty)?;
        }
        Commands::Status => {
            let pipeline = Pipeline::load(&config);
            print_json(&serde_json::to_value(pipeline.status())?, true)?;
        }
    }

    Ok(())
}

fn load_frame(path: &Path, base64: bool) -> Result<Frame> {
    let frame = if base64 {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Frame::from_base64(text.trim())
    } else {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Frame::from_bytes(&bytes)
    };
    frame.with_context(|| format!("decoding {}", path.display()))
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
