use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceclass::{classify, config, decode, ArtifactStore};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "faceclass")]
#[command(
    version,
    about = "Classify faces with two visible eyes against a pre-trained model"
)]
struct Cli {
    /// Config file (defaults to ./faceclass.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the faces in one image
    Classify {
        /// Image file to read
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Base64 encoded image, optionally as a data URI
        #[arg(short, long)]
        base64: Option<String>,
        /// Text file holding a base64 encoded image
        #[arg(long)]
        base64_file: Option<PathBuf>,
    },
    /// Classify the base64 test image
    Smoke {
        /// Test image file (defaults to the configured test_image)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Print an image as a base64 PNG data URI
    Encode {
        image: PathBuf,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Classify {
            file,
            base64,
            base64_file,
        } => {
            let base64 = match (base64, base64_file) {
                (Some(_), Some(_)) => {
                    anyhow::bail!("use either --base64 or --base64-file, not both")
                }
                (Some(data), None) => Some(data),
                (None, Some(path)) => Some(
                    classify::get_b64_test_image(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                (None, None) => None,
            };
            run_classify(&cfg, base64, file)
        }
        Commands::Smoke { path } => {
            let path = path.unwrap_or_else(|| cfg.test_image.clone());
            let data = classify::get_b64_test_image(&path).context("Failed to read test image")?;
            run_classify(&cfg, Some(data), None)
        }
        Commands::Encode { image, output } => encode(&image, output.as_deref()),
        Commands::Config => open_config(&cfg, config_path.unwrap_or(&config::CONFIG_PATH)),
    }
}

fn run_classify(cfg: &config::Config, base64: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let store = ArtifactStore::new(cfg.artifacts.clone());
    info!(
        "Artifacts: {} + {}",
        store.paths().class_dictionary.display(),
        store.paths().model.display()
    );
    store.load().context("Failed to load saved artifacts")?;

    let pipeline = cfg
        .pipeline()
        .context("Failed to initialize face detection pipeline")?;

    let results =
        classify::classify(&store, &pipeline, base64, file).context("Failed to classify image")?;

    if results.is_empty() {
        warn!("No face with two visible eyes found");
    }
    for result in &results {
        info!("✓ {}", result.class);
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn encode(image: &Path, output: Option<&Path>) -> Result<()> {
    let img = decode::decode_image(&faceclass::ImageSource::Path(image.to_path_buf()))
        .with_context(|| format!("Failed to read {}", image.display()))?;
    let uri = decode::data_uri("image/png", &decode::encode_base64_png(&img)?);

    match output {
        Some(path) => {
            std::fs::write(path, uri).with_context(|| format!("writing {}", path.display()))?;
            info!("✓ Wrote {}", path.display());
        }
        None => println!("{}", uri),
    }
    Ok(())
}

fn open_config(cfg: &config::Config, config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        config::save_config(cfg, Some(config_path)).context("Failed to write default config")?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
