use anyhow::{bail, Context, Result};
use autokyc_core::normalizer::normalize_primary;
use autokyc_core::{HistoryLookup, SessionView};
use autokyc_store::SqliteDatabase;
use autokyc_vision::{FaceDetector, FaceRecognizer, LocalFaceComparator, YoloDocumentDetector};
use autokycd::config::Config;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "autokyc", about = "AutoKYC onboarding verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a document photo with the local YOLO model
    Detect {
        /// Photo to classify
        image: PathBuf,
    },
    /// Compare the face on a document with a liveness capture
    Compare {
        /// Document front photo
        document: PathBuf,
        /// Liveness capture
        liveness: PathBuf,
    },
    /// Show the recorded steps and derived state of a session
    Session {
        /// Session id
        id: String,
    },
    /// Show daemon status
    Status {
        /// Daemon base URL (default: http://<AUTOKYC_LISTEN_ADDR>)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Detect { image } => detect(&config, &image),
        Commands::Compare { document, liveness } => compare(&config, &document, &liveness),
        Commands::Session { id } => session(&config, &id).await,
        Commands::Status { url } => status(&config, url).await,
    }
}

fn load_image(path: &Path) -> Result<image::RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    autokyc_vision::decode_image(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn detect(config: &Config, path: &Path) -> Result<()> {
    let image = load_image(path)?;
    let mut detector =
        YoloDocumentDetector::load(&config.document_model_path(), config.document_classes.clone())?;
    let raw = detector.detect(&image)?;

    match normalize_primary(&raw) {
        Ok(detection) => {
            println!("{}", serde_json::to_string_pretty(&detection)?);
            if raw.rows.len() > 1 {
                println!("({} further candidates)", raw.rows.len() - 1);
            }
            Ok(())
        }
        Err(err) => bail!("{}: {err}", path.display()),
    }
}

fn compare(config: &Config, document: &Path, liveness: &Path) -> Result<()> {
    let source = load_image(document)?;
    let target = load_image(liveness)?;
    let mut comparator = LocalFaceComparator::new(
        FaceDetector::load(&config.scrfd_model_path())?,
        FaceRecognizer::load(&config.arcface_model_path())?,
    )
    .with_match_threshold(config.face_match_threshold);
    let comparison = comparator.compare(&source, &target)?;
    println!("{}", serde_json::to_string_pretty(&comparison)?);

    let best = config.match_selection.select(&comparison.matches);
    match best {
        Some(m) if f64::from(m.similarity) >= config.similarity_threshold => {
            println!("match: {:.1}% (threshold {:.1}%)", m.similarity, config.similarity_threshold)
        }
        Some(m) => println!(
            "no match: {:.1}% below threshold {:.1}%",
            m.similarity, config.similarity_threshold
        ),
        None => println!("no comparable face found"),
    }
    Ok(())
}

async fn session(config: &Config, id: &str) -> Result<()> {
    if !config.db_path.exists() {
        bail!("no database at {}", config.db_path.display());
    }
    let db = SqliteDatabase::open(&config.db_path, 1, config.rules()).await?;
    let history = HistoryLookup::new(Arc::new(db)).load(id).await?;
    if history.is_empty() {
        bail!("no steps recorded for session {id}");
    }
    let view = SessionView::new(history);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn status(config: &Config, url: Option<String>) -> Result<()> {
    let base = url.unwrap_or_else(|| {
        format!("http://{}", config.listen_addr.replace("0.0.0.0", "127.0.0.1"))
    });
    let endpoint = format!("{}/health", base.trim_end_matches('/'));
    match reqwest::get(&endpoint).await {
        Ok(response) => {
            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(err) => {
            tracing::debug!(error = %err, endpoint, "health request failed");
            println!("autokycd: not reachable at {base}");
        }
    }
    Ok(())
}
