use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shotgen_contracts::api::{GenerateResponse, DEFAULT_SIZE_PARAM};
use shotgen_contracts::storage::StorageLayout;
use shotgen_engine::{
    DryrunProvider, GenerationConfig, ImageProvider, ModelsLabProvider, ProductShotPipeline,
    UploadedImage,
};

mod errors;
mod server;
mod telemetry;

use server::ServerOptions;

#[derive(Debug, Parser)]
#[command(name = "shotgen", version, about = "Product shot generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Run one generation from a local image file.
    Generate(GenerateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Modelslab,
    Dryrun,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, env = "SHOTGEN_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "SHOTGEN_PORT", default_value_t = 8000)]
    port: u16,
    /// Directory holding `uploads/` and `generated/`; served under `/static`.
    #[arg(long, env = "SHOTGEN_STORAGE_ROOT", default_value = ".")]
    storage_root: PathBuf,
    #[arg(
        long = "cors-origin",
        env = "SHOTGEN_CORS_ORIGINS",
        value_delimiter = ',',
        default_values_t = [
            "http://localhost:5173".to_string(),
            "http://127.0.0.1:5173".to_string(),
        ]
    )]
    cors_origins: Vec<String>,
    #[arg(long, env = "SHOTGEN_PROVIDER", value_enum, default_value_t = ProviderKind::Modelslab)]
    provider: ProviderKind,
    #[arg(long, env = "SHOTGEN_MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
    max_upload_bytes: usize,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = DEFAULT_SIZE_PARAM)]
    size: String,
    #[arg(long, env = "SHOTGEN_STORAGE_ROOT", default_value = ".")]
    storage_root: PathBuf,
    #[arg(long, env = "SHOTGEN_PROVIDER", value_enum, default_value_t = ProviderKind::Modelslab)]
    provider: ProviderKind,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("shotgen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    // A missing .env is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_telemetry()?;
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Generate(args) => run_generate(args),
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    tracing::debug!("{:?}", args);
    let pipeline = Arc::new(build_pipeline(&args.storage_root, args.provider)?);
    tracing::info!(
        provider = pipeline.provider_name(),
        storage_root = %args.storage_root.display(),
        "starting product shot API"
    );

    let options = ServerOptions {
        host: args.host,
        port: args.port,
        cors_origins: args.cors_origins,
        max_upload_bytes: args.max_upload_bytes,
    };
    // The blocking HTTP client is built above, outside of any async context.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(server::serve(pipeline, options))?;
    Ok(0)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let pipeline = build_pipeline(&args.storage_root, args.provider)?;
    let bytes =
        fs::read(&args.image).with_context(|| format!("failed reading {}", args.image.display()))?;
    let upload = UploadedImage {
        bytes,
        content_type: mime_for_path(&args.image).map(str::to_string),
        file_name: args
            .image
            .file_name()
            .map(|name| name.to_string_lossy().to_string()),
    };

    let shot = pipeline.handle(upload, &args.prompt, Some(args.size.as_str()))?;
    tracing::info!(
        original = %shot.original_path.display(),
        generated = %shot.generated_path.display(),
        "generation finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&GenerateResponse::ok(shot.image_url))?
    );
    Ok(0)
}

fn build_pipeline(storage_root: &Path, kind: ProviderKind) -> Result<ProductShotPipeline> {
    let layout = StorageLayout::new(storage_root);
    layout.ensure_dirs()?;
    Ok(ProductShotPipeline::new(layout, build_provider(kind)?))
}

fn build_provider(kind: ProviderKind) -> Result<Arc<dyn ImageProvider>> {
    match kind {
        ProviderKind::Modelslab => {
            let config = GenerationConfig::from_env()
                .context("ModelsLab provider needs an API key; use --provider dryrun to run offline")?;
            tracing::debug!(?config, "loaded generation config");
            Ok(Arc::new(ModelsLabProvider::new(config)?))
        }
        ProviderKind::Dryrun => Ok(Arc::new(DryrunProvider)),
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}
