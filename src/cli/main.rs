//! Background removal CLI
//!
//! Removes backgrounds from single files or whole directories, writing
//! `<stem>_no_bg.png` next to each input or into `--output`.

use super::config::{CliConfigBuilder, RunSettings};
use crate::backends::available_backends;
use crate::cache::{format_size, ModelCache};
use crate::download::ModelDownloader;
use crate::models::{find_known_model, known_models, ModelSource};
use crate::processor::BackgroundRemovalProcessor;
use crate::services::{ImageIOService, SUPPORTED_EXTENSIONS};
use crate::session::SharedSegmenter;
use crate::tracing_config::{spans, TracingConfig, TracingFormat};
use crate::types::RemovalOutcome;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Remove image backgrounds with a locally run segmentation model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "convertall-bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(
        value_name = "INPUT",
        required_unless_present_any = ["list_models", "download_model", "clear_cache", "show_cache_dir", "show_providers"]
    )]
    pub input: Vec<String>,

    /// Output file (single input) or directory (several inputs)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Flatten onto this color instead of keeping transparency ("R,G,B" or "#RRGGBB")
    #[arg(short = 'b', long, value_name = "COLOR")]
    pub background_color: Option<String>,

    /// Cached model name or path to an .onnx file [default: silueta]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Download the selected model into the cache (exits when no inputs are given)
    #[arg(long)]
    pub download_model: bool,

    /// Inference engine
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,

    /// ONNX execution provider: auto, cpu, cuda, coreml
    #[arg(short, long, default_value = "auto")]
    pub execution_provider: String,

    /// Inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Longest edge of the copy the model sees
    #[arg(long, value_name = "PIXELS")]
    pub max_edge: Option<u32>,

    /// Byte budget of the model input before compression engages
    #[arg(long, value_name = "BYTES")]
    pub size_budget: Option<usize>,

    /// Output PNG compression: fast, default, best or 0-9
    #[arg(long, value_name = "LEVEL")]
    pub png_compression: Option<String>,

    /// Images processed concurrently
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Print outcomes as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Use a custom model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// List cached and downloadable models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Remove cached models (only `--model` if given) and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Print the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Show compiled backends and execution providers and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    Onnx,
    Tract,
}

pub async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _tracing_guard = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(if cli.json {
            TracingFormat::Compact
        } else {
            TracingFormat::Console
        })
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
        .context("Failed to initialize tracing")?;

    let cache = match &cli.cache_dir {
        Some(dir) => ModelCache::with_dir(dir),
        None => ModelCache::new(),
    }
    .context("Failed to open model cache")?;

    if cli.show_providers {
        show_providers();
        return Ok(ExitCode::SUCCESS);
    }
    if cli.show_cache_dir {
        println!("{}", cache.cache_dir().display());
        return Ok(ExitCode::SUCCESS);
    }
    if cli.list_models {
        list_models(&cache)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.clear_cache {
        clear_cache(&cache, cli.model.as_deref())?;
        return Ok(ExitCode::SUCCESS);
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid arguments")?;
    let settings = CliConfigBuilder::from_cli(&cli)?;

    if cli.download_model || needs_download(&settings.model.source, &cache) {
        download_model(&settings.model.source, &cache, !cli.json).await?;
    }
    if cli.input.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let jobs = collect_jobs(&cli)?;
    if jobs.is_empty() {
        anyhow::bail!("No supported images found in {}", cli.input.join(", "));
    }

    let outcomes = run_jobs(&cli, settings, cache, jobs).await?;
    report(&outcomes, cli.json)?;

    if outcomes.iter().all(|o| o.success) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Cached known models that are not on disk yet are fetched on first use
fn needs_download(source: &ModelSource, cache: &ModelCache) -> bool {
    match source {
        ModelSource::Cached(name) => find_known_model(name).is_some() && !cache.is_cached(name),
        ModelSource::External(_) => false,
    }
}

async fn download_model(source: &ModelSource, cache: &ModelCache, show_progress: bool) -> Result<()> {
    let ModelSource::Cached(name) = source else {
        anyhow::bail!("--download-model needs a model name, not a file path");
    };
    let downloader = ModelDownloader::new(cache.clone()).context("Failed to create model downloader")?;
    let path = downloader
        .ensure_model(name, show_progress)
        .instrument(spans::download(name, &cache.model_path(name)))
        .await
        .with_context(|| format!("Failed to download model '{name}'"))?;
    info!(model = %name, path = %path.display(), "Model available");
    Ok(())
}

/// Pair every input image with its output path
fn collect_jobs(cli: &Cli) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut inputs = Vec::new();
    for input in &cli.input {
        let path = PathBuf::from(input);
        if path.is_dir() {
            inputs.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            if !ImageIOService::is_supported_format(&path) {
                warn!(input = %path.display(), "Unrecognized extension, trying anyway");
            }
            inputs.push(path);
        }
    }

    let single_file = inputs.len() == 1
        && cli.input.len() == 1
        && cli.input.first().is_some_and(|input| !Path::new(input).is_dir());
    let jobs = inputs
        .into_iter()
        .map(|input| {
            let output = match &cli.output {
                Some(output) if single_file && !output.is_dir() => output.clone(),
                Some(dir) => ImageIOService::output_path_for(&input, dir),
                None => {
                    let dir = input.parent().map(Path::to_path_buf).unwrap_or_default();
                    ImageIOService::output_path_for(&input, dir)
                },
            };
            (input, output)
        })
        .collect();
    Ok(jobs)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && ImageIOService::is_supported_format(path)
            && !is_own_output(path)
            && matches_pattern(path, pattern)
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Skip results of an earlier run in the same directory
fn is_own_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.ends_with(crate::services::OUTPUT_SUFFIX))
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| glob::Pattern::new(pattern).is_ok_and(|p| p.matches(name)))
}

async fn run_jobs(
    cli: &Cli,
    settings: RunSettings,
    cache: ModelCache,
    jobs: Vec<(PathBuf, PathBuf)>,
) -> Result<Vec<RemovalOutcome>> {
    let model_name = settings.model.source.display_name();
    let backend = settings.model.backend.to_string();
    let session = spans::session(&uuid::Uuid::new_v4().to_string(), &model_name, &backend);

    let segmenter = SharedSegmenter::from_model_config(settings.model.clone(), cache);
    let loader = segmenter.clone();
    let load_span = spans::model_loading(&model_name, &backend);
    tokio::task::spawn_blocking(move || load_span.in_scope(|| loader.get_or_init()))
        .await
        .context("Model loading task panicked")?
        .context("Failed to load segmentation model")?;

    let processor = BackgroundRemovalProcessor::new(settings.pipeline, segmenter)?;
    let background = settings.background;

    let progress = if cli.json || jobs.len() < 2 {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(jobs.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        bar
    };

    let batch_start = Instant::now();
    debug!(count = jobs.len(), jobs = cli.jobs, "Starting batch");
    let outcomes: Vec<RemovalOutcome> = stream::iter(jobs)
        .map(|(input, output)| {
            let processor = &processor;
            let progress = &progress;
            async move {
                let filename = input
                    .file_name()
                    .map_or_else(|| input.display().to_string(), |n| n.to_string_lossy().into_owned());
                let outcome = processor
                    .remove_background_async(input, output, background)
                    .await
                    .with_filename(filename.clone());
                progress.set_message(filename);
                progress.inc(1);
                outcome
            }
        })
        .buffered(cli.jobs.max(1))
        .collect()
        .instrument(session)
        .await;
    progress.finish_and_clear();

    let failed = outcomes.iter().filter(|o| !o.success).count();
    info!(
        processed = outcomes.len(),
        failed,
        elapsed_ms = batch_start.elapsed().as_millis() as u64,
        "Batch complete"
    );
    Ok(outcomes)
}

fn report(outcomes: &[RemovalOutcome], json: bool) -> Result<()> {
    if json {
        let rendered = match outcomes {
            [single] => serde_json::to_string_pretty(single),
            many => serde_json::to_string_pretty(many),
        }
        .context("Failed to serialize outcomes")?;
        println!("{rendered}");
        return Ok(());
    }

    for outcome in outcomes {
        let name = outcome.filename.as_deref().unwrap_or("<input>");
        if outcome.success {
            println!(
                "✅ {name} -> {} ({} -> {})",
                outcome
                    .output_path
                    .as_deref()
                    .map_or_else(String::new, |p| p.display().to_string()),
                format_size(outcome.input_size.unwrap_or(0)),
                format_size(outcome.output_size.unwrap_or(0))
            );
        } else {
            let stage = outcome
                .failed_stage
                .map_or_else(String::new, |s| format!(" during {s}"));
            eprintln!(
                "❌ {name}: failed{stage}: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

fn list_models(cache: &ModelCache) -> Result<()> {
    let cached = cache.list().context("Failed to list cached models")?;

    println!("📦 Cached models in {}", cache.cache_dir().display());
    if cached.is_empty() {
        println!("   (none)");
    }
    for model in &cached {
        println!("   • {} ({})", model.name, format_size(model.size_bytes));
    }

    println!("\n🌐 Downloadable models:");
    for model in known_models() {
        let status = if cache.is_cached(model.name) {
            "cached"
        } else {
            "not downloaded"
        };
        println!(
            "   • {} [{status}] input {}x{}",
            model.name, model.preprocessing.target_size[1], model.preprocessing.target_size[0]
        );
    }
    Ok(())
}

fn clear_cache(cache: &ModelCache, model: Option<&str>) -> Result<()> {
    match model {
        Some(name) => {
            if cache.clear(name).with_context(|| format!("Failed to remove '{name}'"))? {
                println!("🗑️  Removed {name}");
            } else {
                println!("⚠️  Model '{name}' not found in {}", cache.cache_dir().display());
            }
        },
        None => {
            let removed = cache.clear_all().context("Failed to clear cache")?;
            println!("🗑️  Removed {} model(s) from {}", removed.len(), cache.cache_dir().display());
        },
    }
    Ok(())
}

fn show_providers() {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("💻 {cores} CPU cores");

    println!("\n🔧 Backends compiled in:");
    for backend in available_backends() {
        println!("   • {backend}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 ONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "✅" } else { "❌" };
            println!("   {status} {name}: {description}");
        }
    }

    println!("\n🖼️  Accepted inputs: {}", SUPPORTED_EXTENSIONS.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("convertall-bgremove").chain(args.iter().copied())).unwrap()
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_single_file_output() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("cat.jpg");
        touch(&input);
        let out = temp.path().join("result.png");

        let jobs = collect_jobs(&cli(&[input.to_str().unwrap(), "-o", out.to_str().unwrap()])).unwrap();
        assert_eq!(jobs, vec![(input.clone(), out)]);

        let jobs = collect_jobs(&cli(&[input.to_str().unwrap()])).unwrap();
        assert_eq!(jobs[0].1, temp.path().join("cat_no_bg.png"));
    }

    #[test]
    fn test_directory_discovery() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("b.png"));
        touch(&temp.path().join("a.jpg"));
        touch(&temp.path().join("a_no_bg.png"));
        touch(&temp.path().join("notes.txt"));
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        touch(&temp.path().join("nested/c.webp"));

        let flat = find_image_files(temp.path(), false, None).unwrap();
        let names: Vec<_> = flat.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, ["a.jpg", "b.png"]);

        let deep = find_image_files(temp.path(), true, None).unwrap();
        assert_eq!(deep.len(), 3);

        let only_png = find_image_files(temp.path(), true, Some("*.png")).unwrap();
        assert_eq!(only_png.len(), 1);
    }

    #[test]
    fn test_directory_output_naming() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("x.png"));
        let out = temp.path().join("out");

        let jobs = collect_jobs(&cli(&[temp.path().to_str().unwrap(), "-o", out.to_str().unwrap()])).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1, out.join("x_no_bg.png"));
    }

    #[test]
    fn test_needs_download() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path()).unwrap();

        assert!(needs_download(&ModelSource::Cached("silueta".into()), &cache));
        assert!(!needs_download(&ModelSource::Cached("custom".into()), &cache));
        assert!(!needs_download(&ModelSource::External("m.onnx".into()), &cache));

        std::fs::write(cache.model_path("silueta"), b"weights").unwrap();
        assert!(!needs_download(&ModelSource::Cached("silueta".into()), &cache));
    }
}
