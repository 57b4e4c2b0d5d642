//! Translate CLI arguments into pipeline and model configuration

use crate::cli::main_impl::{Cli, CliBackend};
use crate::config::{BackendType, ExecutionProvider, ModelConfig, PipelineConfig, PngCompression};
use crate::models::{ModelSource, DEFAULT_MODEL};
use crate::types::BackgroundColor;
use anyhow::{Context, Result};

/// Everything a processing run needs, resolved from flags and environment
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) pipeline: PipelineConfig,
    pub(crate) model: ModelConfig,
    pub(crate) background: Option<BackgroundColor>,
}

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build settings from CLI arguments layered over `CONVERTALL_*` variables
    pub(crate) fn from_cli(cli: &Cli) -> Result<RunSettings> {
        let base = PipelineConfig::from_env().context("Invalid CONVERTALL_* environment")?;
        Self::from_cli_with_base(cli, base)
    }

    pub(crate) fn from_cli_with_base(cli: &Cli, base: PipelineConfig) -> Result<RunSettings> {
        let mut pipeline = base;
        if let Some(edge) = cli.max_edge {
            pipeline.inference_max_edge = edge;
        }
        if let Some(budget) = cli.size_budget {
            pipeline.size_budget_bytes = budget;
        }
        if let Some(level) = &cli.png_compression {
            pipeline.png_compression = level
                .parse::<PngCompression>()
                .context("Invalid --png-compression")?;
        }
        pipeline.validate().context("Invalid pipeline settings")?;

        let background = cli
            .background_color
            .as_deref()
            .map(str::parse::<BackgroundColor>)
            .transpose()
            .context("Invalid --background-color")?;

        let execution_provider = cli
            .execution_provider
            .parse::<ExecutionProvider>()
            .context("Invalid --execution-provider")?;

        let backend = match cli.backend {
            Some(CliBackend::Onnx) => BackendType::Onnx,
            Some(CliBackend::Tract) => BackendType::Tract,
            None => BackendType::default(),
        };
        if backend == BackendType::Tract && execution_provider != ExecutionProvider::Auto {
            log::warn!("Tract runs on CPU only; ignoring --execution-provider {execution_provider}");
        }

        let model = ModelConfig::default()
            .with_source(Self::model_source(cli))
            .with_backend(backend)
            .with_execution_provider(execution_provider)
            .with_threads(cli.threads);

        Ok(RunSettings {
            pipeline,
            model,
            background,
        })
    }

    pub(crate) fn model_source(cli: &Cli) -> ModelSource {
        cli.model
            .as_deref()
            .map_or_else(|| ModelSource::Cached(DEFAULT_MODEL.to_string()), ModelSource::parse)
    }

    /// Reject flag combinations that cannot work before doing any I/O
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.jobs == 0 {
            anyhow::bail!("--jobs must be at least 1");
        }
        if cli.pattern.is_some() && !cli.input.iter().any(|i| std::path::Path::new(i).is_dir()) {
            log::warn!("--pattern only applies to directory inputs");
        }
        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern).with_context(|| format!("Invalid --pattern '{pattern}'"))?;
        }
        Ok(())
    }
}
