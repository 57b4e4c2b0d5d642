//! Background removal pipeline orchestration
//!
//! A run walks the states `Loaded → Normalized → DownscaledForInference →
//! (CompressedForInference) → Segmented → MaskUpscaled → Composited → Saved`.
//! Every stage owns the buffer it transforms and hands it on; intermediates
//! are dropped as soon as the next stage has consumed them. Any failure
//! aborts the run with the error tagged by the state that was not reached.

use crate::compositor::composite;
use crate::config::PipelineConfig;
use crate::error::{ConvertError, Result};
use crate::services::ImageIOService;
use crate::session::SharedSegmenter;
use crate::types::{BackgroundColor, PipelineState, ProcessingTimings, RemovalOutcome, RemovalSummary};
use crate::utils::{
    downscale_for_inference, extract_alpha_mask, normalize_to_rgb, prepare_inference_payload,
    upscale_mask,
};
use futures::stream::{self, StreamExt};
use instant::Instant;
use std::path::{Path, PathBuf};
use tracing::{debug, info, span, warn, Level};

/// Runs the background removal pipeline against a shared segmentation model
#[derive(Debug, Clone)]
pub struct BackgroundRemovalProcessor {
    config: PipelineConfig,
    segmenter: SharedSegmenter,
}

impl BackgroundRemovalProcessor {
    /// Create a processor
    ///
    /// # Errors
    /// - Invalid pipeline configuration
    pub fn new(config: PipelineConfig, segmenter: SharedSegmenter) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, segmenter })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn segmenter(&self) -> &SharedSegmenter {
        &self.segmenter
    }

    /// Remove the background of `input` and write a PNG to `output`.
    ///
    /// Never panics or returns an error; failures are reported in the outcome.
    pub fn remove_background<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
        background: Option<BackgroundColor>,
    ) -> RemovalOutcome {
        self.run(input.as_ref(), output.as_ref(), background).into()
    }

    /// Same as [`Self::remove_background`] with the detailed summary
    ///
    /// # Errors
    /// - A [`ConvertError::Stage`] wrapping the failing stage's error
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        background: Option<BackgroundColor>,
    ) -> Result<RemovalSummary> {
        let _span = span!(
            Level::INFO,
            "remove_background",
            input = %input.display(),
            output = %output.display(),
            width = tracing::field::Empty,
            height = tracing::field::Empty
        )
        .entered();

        let result = self.run_stages(input, output, background);
        match &result {
            Ok(summary) => info!(
                input_size = summary.input_size,
                output_size = summary.output_size,
                compressed = summary.compressed_for_inference,
                total_ms = summary.timings.total_ms,
                "Background removed"
            ),
            Err(e) => warn!(
                stage = %e.stage().map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                error = %e.root(),
                "Background removal failed"
            ),
        }
        result
    }

    fn run_stages(
        &self,
        input: &Path,
        output: &Path,
        background: Option<BackgroundColor>,
    ) -> Result<RemovalSummary> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let (decoded, input_size) = {
            let _span = span!(Level::DEBUG, "load").entered();
            let start = Instant::now();
            let input_size = std::fs::metadata(input)
                .map_err(|e| ConvertError::file_io_error("read image file", input, &e))
                .map_err(|e| e.at_stage(PipelineState::Loaded))?
                .len();
            let decoded =
                ImageIOService::load_image(input).map_err(|e| e.at_stage(PipelineState::Loaded))?;
            timings.decode_ms = start.elapsed().as_millis() as u64;
            (decoded, input_size)
        };
        let dimensions = (decoded.width(), decoded.height());
        tracing::Span::current()
            .record("width", dimensions.0)
            .record("height", dimensions.1);
        transition(PipelineState::Loaded);

        let preprocess_start = Instant::now();
        let image = {
            let _span = span!(Level::DEBUG, "normalize", color = ?decoded.color()).entered();
            normalize_to_rgb(decoded)
        };
        transition(PipelineState::Normalized);

        let payload = {
            let inference_image = {
                let _span = span!(Level::DEBUG, "downscale", max_edge = self.config.inference_max_edge)
                    .entered();
                downscale_for_inference(&image, self.config.inference_max_edge)
            };
            transition(PipelineState::DownscaledForInference);

            let _span = span!(
                Level::DEBUG,
                "compress",
                width = inference_image.width(),
                height = inference_image.height(),
                budget = self.config.size_budget_bytes
            )
            .entered();
            prepare_inference_payload(&inference_image, &self.config)?
        };
        if payload.was_compressed() {
            transition(PipelineState::CompressedForInference);
        }
        timings.preprocess_ms = preprocess_start.elapsed().as_millis() as u64;
        let inference_dimensions = (payload.width, payload.height);
        let inference_payload_bytes = payload.bytes.len();
        let compressed_for_inference = payload.was_compressed();

        let segmented = {
            let _span = span!(
                Level::DEBUG,
                "segment",
                format = ?payload.format,
                bytes = inference_payload_bytes
            )
            .entered();
            let start = Instant::now();
            let model = self
                .segmenter
                .get_or_init()
                .map_err(|e| ConvertError::segmentation(e.to_string()))
                .map_err(|e| e.at_stage(PipelineState::Segmented))?;
            let segmented = model
                .segment(&payload.bytes)
                .map_err(|e| e.at_stage(PipelineState::Segmented))?;
            timings.segmentation_ms = start.elapsed().as_millis() as u64;
            segmented
        };
        drop(payload);

        let postprocess_start = Instant::now();
        let mask = extract_alpha_mask(&segmented).map_err(|e| e.at_stage(PipelineState::Segmented))?;
        drop(segmented);
        transition(PipelineState::Segmented);

        let mask = {
            let _span = span!(
                Level::DEBUG,
                "upscale_mask",
                from_width = mask.width(),
                from_height = mask.height()
            )
            .entered();
            upscale_mask(mask, dimensions.0, dimensions.1)
        };
        transition(PipelineState::MaskUpscaled);

        let result = {
            let _span = span!(Level::DEBUG, "composite", background = ?background).entered();
            composite(image, &mask, background).map_err(|e| e.at_stage(PipelineState::Composited))?
        };
        drop(mask);
        timings.postprocess_ms = postprocess_start.elapsed().as_millis() as u64;
        transition(PipelineState::Composited);

        let output_size = {
            let _span = span!(Level::DEBUG, "save", compression = ?self.config.png_compression).entered();
            let start = Instant::now();
            let size = ImageIOService::write_png_atomic(&result, output, self.config.png_compression)
                .map_err(|e| e.at_stage(PipelineState::Saved))?;
            timings.encode_ms = start.elapsed().as_millis() as u64;
            size
        };
        drop(result);
        transition(PipelineState::Saved);

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        Ok(RemovalSummary {
            input_size,
            output_size,
            output_path: output.to_path_buf(),
            dimensions,
            inference_dimensions,
            inference_payload_bytes,
            compressed_for_inference,
            background_applied: background.is_some(),
            timings,
        })
    }

    /// Run [`Self::remove_background`] on a blocking worker thread
    pub async fn remove_background_async(
        &self,
        input: PathBuf,
        output: PathBuf,
        background: Option<BackgroundColor>,
    ) -> RemovalOutcome {
        let processor = self.clone();
        tokio::task::spawn_blocking(move || processor.remove_background(input, output, background))
            .await
            .unwrap_or_else(|e| {
                RemovalOutcome::failed(&ConvertError::internal(format!("Worker task failed: {e}")))
            })
    }

    /// Process several inputs into `output_dir`, naming each output
    /// `<stem>_no_bg.png`.
    ///
    /// The model is loaded before the first item; outcomes keep input order.
    ///
    /// # Errors
    /// - Model loading failure (no item is attempted)
    pub fn process_batch<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        output_dir: &Path,
        background: Option<BackgroundColor>,
    ) -> Result<Vec<RemovalOutcome>> {
        let _span = span!(Level::INFO, "batch_processing", file_count = inputs.len()).entered();
        self.segmenter.get_or_init()?;

        Ok(inputs
            .iter()
            .map(|input| {
                let input = input.as_ref();
                let output = ImageIOService::output_path_for(input, output_dir);
                self.remove_background(input, &output, background)
                    .with_filename(file_name(input))
            })
            .collect())
    }

    /// Concurrent [`Self::process_batch`] with up to `jobs` blocking workers
    ///
    /// # Errors
    /// - Model loading failure (no item is attempted)
    pub async fn process_batch_async(
        &self,
        inputs: Vec<PathBuf>,
        output_dir: PathBuf,
        background: Option<BackgroundColor>,
        jobs: usize,
    ) -> Result<Vec<RemovalOutcome>> {
        let segmenter = self.segmenter.clone();
        tokio::task::spawn_blocking(move || segmenter.get_or_init())
            .await
            .map_err(|e| ConvertError::internal(format!("Model loading task failed: {e}")))??;

        info!(file_count = inputs.len(), jobs, "Processing batch");
        let outcomes: Vec<RemovalOutcome> = stream::iter(inputs)
            .map(|input| {
                let output = ImageIOService::output_path_for(&input, &output_dir);
                let filename = file_name(&input);
                async move {
                    self.remove_background_async(input, output, background)
                        .await
                        .with_filename(filename)
                }
            })
            .buffered(jobs.max(1))
            .collect()
            .await;
        Ok(outcomes)
    }
}

fn transition(state: PipelineState) {
    debug!(state = %state, "Pipeline state reached");
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
