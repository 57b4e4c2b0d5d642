//! ONNX Runtime backend
//!
//! Runs the segmentation model through ONNX Runtime with CPU, CUDA or
//! `CoreML` execution providers. `Session::run` needs exclusive access, so
//! the session sits behind a mutex and concurrent requests take turns.

use crate::config::{ExecutionProvider, ModelConfig};
use crate::error::{ConvertError, Result};
use crate::inference::{into_array4, InferenceBackend};
use crate::models::{ModelManager, PreprocessingConfig};
use instant::Instant;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::sync::Mutex;

/// ONNX Runtime backend holding one loaded session
#[derive(Debug)]
pub struct OnnxBackend {
    session: Mutex<Session>,
    preprocessing: PreprocessingConfig,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with availability and a description
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        log::debug!(
            "Execution providers on {}/{}: cuda={cuda_available} coreml={coreml_available}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Build a session for the resolved model
    ///
    /// # Errors
    /// - Model file unreadable
    /// - Session creation failures (invalid model, provider setup)
    pub fn load(manager: &ModelManager, config: &ModelConfig) -> Result<Self> {
        let load_start = Instant::now();
        let model_data = manager.load_model()?;

        let session_builder = Session::builder()
            .map_err(|e| ConvertError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ConvertError::model(format!("Failed to set optimization level: {e}")))?;

        let providers = Self::execution_providers(config.execution_provider);
        let session_builder = if providers.is_empty() {
            session_builder
        } else {
            session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    ConvertError::model(format!("Failed to set execution providers: {e}"))
                })?
        };

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| ConvertError::model(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| ConvertError::model(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                ConvertError::model(format!("Failed to create session from model data: {e}"))
            })?;

        log::info!(
            "ONNX session ready for {} in {:.0}ms ({:.2} MB, provider {}, {intra_threads} intra / {inter_threads} inter threads)",
            manager.source().display_name(),
            load_start.elapsed().as_secs_f64() * 1000.0,
            model_data.len() as f64 / (1024.0 * 1024.0),
            config.execution_provider
        );

        Ok(Self {
            session: Mutex::new(session),
            preprocessing: *manager.preprocessing_config(),
        })
    }

    /// Providers to register, in priority order; empty means CPU only
    fn execution_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let cuda = CUDAExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml = CoreMLExecutionProvider::default().with_subgraphs(true);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        let mut providers = Vec::new();
        match requested {
            ExecutionProvider::Auto => {
                if cuda_available {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda.build());
                }
                if coreml_available {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(coreml.build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
            },
            ExecutionProvider::Cpu => log::info!("Using CPU execution provider"),
            ExecutionProvider::Cuda => {
                if cuda_available {
                    log::info!("Using CUDA execution provider");
                    providers.push(cuda.build());
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available {
                    log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                    providers.push(coreml.build());
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                }
            },
        }
        providers
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();
        log::debug!("Starting ONNX inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            ConvertError::segmentation(format!("Failed to convert input tensor: {e}"))
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ConvertError::internal("ONNX session lock poisoned"))?;

        let core_start = Instant::now();
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| ConvertError::segmentation(format!("ONNX inference failed: {e}")))?;
        let core_ms = core_start.elapsed().as_secs_f64() * 1000.0;

        // Positional access: the first output is the finest mask
        let (shape, data) = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| ConvertError::segmentation("No output tensors found"))?;
            let tensor = outputs
                .get(first_key)
                .ok_or_else(|| ConvertError::segmentation("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    ConvertError::segmentation(format!("Failed to extract output tensor: {e}"))
                })?;
            (
                tensor.shape().to_vec(),
                tensor.view().to_owned().into_raw_vec_and_offset().0,
            )
        };
        drop(outputs);
        drop(session);

        let output = into_array4(&shape, data).map_err(ConvertError::segmentation)?;
        log::debug!(
            "ONNX inference complete: {:.2}ms total, {core_ms:.2}ms in session, output {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            output.dim()
        );
        Ok(output)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_providers_always_has_cpu() {
        let providers = OnnxBackend::list_providers();
        assert_eq!(providers.len(), 3);
        let cpu = providers.first().unwrap();
        assert_eq!(cpu.0, "CPU");
        assert!(cpu.1);
    }

    #[test]
    fn test_cpu_request_registers_no_providers() {
        assert!(OnnxBackend::execution_providers(ExecutionProvider::Cpu).is_empty());
    }
}
