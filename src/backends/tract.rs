//! Tract backend
//!
//! Pure Rust inference with no native dependencies. The optimized plan is
//! immutable once built, so concurrent requests run it without locking.

use crate::error::{ConvertError, Result};
use crate::inference::{into_array4, InferenceBackend};
use crate::models::{ModelManager, PreprocessingConfig};
use instant::Instant;
use ndarray::Array4;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend holding an optimized, runnable plan
#[derive(Debug)]
pub struct TractBackend {
    model: TractModel,
    preprocessing: PreprocessingConfig,
}

impl TractBackend {
    /// Parse, fix the input shape to the preprocessing size, and optimize
    ///
    /// # Errors
    /// - Model file unreadable
    /// - ONNX parsing or optimization failures
    pub fn load(manager: &ModelManager) -> Result<Self> {
        let load_start = Instant::now();
        let model_data = manager.load_model()?;
        let preprocessing = *manager.preprocessing_config();
        let [height, width] = preprocessing.target_size;

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(&model_data))
            .map_err(|e| ConvertError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                f32::fact([1, 3, height as usize, width as usize]).into(),
            )
            .map_err(|e| ConvertError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| ConvertError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| ConvertError::model(format!("Failed to create runnable model: {e}")))?;

        log::info!(
            "Tract backend ready for {} in {}ms ({:.2} MB)",
            manager.source().display_name(),
            load_start.elapsed().as_millis(),
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            model,
            preprocessing,
        })
    }
}

impl InferenceBackend for TractBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();
        log::debug!("Running Tract inference on {:?}", input.shape());

        let input_tensor = Tensor::from(input.clone());
        let outputs = self
            .model
            .run(tvec![input_tensor.into()])
            .map_err(|e| ConvertError::segmentation(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ConvertError::segmentation("No output tensor found"))?
            .into_arc_tensor();

        let view = output_tensor.to_array_view::<f32>().map_err(|e| {
            ConvertError::segmentation(format!("Failed to convert output tensor: {e}"))
        })?;
        let shape = view.shape().to_vec();
        let data = view.iter().copied().collect();

        let output = into_array4(&shape, data).map_err(ConvertError::segmentation)?;
        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use crate::models::ModelSource;
    use tempfile::TempDir;

    #[test]
    fn test_load_rejects_garbage_model() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path()).unwrap();
        let path = temp.path().join("garbage.onnx");
        std::fs::write(&path, [0xde, 0xad, 0xbe, 0xef]).unwrap();
        let manager = ModelManager::resolve(&ModelSource::External(path), &cache).unwrap();

        let err = TractBackend::load(&manager).unwrap_err();
        assert!(matches!(err, ConvertError::Model(_)));
    }
}
