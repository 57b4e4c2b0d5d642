//! Inference backend abstraction

use crate::error::Result;
use crate::models::PreprocessingConfig;
use ndarray::Array4;

/// A loaded segmentation network.
///
/// Backends are constructed fully loaded and are shared read-only between
/// concurrent requests, so `infer` takes `&self`.
pub trait InferenceBackend: Send + Sync + std::fmt::Debug {
    /// Run the network on an NCHW input tensor, returning its first output
    ///
    /// # Errors
    /// - Inference failures inside the engine
    /// - Output that is not a 4D `f32` tensor
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// How inputs for this network are built
    fn preprocessing_config(&self) -> &PreprocessingConfig;

    /// Short engine name for logging
    fn name(&self) -> &'static str;
}

impl<T: InferenceBackend + ?Sized> InferenceBackend for Box<T> {
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        (**self).infer(input)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        (**self).preprocessing_config()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Reshape a dynamic-rank output into NCHW, rejecting other ranks
pub(crate) fn into_array4(shape: &[usize], data: Vec<f32>) -> std::result::Result<Array4<f32>, String> {
    match shape {
        &[n, c, h, w] => Array4::from_shape_vec((n, c, h, w), data)
            .map_err(|e| format!("Failed to reshape output tensor: {e}")),
        &[n, h, w] => Array4::from_shape_vec((n, 1, h, w), data)
            .map_err(|e| format!("Failed to reshape output tensor: {e}")),
        other => Err(format!("Expected 4D output tensor, got {}D", other.len())),
    }
}
