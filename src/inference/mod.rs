//! Image classification: model loading, preprocessing, and ranking.
//!
//! Models are loaded once through a [`ModelLoader`] and then shared
//! read-only. The [`Classifier`] turns frames into ranked predictions.

mod classifier;
mod loader;
mod model;
#[cfg(feature = "onnx")]
mod onnx;
mod preprocess;

pub use classifier::{Classifier, Prediction, RankedPredictions};
pub use loader::{check_outputs, MockModelLoader, ModelLoader, ModelSource, ModelUnavailable};
pub use model::{ClassifierModel, InferenceError, MockModel, DEFAULT_INPUT_SIZE};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxModel, OnnxModelLoader};
pub use preprocess::{preprocess, InputTensor, PreprocessError, ResizeMode, TensorLayout};
