//! Model loading.
//!
//! A loader turns a [`ModelSource`] into a ready [`ClassifierModel`]. It
//! never retries; after a failure the caller decides whether to load again.

use super::{ClassifierModel, MockModel, ResizeMode, TensorLayout, DEFAULT_INPUT_SIZE};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Why a model could not be made available.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelUnavailable {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("no model path configured")]
    NoPath,
    #[error("failed to read labels from {path}: {reason}")]
    Labels { path: PathBuf, reason: String },
    #[error("model has no labels")]
    NoLabels,
    #[error("model input size must be positive")]
    InvalidInputSize,
    #[error("model backend failed to load: {0}")]
    Backend(String),
    #[error("model has {labels} labels but produces {outputs} scores")]
    OutputMismatch { labels: usize, outputs: usize },
}

/// Checks that a model produces one score per label, when its output size is known.
pub fn check_outputs(model: &dyn ClassifierModel) -> Result<(), ModelUnavailable> {
    let labels = model.labels().len();
    match model.output_len() {
        Some(outputs) if outputs != labels => {
            Err(ModelUnavailable::OutputMismatch { labels, outputs })
        }
        _ => Ok(()),
    }
}

/// Where to find the classifier and how to feed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    /// Path to the model artifact. Absent selects the mock model.
    pub path: Option<PathBuf>,
    /// Inline labels, in output order.
    pub labels: Vec<String>,
    /// Labels file: JSON metadata with a `labels` array, or one label per line.
    pub labels_path: Option<PathBuf>,
    /// Side of the square input.
    pub input_size: u32,
    pub resize: ResizeMode,
    pub layout: TensorLayout,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            path: None,
            labels: vec![
                "Person 1".to_string(),
                "Person 2".to_string(),
                "Person 3".to_string(),
            ],
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            resize: ResizeMode::default(),
            layout: TensorLayout::default(),
        }
    }
}

#[derive(Deserialize)]
struct LabelMetadata {
    labels: Vec<String>,
}

/// Parses a labels file body.
fn parse_labels(path: &Path, content: &str) -> Result<Vec<String>, ModelUnavailable> {
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

    let labels = if is_json {
        serde_json::from_str::<LabelMetadata>(content)
            .map_err(|e| ModelUnavailable::Labels {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .labels
    } else {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    };

    if labels.is_empty() {
        return Err(ModelUnavailable::NoLabels);
    }
    Ok(labels)
}

impl ModelSource {
    /// Resolves the label list, reading the labels file if one is set.
    pub async fn resolve_labels(&self) -> Result<Vec<String>, ModelUnavailable> {
        if self.input_size == 0 {
            return Err(ModelUnavailable::InvalidInputSize);
        }

        match &self.labels_path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ModelUnavailable::Labels {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                parse_labels(path, &content)
            }
            None if self.labels.is_empty() => Err(ModelUnavailable::NoLabels),
            None => Ok(self.labels.clone()),
        }
    }
}

/// Loads classifier artifacts.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        source: &ModelSource,
    ) -> Result<Arc<dyn ClassifierModel>, ModelUnavailable>;
}

/// Loader producing [`MockModel`]s, with scriptable failures.
#[derive(Debug, Default)]
pub struct MockModelLoader {
    model: Option<Arc<MockModel>>,
    failures: Mutex<VecDeque<ModelUnavailable>>,
    loads: AtomicUsize,
}

impl MockModelLoader {
    /// Creates a loader that builds a fresh mock model from the source labels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `model` from every successful load.
    pub fn with_model(mut self, model: Arc<MockModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Fails the next load with `error`.
    pub fn fail_next(self, error: ModelUnavailable) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for MockModelLoader {
    async fn load(
        &self,
        source: &ModelSource,
    ) -> Result<Arc<dyn ClassifierModel>, ModelUnavailable> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let model: Arc<dyn ClassifierModel> = match &self.model {
            Some(model) => Arc::clone(model) as Arc<dyn ClassifierModel>,
            None => {
                let labels = source.resolve_labels().await?;
                Arc::new(MockModel::new(labels).with_input_size(source.input_size))
            }
        };
        check_outputs(model.as_ref())?;
        Ok(model)
    }
}
