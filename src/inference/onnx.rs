//! ONNX classifier backend built on `tract-onnx`.

use super::{
    check_outputs, ClassifierModel, InferenceError, InputTensor, ModelLoader, ModelSource,
    ModelUnavailable, TensorLayout,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tract_onnx::prelude::*;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Loads `.onnx` image classifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxModelLoader;

impl OnnxModelLoader {
    pub fn new() -> Self {
        Self
    }
}

fn input_shape(size: usize, layout: TensorLayout) -> [usize; 4] {
    match layout {
        TensorLayout::Nhwc => [1, size, size, 3],
        TensorLayout::Nchw => [1, 3, size, size],
    }
}

fn build_plan(path: PathBuf, shape: [usize; 4]) -> TractResult<Plan> {
    tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, f32::fact(shape).into())?
        .into_optimized()?
        .into_runnable()
}

/// Size of the last output dimension, when it is a concrete number.
fn output_len(plan: &Plan) -> Option<usize> {
    let fact = plan.model().output_fact(0).ok()?;
    fact.shape.last()?.to_usize().ok()
}

#[async_trait]
impl ModelLoader for OnnxModelLoader {
    async fn load(
        &self,
        source: &ModelSource,
    ) -> Result<Arc<dyn ClassifierModel>, ModelUnavailable> {
        let path = source.path.clone().ok_or(ModelUnavailable::NoPath)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ModelUnavailable::NotFound(path));
        }

        let labels = source.resolve_labels().await?;
        let shape = input_shape(source.input_size as usize, source.layout);

        tracing::info!(path = %path.display(), ?shape, "Loading ONNX model");
        let plan = tokio::task::spawn_blocking(move || build_plan(path, shape))
            .await
            .map_err(|e| ModelUnavailable::Backend(e.to_string()))?
            .map_err(|e| ModelUnavailable::Backend(e.to_string()))?;

        let model = OnnxModel {
            outputs: output_len(&plan),
            plan: Arc::new(plan),
            labels,
            input_size: source.input_size,
            layout: source.layout,
        };
        check_outputs(&model)?;
        Ok(Arc::new(model))
    }
}

/// A runnable ONNX classifier.
pub struct OnnxModel {
    plan: Arc<Plan>,
    labels: Vec<String>,
    input_size: u32,
    layout: TensorLayout,
    outputs: Option<usize>,
}

#[async_trait]
impl ClassifierModel for OnnxModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn output_len(&self) -> Option<usize> {
        self.outputs
    }

    async fn predict(&self, input: InputTensor) -> Result<Vec<f32>, InferenceError> {
        let plan = Arc::clone(&self.plan);

        tokio::task::spawn_blocking(move || -> TractResult<Vec<f32>> {
            let shape = input.shape();
            let tensor = Tensor::from_shape(&shape, input.data())?;
            drop(input);

            let outputs = plan.run(tvec!(tensor.into_tvalue()))?;
            let scores = outputs[0].to_array_view::<f32>()?.iter().copied().collect();
            Ok(scores)
        })
        .await
        .map_err(|e| InferenceError::Backend(e.to_string()))?
        .map_err(|e| InferenceError::Backend(e.to_string()))
    }
}
