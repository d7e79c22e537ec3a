//! Live classification pipeline: periodic sampling and confidence gating.

mod gate;
mod sampler;

pub use gate::{ConfidenceGate, GateDecision, GatePath, DEFAULT_THRESHOLD};
pub use sampler::{FrameSampler, SampleKind, SampleOutcome, SamplerStats, DEFAULT_INTERVAL};
