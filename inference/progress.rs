use std::fmt;

/// Stages reported during clustered inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InferenceStage {
    Clustering,
    Reduction,
    Inference,
    InverseMapping,
    Bootstraps,
}

impl InferenceStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Clustering => "feature clustering",
            Self::Reduction => "cluster reduction",
            Self::Inference => "desparsified inference",
            Self::InverseMapping => "mapping back to features",
            Self::Bootstraps => "ensemble bootstraps",
        }
    }
}

impl fmt::Display for InferenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress. Ensemble runs report from
/// worker threads, hence the `Send` bound.
pub trait InferenceProgressObserver: Send {
    fn on_stage_start(&mut self, stage: InferenceStage, total_steps: usize) {
        let _ = (stage, total_steps);
    }
    fn on_stage_advance(&mut self, stage: InferenceStage, completed_steps: usize) {
        let _ = (stage, completed_steps);
    }
    fn on_stage_finish(&mut self, stage: InferenceStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopInferenceProgress;

impl InferenceProgressObserver for NoopInferenceProgress {}
