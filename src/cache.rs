use std::sync::Arc;

use parking_lot::RwLock;

use crate::pipeline::{PipelineOutput, Progress};
use crate::traits::PipelineObserver;

/// Caller-owned holder for the latest pipeline result.
///
/// Filled once per run from `on_success`; readers get an `Arc` snapshot, so a
/// later run replacing the value never changes what an earlier reader holds.
#[derive(Debug, Default)]
pub struct ResultCache {
    latest: RwLock<Option<Arc<PipelineOutput>>>,
    last_progress: RwLock<Option<Progress>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, output: PipelineOutput) -> Arc<PipelineOutput> {
        let output = Arc::new(output);
        *self.latest.write() = Some(Arc::clone(&output));
        output
    }

    pub fn get(&self) -> Option<Arc<PipelineOutput>> {
        self.latest.read().clone()
    }

    pub fn is_populated(&self) -> bool {
        self.latest.read().is_some()
    }

    pub fn last_progress(&self) -> Option<Progress> {
        *self.last_progress.read()
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
        *self.last_progress.write() = None;
    }
}

impl PipelineObserver for ResultCache {
    fn on_progress(&self, progress: Progress) {
        *self.last_progress.write() = Some(progress);
    }

    fn on_success(&self, output: &PipelineOutput) {
        self.store(output.clone());
    }
}
