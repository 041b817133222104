use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::pipeline::{PipelineOutput, PipelineState, Progress};
use crate::traits::PipelineObserver;
use crate::TileSegError;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}";

/// Shows a run's progress on an `indicatif` bar: percentage while tiles are
/// being inferred, a spinner once the remaining work has no ETA.
pub struct ProgressBarObserver {
    progress_bar: ProgressBar,
    label: String,
}

impl ProgressBarObserver {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let progress_bar = ProgressBar::new(100);
        progress_bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress_bar.set_message(label.clone());
        Self {
            progress_bar,
            label,
        }
    }

    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
            label: String::new(),
        }
    }

    pub fn progress_bar(&self) -> &ProgressBar {
        &self.progress_bar
    }
}

impl PipelineObserver for ProgressBarObserver {
    fn on_state(&self, state: PipelineState) {
        if state == PipelineState::Loading {
            self.progress_bar.enable_steady_tick(Duration::from_millis(120));
        }
    }

    fn on_progress(&self, progress: Progress) {
        match progress {
            Progress::Percent(percent) => self.progress_bar.set_position(u64::from(percent)),
            Progress::Indeterminate => {
                self.progress_bar.set_position(100);
                self.progress_bar.set_style(
                    ProgressStyle::with_template(SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                self.progress_bar
                    .set_message(format!("{} (stitching)", self.label).trim_start().to_string());
            }
        }
    }

    fn on_success(&self, _output: &PipelineOutput) {
        self.progress_bar.finish_with_message(self.label.clone());
    }

    fn on_error(&self, error: &TileSegError) {
        self.progress_bar.abandon_with_message(error.to_string());
    }
}
