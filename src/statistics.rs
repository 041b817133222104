use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Timing and size summary of one pipeline run. Produced once, read-only.
#[derive(Debug, Clone)]
pub struct Statistics {
    original_size: (u32, u32),
    padded_size: (u32, u32),
    tile_size: u32,
    acceleration_enabled: bool,
    parallelism: usize,
    task_count: usize,
    run_start: Instant,
    run_end: Instant,
    inference_start: Instant,
    inference_end: Instant,
    task_times: Vec<Duration>,
}

impl Statistics {
    pub const fn original_size(&self) -> (u32, u32) {
        self.original_size
    }

    pub const fn padded_size(&self) -> (u32, u32) {
        self.padded_size
    }

    pub const fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub const fn acceleration_enabled(&self) -> bool {
        self.acceleration_enabled
    }

    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub const fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn total_time(&self) -> Duration {
        self.run_end.saturating_duration_since(self.run_start)
    }

    pub fn inference_time(&self) -> Duration {
        self.inference_end
            .saturating_duration_since(self.inference_start)
    }

    /// Inference-phase time divided by the number of tasks.
    pub fn average_time_per_task(&self) -> Duration {
        match u32::try_from(self.task_count) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.inference_time() / count,
        }
    }

    pub fn slowest_task(&self) -> Duration {
        self.task_times.iter().copied().max().unwrap_or_default()
    }

    /// Wall time of each task, by task index.
    pub fn task_times(&self) -> &[Duration] {
        &self.task_times
    }

    pub fn summary(&self) -> StatisticsSummary {
        StatisticsSummary {
            original_width: self.original_size.0,
            original_height: self.original_size.1,
            padded_width: self.padded_size.0,
            padded_height: self.padded_size.1,
            tile_size: self.tile_size,
            acceleration_enabled: self.acceleration_enabled,
            parallelism: self.parallelism,
            task_count: self.task_count,
            total_secs: self.total_time().as_secs_f64(),
            inference_secs: self.inference_time().as_secs_f64(),
            average_task_secs: self.average_time_per_task().as_secs_f64(),
            slowest_task_secs: self.slowest_task().as_secs_f64(),
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Original size: {} x {}",
            self.original_size.0, self.original_size.1
        )?;
        writeln!(
            f,
            "Size with padding: {} x {}",
            self.padded_size.0, self.padded_size.1
        )?;
        writeln!(f, "Tile size: {}", self.tile_size)?;
        writeln!(f, "Acceleration enabled: {}", self.acceleration_enabled)?;
        writeln!(f, "Number of parallel tasks: {}", self.parallelism)?;
        writeln!(
            f,
            "Total execution time: {:.3} s",
            self.total_time().as_secs_f64()
        )?;
        writeln!(
            f,
            "Tasks execution time: {:.3} s",
            self.inference_time().as_secs_f64()
        )?;
        writeln!(f, "Number of tasks: {}", self.task_count)?;
        writeln!(
            f,
            "Average time per task: {:.3} s",
            self.average_time_per_task().as_secs_f64()
        )?;
        writeln!(
            f,
            "Slowest task: {:.3} s",
            self.slowest_task().as_secs_f64()
        )
    }
}

/// Serializable view of [`Statistics`], durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSummary {
    pub original_width: u32,
    pub original_height: u32,
    pub padded_width: u32,
    pub padded_height: u32,
    pub tile_size: u32,
    pub acceleration_enabled: bool,
    pub parallelism: usize,
    pub task_count: usize,
    pub total_secs: f64,
    pub inference_secs: f64,
    pub average_task_secs: f64,
    pub slowest_task_secs: f64,
}

/// Collects measurements while a run is in progress.
#[derive(Debug, Clone)]
pub(crate) struct StatisticsRecorder {
    original_size: (u32, u32),
    padded_size: (u32, u32),
    tile_size: u32,
    acceleration_enabled: bool,
    parallelism: usize,
    task_count: usize,
    run_start: Instant,
    inference_start: Option<Instant>,
    inference_end: Option<Instant>,
    task_times: Vec<Duration>,
}

impl StatisticsRecorder {
    pub(crate) fn start(tile_size: u32, acceleration_enabled: bool, parallelism: usize) -> Self {
        Self {
            original_size: (0, 0),
            padded_size: (0, 0),
            tile_size,
            acceleration_enabled,
            parallelism,
            task_count: 0,
            run_start: Instant::now(),
            inference_start: None,
            inference_end: None,
            task_times: Vec::new(),
        }
    }

    pub(crate) fn set_sizes(&mut self, original: (u32, u32), padded: (u32, u32)) {
        self.original_size = original;
        self.padded_size = padded;
    }

    pub(crate) fn set_task_count(&mut self, task_count: usize) {
        self.task_count = task_count;
    }

    pub(crate) fn inference_started(&mut self) {
        self.inference_start = Some(Instant::now());
    }

    pub(crate) fn inference_finished(&mut self, task_times: Vec<Duration>) {
        self.inference_end = Some(Instant::now());
        self.task_times = task_times;
    }

    pub(crate) fn finish(self) -> Statistics {
        let run_end = Instant::now();
        let inference_start = self.inference_start.unwrap_or(self.run_start);
        let inference_end = self.inference_end.unwrap_or(inference_start);
        Statistics {
            original_size: self.original_size,
            padded_size: self.padded_size,
            tile_size: self.tile_size,
            acceleration_enabled: self.acceleration_enabled,
            parallelism: self.parallelism,
            task_count: self.task_count,
            run_start: self.run_start,
            run_end,
            inference_start,
            inference_end,
            task_times: self.task_times,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn recorded(task_count: usize) -> Statistics {
        let mut recorder = StatisticsRecorder::start(256, true, 4);
        recorder.set_sizes((300, 100), (512, 256));
        recorder.set_task_count(task_count);
        recorder.inference_started();
        thread::sleep(Duration::from_millis(20));
        recorder.inference_finished(vec![Duration::from_millis(5); task_count]);
        recorder.finish()
    }

    #[test]
    fn test_phase_is_within_total() {
        let stats = recorded(2);
        assert!(stats.inference_time() >= Duration::from_millis(20));
        assert!(stats.total_time() >= stats.inference_time());
        assert_eq!(stats.average_time_per_task(), stats.inference_time() / 2);
        assert_eq!(stats.slowest_task(), Duration::from_millis(5));
    }

    #[test]
    fn test_zero_tasks_average() {
        let stats = recorded(0);
        assert_eq!(stats.average_time_per_task(), Duration::ZERO);
        assert_eq!(stats.slowest_task(), Duration::ZERO);
    }

    #[test]
    fn test_display_contains_required_fields() {
        let text = recorded(2).to_string();
        for field in [
            "Original size: 300 x 100",
            "Size with padding: 512 x 256",
            "Acceleration enabled: true",
            "Number of parallel tasks: 4",
            "Total execution time:",
            "Tasks execution time:",
            "Number of tasks: 2",
            "Average time per task:",
        ] {
            assert!(text.contains(field), "missing `{field}` in:\n{text}");
        }
    }

    #[test]
    fn test_summary_serializes() -> serde_json::Result<()> {
        let json = serde_json::to_value(recorded(2).summary())?;
        assert_eq!(json["padded_width"], 512);
        assert_eq!(json["task_count"], 2);
        assert_eq!(json["acceleration_enabled"], true);
        Ok(())
    }
}
