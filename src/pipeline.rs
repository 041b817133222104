//! Tiled inference pipeline.
//!
//! A run moves through `Idle -> Loading -> Padding -> Dispatching ->
//! AwaitingResults -> Stitching -> PostProcessing -> Done`, or ends in
//! `Failed` from any of them. The worker pool is the only place where work
//! happens concurrently; everything else runs on the orchestration thread.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::{imageops, DynamicImage, GrayImage, RgbaImage};
use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::errors::{Result, TileSegError};
use crate::geometry::{PaddedImage, TileGrid};
use crate::imageops_ai::mask::apply_grayscale;
use crate::statistics::{Statistics, StatisticsRecorder};
use crate::task::{build_tasks, TileTask};
use crate::traits::{ModelLoader, ModelRuntime, PipelineObserver};

/// How often the collector wakes up to look for overdue tasks.
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Loading,
    Padding,
    Dispatching,
    AwaitingResults,
    Stitching,
    PostProcessing,
    Done,
    Failed,
}

impl PipelineState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Percent(u8),
    /// All tiles are in; stitching and post-processing have no ETA.
    Indeterminate,
}

impl Progress {
    pub fn percent(completed: usize, total: usize) -> Self {
        if total == 0 {
            return Self::Percent(100);
        }
        Self::Percent((completed.min(total) * 100 / total) as u8)
    }
}

/// Result of a successful run: the highlighted image and the mask, both at
/// the caller's original dimensions, plus run statistics.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub image: RgbaImage,
    pub mask: GrayImage,
    pub statistics: Statistics,
}

#[derive(Debug)]
pub enum PipelineEvent {
    Progress(Progress),
    Finished(Result<PipelineOutput>),
}

struct TileOutcome {
    index: usize,
    mask: GrayImage,
    elapsed: Duration,
}

struct StateMachine<'a, O: PipelineObserver + ?Sized> {
    state: PipelineState,
    observer: &'a O,
}

impl<'a, O: PipelineObserver + ?Sized> StateMachine<'a, O> {
    fn new(observer: &'a O) -> Self {
        Self {
            state: PipelineState::Idle,
            observer,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        log::debug!("pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.observer.on_state(next);
    }
}

pub struct InferencePipeline<L: ModelLoader> {
    loader: L,
    config: PipelineConfig,
}

impl<L: ModelLoader> InferencePipeline<L> {
    pub fn new(loader: L, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { loader, config })
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline on the calling thread. The observer sees state
    /// changes and progress, then exactly one of `on_success`/`on_error`.
    pub fn run<O>(&self, image: &DynamicImage, observer: &O) -> Result<PipelineOutput>
    where
        O: PipelineObserver + ?Sized,
    {
        self.run_with_token(image, observer, &CancellationToken::new())
    }

    pub fn run_with_token<O>(
        &self,
        image: &DynamicImage,
        observer: &O,
        token: &CancellationToken,
    ) -> Result<PipelineOutput>
    where
        O: PipelineObserver + ?Sized,
    {
        let mut machine = StateMachine::new(observer);
        match self.execute(image, &mut machine, token) {
            Ok(output) => {
                machine.advance(PipelineState::Done);
                log::info!(
                    "segmented {}x{} image in {:.3}s ({} tiles, {} workers)",
                    output.image.width(),
                    output.image.height(),
                    output.statistics.total_time().as_secs_f64(),
                    output.statistics.task_count(),
                    output.statistics.parallelism()
                );
                observer.on_success(&output);
                Ok(output)
            }
            Err(err) => {
                machine.advance(PipelineState::Failed);
                log::error!("pipeline failed: {err}");
                observer.on_error(&err);
                Err(err)
            }
        }
    }

    fn execute<O>(
        &self,
        image: &DynamicImage,
        machine: &mut StateMachine<'_, O>,
        token: &CancellationToken,
    ) -> Result<PipelineOutput>
    where
        O: PipelineObserver + ?Sized,
    {
        let config = &self.config;
        let mut recorder =
            StatisticsRecorder::start(config.tile_size, config.acceleration, config.parallelism);

        machine.advance(PipelineState::Loading);
        let runtime = self
            .loader
            .load(&config.model_path, &config.runtime_options())?;
        let runtime = Arc::new(runtime);

        machine.advance(PipelineState::Padding);
        let working = image.to_rgba8();
        let mut padded = PaddedImage::new(&working, config.tile_size)?;
        recorder.set_sizes(padded.original_size(), padded.padded_size());

        machine.advance(PipelineState::Dispatching);
        let (pad_width, pad_height) = padded.padded_size();
        let grid = TileGrid::new(pad_width, pad_height, config.tile_size)?;
        let tasks = build_tasks(&padded.image, &grid)?;
        recorder.set_task_count(tasks.len());
        if token.is_cancelled() {
            return Err(TileSegError::Interrupted);
        }
        recorder.inference_started();

        machine.advance(PipelineState::AwaitingResults);
        let outcomes = self.dispatch(tasks, runtime, machine.observer, token)?;
        recorder.inference_finished(outcomes.iter().map(|o| o.elapsed).collect());

        machine.advance(PipelineState::Stitching);
        let mask = stitch_masks(&grid, outcomes.into_iter().map(|o| (o.index, o.mask)))?;

        machine.advance(PipelineState::PostProcessing);
        apply_grayscale(&mut padded.image, &mask).map_err(|e| {
            TileSegError::ImageProcessing {
                path: "unknown".to_string(),
                operation: "mask application".to_string(),
                source: e.into(),
            }
        })?;
        let image = padded.restore(&padded.image)?;
        let mask = padded.restore(&mask)?;

        Ok(PipelineOutput {
            image,
            mask,
            statistics: recorder.finish(),
        })
    }

    /// Submits every task to a pool of `parallelism` threads and blocks until
    /// all of them report back. Results are returned ordered by task index.
    ///
    /// The runtime handle is moved in; each task drops its clone before
    /// reporting, so once every task has reported the handle is released.
    fn dispatch<R, O>(
        &self,
        tasks: Vec<TileTask>,
        runtime: Arc<R>,
        observer: &O,
        token: &CancellationToken,
    ) -> Result<Vec<TileOutcome>>
    where
        R: ModelRuntime + 'static,
        O: PipelineObserver + ?Sized,
    {
        let total = tasks.len();
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|i| format!("tile-worker-{i}"))
            .build()
            .map_err(|e| TileSegError::Configuration {
                message: format!("failed to build worker pool: {e}"),
            })?;

        let (tx, rx) = mpsc::channel::<(usize, Result<TileOutcome>)>();
        let in_flight = Arc::new(Mutex::new(HashMap::<usize, Instant>::new()));
        let threshold = self.config.threshold;

        for task in tasks {
            let tx = tx.clone();
            let runtime = Arc::clone(&runtime);
            let token = token.clone();
            let in_flight = Arc::clone(&in_flight);

            pool.spawn(move || {
                let index = task.index();
                let outcome = if token.is_cancelled() {
                    Err(TileSegError::Interrupted)
                } else {
                    let started = Instant::now();
                    in_flight.lock().insert(index, started);
                    let result = run_task(&task, runtime.as_ref(), threshold);
                    in_flight.lock().remove(&index);
                    result.map(|mask| TileOutcome {
                        index,
                        mask,
                        elapsed: started.elapsed(),
                    })
                };
                drop(runtime);
                // The collector is gone if the run already failed on a timeout.
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);
        drop(runtime);

        observer.on_progress(Progress::Percent(0));

        let mut slots: Vec<Option<TileOutcome>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        let mut first_failure: Option<TileSegError> = None;

        while completed < total {
            let received = match self.config.task_timeout {
                Some(_) => rx.recv_timeout(TIMEOUT_POLL_INTERVAL),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok((index, outcome)) => {
                    completed += 1;
                    match outcome {
                        Ok(tile) if first_failure.is_none() => {
                            slots[index] = Some(tile);
                            observer.on_progress(Progress::percent(completed, total));
                        }
                        Ok(_) => {}
                        Err(err) => {
                            if first_failure.is_none() {
                                log::warn!("tile task {index} failed: {err}");
                                token.cancel();
                                first_failure = Some(err);
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            // Checked on every wakeup: other tiles may keep reporting while one hangs.
            if let Some(timeout) = self.config.task_timeout {
                if let Some(index) = overdue_task(&in_flight, timeout) {
                    log::warn!("tile task {index} exceeded {timeout:?}");
                    token.cancel();
                    return Err(TileSegError::TaskTimeout { index, timeout });
                }
            }
        }

        if let Some(err) = first_failure {
            return Err(err);
        }
        observer.on_progress(Progress::Indeterminate);

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or(TileSegError::TaskExecution {
                    index,
                    message: format!("tile task {index} never reported a result"),
                })
            })
            .collect()
    }
}

impl<L: ModelLoader + 'static> InferencePipeline<L> {
    /// Runs the pipeline on a background thread. Progress and the final
    /// result arrive as [`PipelineEvent`]s on the returned handle.
    pub fn spawn(self: &Arc<Self>, image: DynamicImage) -> Result<PipelineHandle> {
        let (tx, rx) = mpsc::channel();
        let token = CancellationToken::new();
        let pipeline = Arc::clone(self);
        let worker_token = token.clone();

        let thread = thread::Builder::new()
            .name("tile-pipeline".to_string())
            .spawn(move || {
                let observer = ChannelObserver { events: tx.clone() };
                let result = pipeline.run_with_token(&image, &observer, &worker_token);
                let _ = tx.send(PipelineEvent::Finished(result));
            })
            .map_err(|e| TileSegError::Configuration {
                message: format!("failed to spawn pipeline thread: {e}"),
            })?;

        Ok(PipelineHandle {
            events: rx,
            token,
            thread: Some(thread),
        })
    }
}

/// Caller-side end of a spawned run.
pub struct PipelineHandle {
    events: Receiver<PipelineEvent>,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    /// Tasks that have not started yet are skipped and the run ends with
    /// [`TileSegError::Interrupted`]. Running tasks finish normally.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn wait(self) -> Result<PipelineOutput> {
        self.wait_with(|_| {})
    }

    /// Drains events on the calling thread until the run finishes.
    pub fn wait_with<F: FnMut(Progress)>(mut self, mut on_progress: F) -> Result<PipelineOutput> {
        let mut finished = None;
        for event in self.events.iter() {
            match event {
                PipelineEvent::Progress(progress) => on_progress(progress),
                PipelineEvent::Finished(result) => {
                    finished = Some(result);
                    break;
                }
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("pipeline thread panicked");
            }
        }
        finished.unwrap_or(Err(TileSegError::Interrupted))
    }
}

struct ChannelObserver {
    events: Sender<PipelineEvent>,
}

impl PipelineObserver for ChannelObserver {
    fn on_progress(&self, progress: Progress) {
        let _ = self.events.send(PipelineEvent::Progress(progress));
    }
}

fn run_task<R>(task: &TileTask, runtime: &R, threshold: f32) -> Result<GrayImage>
where
    R: ModelRuntime + ?Sized,
{
    panic::catch_unwind(AssertUnwindSafe(|| task.execute(runtime, threshold))).unwrap_or_else(
        |payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "tile task panicked".to_string());
            Err(TileSegError::TaskExecution {
                index: task.index(),
                message,
            })
        },
    )
}

fn overdue_task(in_flight: &Mutex<HashMap<usize, Instant>>, timeout: Duration) -> Option<usize> {
    in_flight
        .lock()
        .iter()
        .filter(|(_, started)| started.elapsed() >= timeout)
        .map(|(index, _)| *index)
        .min()
}

/// Places every tile mask at its grid position. Each grid position must be
/// written exactly once; arrival order does not matter.
pub fn stitch_masks<I>(grid: &TileGrid, tiles: I) -> Result<GrayImage>
where
    I: IntoIterator<Item = (usize, GrayImage)>,
{
    let (width, height) = grid.dimensions();
    let tile_size = grid.tile_size();
    let mut mosaic = GrayImage::new(width, height);
    let mut written = vec![false; grid.len()];

    for (index, tile) in tiles {
        let coord = grid.coord_of(index).ok_or_else(|| TileSegError::Validation {
            field: "tile index".to_string(),
            reason: format!(
                "{index} is outside the {}x{} grid",
                grid.cols(),
                grid.rows()
            ),
        })?;
        if tile.dimensions() != (tile_size, tile_size) {
            return Err(TileSegError::Validation {
                field: "tile mask".to_string(),
                reason: format!(
                    "tile {index} is {:?}, expected {tile_size}x{tile_size}",
                    tile.dimensions()
                ),
            });
        }
        if std::mem::replace(&mut written[index], true) {
            return Err(TileSegError::Validation {
                field: "tile mask".to_string(),
                reason: format!("tile {index} was stitched twice"),
            });
        }

        let (x, y) = grid.origin(coord);
        imageops::replace(&mut mosaic, &tile, x as i64, y as i64);
    }

    if let Some(missing) = written.iter().position(|done| !done) {
        return Err(TileSegError::Validation {
            field: "tile mask".to_string(),
            reason: format!("tile {missing} is missing"),
        });
    }

    Ok(mosaic)
}
