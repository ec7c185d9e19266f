// Stitches archive batches and live samples into one plotted series
use crate::application::archive_reader::archive_limit;
use crate::domain::sample::{Sample, SeriesBuffer};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;

/// Seams closer than this are joined instead of broken.
pub const MIN_GAP_MS: i64 = 2 * 60 * 1000;

pub fn min_gap_ms(step_ms: i64) -> i64 {
    MIN_GAP_MS.max(2 * step_ms)
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FillError {
    #[error("fill was cancelled")]
    Cancelled,
    #[error("fill task ended without a result")]
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillSummary {
    /// Archive batches spliced into the series.
    pub batches: usize,
}

/// Where the archive part of a window ends and the live part begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPlan {
    pub real_time_start_ms: i64,
    pub archive_start_ms: i64,
    pub archive_end_ms: i64,
    pub step_ms: i64,
    pub min_gap_ms: i64,
}

impl FillPlan {
    /// `ring_start_ms` is the timestamp of the oldest buffered live sample;
    /// without one, live data is assumed to start at `now_ms`.
    pub fn new(
        plot_start_ms: i64,
        plot_end_ms: i64,
        step_ms: i64,
        ring_start_ms: Option<i64>,
        now_ms: i64,
    ) -> Self {
        let real_time_start_ms = ring_start_ms
            .unwrap_or(now_ms)
            .min(plot_end_ms)
            .max(plot_start_ms);

        Self {
            real_time_start_ms,
            archive_start_ms: plot_start_ms,
            archive_end_ms: real_time_start_ms.min(plot_end_ms),
            step_ms,
            min_gap_ms: min_gap_ms(step_ms),
        }
    }

    pub fn archive_limit(&self) -> u64 {
        archive_limit(self.archive_start_ms, self.archive_end_ms, self.step_ms)
    }
}

/// Appends one sample per step from `start_ms` to `end_ms` using `sample`
/// for the bucket `[t - step, t]`.
///
/// Buckets without data before the first value are skipped. After that a
/// run of empty buckets leaves a single null marker. NaN values are dropped.
pub fn fill_live_region<F>(series: &mut Vec<Sample>, start_ms: i64, end_ms: i64, step_ms: i64, mut sample: F)
where
    F: FnMut(i64, i64) -> Option<f64>,
{
    if step_ms <= 0 {
        return;
    }

    let mut seen = false;
    let mut in_gap = false;
    let mut t = start_ms;
    while t <= end_ms {
        match sample(t - step_ms, t) {
            Some(v) if v.is_nan() => {}
            Some(v) => {
                series.push(Sample::new(t, v));
                seen = true;
                in_gap = false;
            }
            None => {
                if seen && !in_gap {
                    series.push(Sample::gap(t));
                    in_gap = true;
                }
            }
        }
        t += step_ms;
    }
}

/// Inserts archive batches in front of the live region, one after another.
#[derive(Debug, Clone)]
pub struct Splicer {
    index: usize,
    real_time_start_ms: i64,
    min_gap_ms: i64,
}

impl Splicer {
    pub fn new(plan: &FillPlan) -> Self {
        Self {
            index: 0,
            real_time_start_ms: plan.real_time_start_ms,
            min_gap_ms: plan.min_gap_ms,
        }
    }

    /// Splices `batch` at the insertion index. Returns false for an empty
    /// batch.
    ///
    /// When the batch starts closer than `min_gap` to the sample just before
    /// the insertion index, that sample (the previous batch's null marker or
    /// bridge) is replaced. After the batch either a null marker is left at
    /// its last timestamp, if the live data starts far away, or a bridge
    /// sample carries the last value to the live start when nothing follows.
    pub fn splice(&mut self, series: &mut Vec<Sample>, batch: Vec<Sample>) -> bool {
        let Some(last) = batch.last().copied() else {
            return false;
        };

        let mut del = 0;
        if self.index > 0 {
            if let Some(prev) = series.get(self.index - 1) {
                if batch[0].time_ms - prev.time_ms < self.min_gap_ms {
                    del = 1;
                }
            }
        }

        let at = self.index - del;
        let added = batch.len();
        series.splice(at..at + del, batch);
        self.index = at + added;

        if self.real_time_start_ms - last.time_ms > self.min_gap_ms {
            series.insert(self.index, Sample::gap(last.time_ms));
            self.index += 1;
        } else if self.index == series.len() {
            series.insert(
                self.index,
                Sample {
                    time_ms: self.real_time_start_ms,
                    value: last.value,
                },
            );
            self.index += 1;
        }
        true
    }
}

/// A running (or finished) fill of one series buffer.
pub struct FillHandle {
    buffer: SeriesBuffer,
    cancelled: Arc<AtomicBool>,
    progress: watch::Receiver<usize>,
    outcome: oneshot::Receiver<FillSummary>,
    task: Option<AbortHandle>,
}

impl FillHandle {
    /// A fill with nothing to fetch from the archive.
    pub fn completed(buffer: SeriesBuffer) -> Self {
        let (_progress_tx, progress) = watch::channel(0);
        let (outcome_tx, outcome) = oneshot::channel();
        let _ = outcome_tx.send(FillSummary { batches: 0 });
        Self {
            buffer,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress,
            outcome,
            task: None,
        }
    }

    /// Number of batches spliced so far. The sender goes away once the fill
    /// stops.
    pub fn progress(&self) -> watch::Receiver<usize> {
        self.progress.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stops the fill. No splice lands after this returns. Has no effect on
    /// a fill that already completed.
    pub fn cancel(&self) {
        let _series = self.buffer.lock();
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub async fn finished(self) -> Result<FillSummary, FillError> {
        match self.outcome.await {
            Ok(summary) => Ok(summary),
            Err(_) if self.cancelled.load(Ordering::SeqCst) => Err(FillError::Cancelled),
            Err(_) => Err(FillError::Interrupted),
        }
    }
}

/// Splices `batches` into `buffer` on a background task.
pub fn spawn_archive_fill(
    buffer: SeriesBuffer,
    mut splicer: Splicer,
    mut batches: BoxStream<'static, Vec<Sample>>,
) -> FillHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let (progress_tx, progress) = watch::channel(0);
    let (outcome_tx, outcome) = oneshot::channel();

    let task = tokio::spawn({
        let buffer = buffer.clone();
        let cancelled = cancelled.clone();
        async move {
            let mut spliced = 0;
            while let Some(batch) = batches.next().await {
                let mut series = buffer.lock();
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                if splicer.splice(&mut series, batch) {
                    spliced += 1;
                    progress_tx.send_replace(spliced);
                }
            }

            let _series = buffer.lock();
            if !cancelled.load(Ordering::SeqCst) {
                let _ = outcome_tx.send(FillSummary { batches: spliced });
            }
        }
    });

    FillHandle {
        buffer,
        cancelled,
        progress,
        outcome,
        task: Some(task.abort_handle()),
    }
}
