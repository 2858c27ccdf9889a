use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use crate::error::{Result, StackerError};

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Analyze,
    Select,
    GlobalAlign,
    LocalAlign,
    Stack,
    Sharpen,
    Done,
}

impl PipelineStage {
    /// Slice of the overall 0..=100 progress scale owned by this stage.
    pub fn progress_range(self) -> (u32, u32) {
        match self {
            Self::Analyze => (0, 30),
            Self::Select => (30, 32),
            Self::GlobalAlign => (32, 55),
            Self::LocalAlign => (55, 70),
            Self::Stack => (70, 92),
            Self::Sharpen => (92, 100),
            Self::Done => (100, 100),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analyze => write!(f, "Analyzing frames"),
            Self::Select => write!(f, "Selecting best frames"),
            Self::GlobalAlign => write!(f, "Aligning frames"),
            Self::LocalAlign => write!(f, "Refining local alignment"),
            Self::Stack => write!(f, "Stacking frames"),
            Self::Sharpen => write!(f, "Sharpening"),
            Self::Done => write!(f, "Complete"),
        }
    }
}

/// Receiver of progress notifications.
///
/// `percent` never decreases over one pipeline run, and every call arrives
/// on the thread that started the run. Closures of the form `Fn(u32, &str)`
/// implement this trait, so callers bind their own context.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, percent: u32, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(u32, &str) + Send + Sync,
{
    fn notify(&self, percent: u32, message: &str) {
        self(percent, message)
    }
}

/// Sink that discards every notification.
pub struct NoOpSink;

impl ProgressSink for NoOpSink {
    fn notify(&self, _percent: u32, _message: &str) {}
}

/// Serializes progress from any number of workers into one sink.
///
/// Workers call [`ProgressReporter::advance`] concurrently; the reporter maps
/// item counts into the current stage's range and drops notifications that
/// would not move the integer percentage, so the caller never sees
/// decreasing values. Inside [`ProgressReporter::parallel`] worker updates
/// are queued on a channel and delivered by the thread that opened it.
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    last_percent: Mutex<Option<u32>>,
    outbox: Mutex<Option<mpsc::Sender<Update>>>,
    /// Stage stretched over the whole 0..=100 scale.
    solo: Option<PipelineStage>,
}

struct Update {
    percent: u32,
    message: String,
    boundary: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            last_percent: Mutex::new(None),
            outbox: Mutex::new(None),
            solo: None,
        }
    }

    /// Reporter for a run that consists of `stage` alone: the stage spans
    /// 0..=100 instead of its slice of the pipeline.
    pub fn single_stage(sink: &'a dyn ProgressSink, stage: PipelineStage) -> Self {
        Self {
            solo: Some(stage),
            ..Self::new(sink)
        }
    }

    fn range(&self, stage: PipelineStage) -> (u32, u32) {
        if self.solo == Some(stage) {
            (0, 100)
        } else {
            stage.progress_range()
        }
    }

    pub fn begin_stage(&self, stage: PipelineStage) {
        let (lo, _) = self.range(stage);
        self.emit(lo, stage.to_string(), true);
    }

    /// `done` of `total` work items in `stage` have completed.
    pub fn advance(&self, stage: PipelineStage, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let (lo, hi) = self.range(stage);
        let fraction = done.min(total) as f64 / total as f64;
        let percent = lo + ((hi - lo) as f64 * fraction).floor() as u32;
        self.emit(percent, format!("{stage} ({done}/{total})"), false);
    }

    pub fn finish_stage(&self, stage: PipelineStage) {
        let (_, hi) = self.range(stage);
        self.emit(hi, stage.to_string(), true);
    }

    /// Run `work` on a scoped thread while the calling thread delivers the
    /// progress it reports. Nested calls run `work` directly.
    pub fn parallel<R, F>(&self, work: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        let (tx, rx) = mpsc::channel();
        {
            let mut outbox = lock(&self.outbox);
            if outbox.is_some() {
                drop(outbox);
                return work();
            }
            *outbox = Some(tx);
        }

        std::thread::scope(|scope| {
            let worker = scope.spawn(|| {
                let _close = CloseOutbox(&self.outbox);
                work()
            });
            for update in rx {
                self.deliver(update.percent, &update.message, update.boundary);
            }
            match worker.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    fn emit(&self, percent: u32, message: String, boundary: bool) {
        if let Some(tx) = lock(&self.outbox).as_ref() {
            // The receiver outlives every sender.
            let _ = tx.send(Update {
                percent,
                message,
                boundary,
            });
            return;
        }
        self.deliver(percent, &message, boundary);
    }

    fn deliver(&self, percent: u32, message: &str, boundary: bool) {
        let mut last = lock(&self.last_percent);
        let floor = last.unwrap_or(0);
        if !boundary && last.is_some() && percent <= floor {
            return;
        }
        let percent = percent.max(floor).min(100);
        *last = Some(percent);
        self.sink.notify(percent, message);
    }
}

/// Drops the queue's only sender, which ends the delivery loop, even when
/// the work panics.
struct CloseOutbox<'r>(&'r Mutex<Option<mpsc::Sender<Update>>>);

impl Drop for CloseOutbox<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StackerError::Cancelled)
        } else {
            Ok(())
        }
    }
}
