use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

/// Default minimum spacing between progress notifications.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with transfer progress.
pub type ProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub transferred: u64,
    pub total: u64,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0, 1]`. An empty transfer counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.transferred as f64 / self.total as f64).min(1.0)
    }
}

/// Byte counter shared by every worker of one transfer.
///
/// Counters are atomic so workers on tasks and OS threads can update them
/// without coordination. Callbacks fire at most once per interval from
/// [`add`](Self::add), and unconditionally from [`notify`](Self::notify).
pub struct TransferProgress {
    transferred: AtomicU64,
    total: AtomicU64,
    speed: SpeedCalculator,
    callbacks: RwLock<Vec<ProgressCallback>>,
    last_notify: Mutex<Option<Instant>>,
    interval: Duration,
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for TransferProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferProgress")
            .field("transferred", &self.transferred())
            .field("total", &self.total())
            .finish_non_exhaustive()
    }
}

impl TransferProgress {
    /// Creates a tracker. If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            transferred: AtomicU64::new(0),
            total: AtomicU64::new(0),
            speed: SpeedCalculator::new(None, None),
            callbacks: RwLock::new(Vec::new()),
            last_notify: Mutex::new(None),
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Resets the counter to `bytes`, e.g. the size already present when a
    /// transfer resumes. Does not feed the speed estimate.
    pub fn set_transferred(&self, bytes: u64) {
        self.transferred.store(bytes, Ordering::Relaxed);
        self.speed.reset();
    }

    /// Records `bytes` more transferred and notifies if the interval elapsed.
    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
        self.speed.add_sample(bytes);

        let due = {
            let mut last = lock(&self.last_notify);
            let now = Instant::now();
            match *last {
                Some(at) if now.duration_since(at) < self.interval => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };
        if due {
            self.notify();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let transferred = self.transferred();
        let total = self.total();
        ProgressSnapshot {
            transferred,
            total,
            bytes_per_second: self.speed.bytes_per_second(),
            eta: self.speed.eta(total.saturating_sub(transferred)),
        }
    }

    /// Invokes every callback with the current snapshot.
    pub fn notify(&self) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        if callbacks.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for cb in callbacks.iter() {
            cb(&snapshot);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Throughput over a sliding time window, bounded in sample count.
pub struct SpeedCalculator {
    window: Mutex<SpeedWindow>,
}

struct SpeedWindow {
    samples: VecDeque<(Instant, u64)>,
    /// Sum of `samples` bytes, minus the oldest sample's.
    bytes_after_first: u64,
    span: Duration,
    capacity: usize,
}

impl SpeedWindow {
    fn pop_oldest(&mut self) {
        self.samples.pop_front();
        if let Some(&(_, bytes)) = self.samples.front() {
            self.bytes_after_first -= bytes;
        } else {
            self.bytes_after_first = 0;
        }
    }
}

impl SpeedCalculator {
    /// `span` defaults to 5 s and `capacity` to 100 samples.
    pub fn new(span: Option<Duration>, capacity: Option<usize>) -> Self {
        Self {
            window: Mutex::new(SpeedWindow {
                samples: VecDeque::new(),
                bytes_after_first: 0,
                span: span.unwrap_or(Duration::from_secs(5)),
                capacity: capacity.unwrap_or(100).max(2),
            }),
        }
    }

    pub fn add_sample(&self, bytes: u64) {
        let now = Instant::now();
        let mut w = lock(&self.window);
        if !w.samples.is_empty() {
            w.bytes_after_first += bytes;
        }
        w.samples.push_back((now, bytes));

        while w.samples.len() > w.capacity
            || w
                .samples
                .front()
                .is_some_and(|&(at, _)| now.duration_since(at) > w.span)
        {
            w.pop_oldest();
        }
    }

    /// Bytes per second between the oldest and newest sample in the window.
    /// Zero until two samples with distinct instants exist.
    pub fn bytes_per_second(&self) -> f64 {
        let w = lock(&self.window);
        let (Some(&(first, _)), Some(&(last, _))) = (w.samples.front(), w.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        w.bytes_after_first as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        match self.bytes_per_second() {
            rate if rate > 0.0 => Duration::try_from_secs_f64(remaining_bytes as f64 / rate).ok(),
            _ => None,
        }
    }

    pub fn reset(&self) {
        let mut w = lock(&self.window);
        w.samples.clear();
        w.bytes_after_first = 0;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.window).samples.len()
    }
}
