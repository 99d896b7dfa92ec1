//! The Submission Watcher: recursively watches a submissions directory for
//! new or modified `.cpp` files and invokes a callback once per debounced
//! event, on a single worker thread.
//!
//! Grounded directly in `original_source/SubmissionWatcher.cpp`: the
//! `.cpp`-extension filter, the 500ms per-path debounce window keyed on the
//! event path, the mutex/condvar-guarded queue (`SubmissionQueue`), and the
//! two-thread shape (one thread turns raw filesystem events into debounced
//! pushes, a second drains the queue into the callback) are carried over
//! almost one-to-one. The original's `efsw::FileWatcher` is replaced by the
//! `notify` crate, already a `judge` dependency for exactly this purpose;
//! `notify`'s own short internal debounce only coalesces duplicate raw OS
//! events; the 500ms application-level debounce below is the original's.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{error, warn};
use notify::{DebouncedEvent, RecommendedWatcher, RecursiveMode, Watcher};

use crate::{Error, ErrorKind, Result};

/// Debounce window: a second event for the same path within this interval
/// of the first is dropped.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// `notify`'s own internal coalescing window, distinct from the
/// application-level debounce above.
const NOTIFY_INTERNAL_DEBOUNCE: Duration = Duration::from_millis(100);

/// The callback invoked once per debounced submission event, on the
/// watcher's single worker thread.
pub type SubmissionCallback = Box<dyn Fn(&Path) + Send + 'static>;

struct SubmissionQueue {
    items: Mutex<(VecDeque<PathBuf>, bool)>,
    cond: Condvar,
}

impl SubmissionQueue {
    fn new() -> SubmissionQueue {
        SubmissionQueue {
            items: Mutex::new((VecDeque::new(), true)),
            cond: Condvar::new(),
        }
    }

    fn push(&self, path: PathBuf) {
        let mut guard = self.items.lock().unwrap();
        guard.0.push_back(path);
        self.cond.notify_one();
    }

    /// Block until an item is available or the queue has been shut down.
    /// Returns `None` once shut down with nothing left to drain.
    fn pop(&self) -> Option<PathBuf> {
        let mut guard = self.items.lock().unwrap();
        loop {
            if let Some(path) = guard.0.pop_front() {
                return Some(path);
            }
            if !guard.1 {
                return None;
            }
            guard = self.cond.wait(guard).unwrap();
        }
    }

    fn shutdown(&self) {
        let mut guard = self.items.lock().unwrap();
        guard.1 = false;
        self.cond.notify_all();
    }
}

fn event_paths(event: DebouncedEvent) -> Vec<PathBuf> {
    match event {
        DebouncedEvent::Create(path) | DebouncedEvent::Write(path) | DebouncedEvent::Chmod(path) => vec![path],
        DebouncedEvent::Rename(_, to) => vec![to],
        DebouncedEvent::Error(e, path) => {
            warn!("submission watcher received an error event: {} ({:?})", e, path);
            vec![]
        }
        _ => vec![],
    }
}

/// Recursively watches `dir` for `.cpp` file creation/modification events,
/// debounces them per path, and runs `callback` for each surviving event on
/// a dedicated worker thread.
pub struct SubmissionWatcher {
    queue: Arc<SubmissionQueue>,
    feeder: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    _watcher: RecommendedWatcher,
    stopped: Arc<Mutex<bool>>,
}

impl SubmissionWatcher {
    /// Start watching `dir` immediately, spawning the feeder thread (raw
    /// events → debounced queue pushes) and the worker thread (queue →
    /// callback invocations).
    pub fn start(dir: &Path, callback: SubmissionCallback) -> Result<SubmissionWatcher> {
        let (tx, rx) = channel();
        let mut watcher: RecommendedWatcher = Watcher::new(tx, NOTIFY_INTERNAL_DEBOUNCE)
            .map_err(|e| Error::from(ErrorKind::Internal(format!("failed to create file watcher: {}", e))))?;
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|e| Error::from(ErrorKind::Internal(format!("failed to watch '{}': {}", dir.display(), e))))?;

        let queue = Arc::new(SubmissionQueue::new());
        let stopped = Arc::new(Mutex::new(false));

        let feeder_queue = Arc::clone(&queue);
        let feeder_stopped = Arc::clone(&stopped);
        let feeder = std::thread::spawn(move || {
            let mut seen: HashMap<PathBuf, Instant> = HashMap::new();
            loop {
                if *feeder_stopped.lock().unwrap() {
                    break;
                }
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(event) => {
                        for path in event_paths(event) {
                            if path.extension().and_then(|e| e.to_str()) != Some("cpp") {
                                continue;
                            }

                            let now = Instant::now();
                            let debounced = matches!(
                                seen.get(&path),
                                Some(last) if now.duration_since(*last) < DEBOUNCE_WINDOW
                            );
                            seen.insert(path.clone(), now);

                            if !debounced {
                                feeder_queue.push(path);
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::spawn(move || {
            while let Some(path) = worker_queue.pop() {
                callback(&path);
            }
        });

        Ok(SubmissionWatcher {
            queue,
            feeder: Some(feeder),
            worker: Some(worker),
            _watcher: watcher,
            stopped,
        })
    }

    /// Stop watching, wake both threads, and block until they exit. No
    /// further callback invocations happen after this returns. Idempotent.
    pub fn stop(&mut self) {
        *self.stopped.lock().unwrap() = true;
        self.queue.shutdown();

        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                error!("submission watcher feeder thread panicked");
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("submission watcher worker thread panicked");
            }
        }
    }

    /// Block until the worker thread exits on its own (only happens after
    /// `stop()`, since otherwise the queue never reports shutdown).
    pub fn wait(self) {
        if let Some(feeder) = self.feeder {
            let _ = feeder.join();
        }
        if let Some(worker) = self.worker {
            let _ = worker.join();
        }
    }
}

impl Drop for SubmissionWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn starts_and_stops_cleanly_on_empty_directory() {
        let dir = std::env::temp_dir().join(format!("watcher-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let mut watcher = SubmissionWatcher::start(&dir, Box::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })).unwrap();

        watcher.stop();
        assert_eq!(0, count.load(Ordering::SeqCst));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn detects_a_new_cpp_file() {
        let dir = std::env::temp_dir().join(format!("watcher-test-cpp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let mut watcher = SubmissionWatcher::start(&dir, Box::new(move |path| {
            if path.extension().and_then(|e| e.to_str()) == Some("cpp") {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }
        })).unwrap();

        std::fs::write(dir.join("a.cpp"), b"int main(){}").unwrap();
        std::thread::sleep(Duration::from_millis(500));

        watcher.stop();
        assert!(count.load(Ordering::SeqCst) >= 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
