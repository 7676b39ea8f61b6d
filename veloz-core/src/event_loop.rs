//! Tagged, priority-queued work dispatcher (C6, §4.5).
//!
//! A fixed pool of worker threads drains four priority bands under a single
//! lock; within a band items dequeue in posting order, and a higher-priority
//! item posted later can still run ahead of an older lower-priority one. No
//! fairness/starvation safeguard beyond the priority bands is implemented —
//! the spec leaves that optional (§9).

use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkItem {
    tags: HashSet<String>,
    job: Job,
}

#[derive(Default)]
struct Bands {
    critical: VecDeque<WorkItem>,
    high: VecDeque<WorkItem>,
    normal: VecDeque<WorkItem>,
    low: VecDeque<WorkItem>,
}

impl Bands {
    fn pop(&mut self) -> Option<WorkItem> {
        self.critical
            .pop_front()
            .or_else(|| self.high.pop_front())
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.high.is_empty() && self.normal.is_empty() && self.low.is_empty()
    }

    fn push(&mut self, priority: Priority, item: WorkItem) {
        let band = match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        };
        band.push_back(item);
    }
}

struct Shared {
    bands: Mutex<Bands>,
    cvar: Condvar,
    stopped: AtomicBool,
    filter: Mutex<Option<HashSet<String>>>,
}

pub struct EventLoop {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl EventLoop {
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            bands: Mutex::new(Bands::default()),
            cvar: Condvar::new(),
            stopped: AtomicBool::new(false),
            filter: Mutex::new(None),
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || Self::worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    fn worker_loop(shared: Arc<Shared>) {
        loop {
            let item = {
                let mut bands = shared.bands.lock();
                loop {
                    if let Some(item) = bands.pop() {
                        break Some(item);
                    }
                    if shared.stopped.load(Ordering::Acquire) {
                        break None;
                    }
                    shared.cvar.wait(&mut bands);
                }
            };

            let Some(item) = item else { return };

            let passes = {
                let filter = shared.filter.lock();
                match filter.as_ref() {
                    None => true,
                    Some(allow) => item.tags.iter().any(|t| allow.contains(t)),
                }
            };
            if passes {
                (item.job)();
            }
        }
    }

    /// Queue a work item. Tags are used by the optional allow-list filter.
    /// Returns `false` if the loop has been stopped.
    pub fn post<F>(&self, priority: Priority, tags: impl IntoIterator<Item = String>, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.stopped.load(Ordering::Acquire) {
            return false;
        }
        let item = WorkItem { tags: tags.into_iter().collect(), job: Box::new(job) };
        let mut bands = self.shared.bands.lock();
        bands.push(priority, item);
        self.shared.cvar.notify_one();
        true
    }

    /// Install (or clear, with `None`) a tag allow-list filter. Thread-safe.
    pub fn set_tag_filter(&self, filter: Option<HashSet<String>>) {
        *self.shared.filter.lock() = filter;
    }

    /// Refuse new posts and let in-flight/queued items drain (Critical
    /// items first, by construction of the pop order), then join workers.
    pub fn stop(mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.cvar.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.shared.bands.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_posted_work() {
        let el = EventLoop::new(2);
        let (tx, rx) = mpsc::channel();
        el.post(Priority::Normal, [], move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), 42);
        el.stop();
    }

    #[test]
    fn filter_drops_non_matching_tags() {
        let el = EventLoop::new(1);
        el.set_tag_filter(Some(["symbol:BTCUSDT".to_string()].into_iter().collect()));

        let (tx, rx) = mpsc::channel::<&'static str>();
        el.post(Priority::Normal, ["symbol:ETHUSDT".to_string()], {
            let tx = tx.clone();
            move || tx.send("eth").unwrap()
        });
        el.post(Priority::Normal, ["symbol:BTCUSDT".to_string()], move || tx.send("btc").unwrap());

        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), "btc");
        assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
        el.stop();
    }

    #[test]
    fn stop_drains_queued_work_before_joining() {
        let el = EventLoop::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            el.post(Priority::Low, [], move || tx.send(i).unwrap());
        }
        el.stop();
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }
}
