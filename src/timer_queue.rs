//! Deadline-ordered callbacks running on a lazily spawned thread.
//!
//! A handler is called with `false` when its deadline passes and with `true`
//! when it is cancelled (explicitly or because the queue is dropped). Each
//! handler runs at most once, always outside the queue lock.

use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Condvar, Mutex, MutexGuard,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

type Handler = Box<dyn FnOnce(bool) + Send>;

#[derive(Default)]
struct State {
    queue: BinaryHeap<Reverse<(Instant, u64)>>,
    handlers: HashMap<u64, Handler>,
    next_id: u64,
    stop: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
pub struct TimerQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `handler` to run after `delay` and returns its id.
    pub fn add(&self, delay: Duration, handler: impl FnOnce(bool) + Send + 'static) -> Result<u64> {
        self.ensure_worker()?;
        let mut state = self.shared.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.queue.push(Reverse((Instant::now() + delay, id)));
        state.handlers.insert(id, Box::new(handler));
        drop(state);
        self.shared.cv.notify_all();
        debug!(id, ?delay, "timer scheduled");
        Ok(id)
    }

    /// Cancels a pending timer. The handler runs with `aborted == true` on
    /// the calling thread. Returns false if the timer already fired.
    pub fn cancel(&self, id: u64) -> bool {
        let handler = self.shared.lock().handlers.remove(&id);
        match handler {
            Some(handler) => {
                debug!(id, "timer cancelled");
                handler(true);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let handlers: Vec<_> = self.shared.lock().handlers.drain().collect();
        let count = handlers.len();
        for (_, handler) in handlers {
            handler(true);
        }
        count
    }

    fn ensure_worker(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_none() {
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name("bt-timer".to_owned())
                .spawn(move || run(&shared))
                .map_err(|e| Error::runtime(format!("failed to spawn timer thread: {}", e)))?;
            *worker = Some(handle);
        }
        Ok(())
    }
}

/// Tells the timer of the current activation of a node apart from timers of
/// earlier ones, which may still fire after the node was halted.
#[derive(Clone, Default)]
pub struct Activation {
    current: Arc<AtomicU64>,
    fired: Arc<AtomicU64>,
}

impl Activation {
    /// Begins a new activation and returns its id.
    pub fn start(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Ends the current activation. Its timer can no longer fire.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    /// Records that the timer of activation `id` fired. Returns false for a
    /// stale activation.
    pub fn fire(&self, id: u64) -> bool {
        self.fired.fetch_max(id, Ordering::SeqCst);
        self.current.load(Ordering::SeqCst) == id
    }

    /// Whether the timer of the current activation has fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst) == self.current.load(Ordering::SeqCst)
    }
}

fn run(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.stop {
            return;
        }
        let Some(&Reverse((deadline, id))) = state.queue.peek() else {
            state = shared.cv.wait(state).unwrap_or_else(|e| e.into_inner());
            continue;
        };
        let now = Instant::now();
        if deadline > now {
            state = shared
                .cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
            continue;
        }
        state.queue.pop();
        // Cancelled timers leave their heap entry behind with no handler.
        if let Some(handler) = state.handlers.remove(&id) {
            drop(state);
            handler(false);
            state = shared.lock();
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shared.lock().stop = true;
        self.shared.cv.notify_all();
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
        self.cancel_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_in_deadline_order() {
        let queue = TimerQueue::new();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        queue
            .add(Duration::from_millis(40), move |aborted| {
                tx2.send((2, aborted)).unwrap()
            })
            .unwrap();
        queue
            .add(Duration::from_millis(5), move |aborted| tx.send((1, aborted)).unwrap())
            .unwrap();
        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), (1, false));
        assert_eq!(rx.recv_timeout(timeout).unwrap(), (2, false));
    }

    #[test]
    fn cancel_runs_handler_as_aborted() {
        let queue = TimerQueue::new();
        let (tx, rx) = mpsc::channel();
        let id = queue
            .add(Duration::from_secs(60), move |aborted| tx.send(aborted).unwrap())
            .unwrap();
        assert!(queue.cancel(id));
        assert!(rx.recv().unwrap());
        assert!(!queue.cancel(id));
    }

    #[test]
    fn late_timer_of_a_halted_activation_is_ignored() {
        let activation = Activation::default();
        let first = activation.start();
        activation.invalidate();
        let second = activation.start();
        assert!(!activation.fire(first));
        assert!(!activation.has_fired());
        assert!(activation.fire(second));
        assert!(activation.has_fired());
        activation.start();
        assert!(!activation.has_fired());
    }

    #[test]
    fn drop_aborts_pending() {
        let (tx, rx) = mpsc::channel();
        {
            let queue = TimerQueue::new();
            queue
                .add(Duration::from_secs(60), move |aborted| tx.send(aborted).unwrap())
                .unwrap();
        }
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
