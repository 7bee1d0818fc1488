use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Coalescing "something changed, tick again" flag shared between the tick
/// driver, worker threads and timer callbacks.
#[derive(Debug, Default)]
pub struct WakeUpSignal {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl WakeUpSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_signal(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        *ready = true;
        self.cv.notify_all();
    }

    /// Waits until a signal arrives or `timeout` expires. Returns true and
    /// consumes the signal if one was pending.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        let (mut ready, _) = self
            .cv
            .wait_timeout_while(ready, timeout, |ready| !*ready)
            .unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *ready, false)
    }

    /// Consumes a pending signal without waiting.
    pub fn take(&self) -> bool {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *ready, false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signals_coalesce() {
        let signal = WakeUpSignal::new();
        signal.emit_signal();
        signal.emit_signal();
        assert!(signal.wait_for(Duration::from_millis(1)));
        assert!(!signal.wait_for(Duration::from_millis(1)));
    }

    #[test]
    fn wakes_from_other_thread() {
        let signal = Arc::new(WakeUpSignal::new());
        let remote = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.emit_signal();
        });
        assert!(signal.wait_for(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
