use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::editor::MainThread;

pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
pub const FLUSH_EVERY: usize = 30;

struct State {
    last_flush: Instant,
    count: usize,
    pending: Option<String>,
}

/// Rate limits the "Searching <file>" status line: a message reaches the
/// editor when the previous one is at least 100 ms old or on every 30th
/// update.
pub struct StatusThrottle {
    main: MainThread,
    state: Mutex<State>,
}

impl StatusThrottle {
    pub fn new(main: MainThread) -> Self {
        Self {
            main,
            state: Mutex::new(State {
                last_flush: Instant::now(),
                count: 0,
                pending: None,
            }),
        }
    }

    /// Records a message. Returns true when it was sent to the editor.
    pub fn update(&self, message: String) -> bool {
        let mut state = self.state.lock();
        state.count += 1;
        state.pending = Some(message);
        if state.count >= FLUSH_EVERY || state.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.flush_locked(&mut state);
            return true;
        }
        false
    }

    /// Sends the latest message, if one is waiting.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }

    fn flush_locked(&self, state: &mut State) {
        if let Some(message) = state.pending.take() {
            self.main.status_message(message);
        }
        state.count = 0;
        state.last_flush = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::LogUi;
    use std::sync::Arc;

    #[test]
    fn every_thirtieth_update_is_sent() {
        let (main, _handle) = MainThread::spawn(Arc::new(LogUi));
        let throttle = StatusThrottle::new(main);
        let sent = (0..FLUSH_EVERY)
            .filter(|n| throttle.update(format!("Searching {}", n)))
            .count();
        // a slow machine may also cross the interval
        assert!(sent >= 1);
        assert!(throttle.state.lock().pending.is_none());
    }

    #[test]
    fn stale_status_is_sent_at_once() {
        let (main, _handle) = MainThread::spawn(Arc::new(LogUi));
        let throttle = StatusThrottle::new(main);
        std::thread::sleep(FLUSH_INTERVAL);
        assert!(throttle.update("Searching a.cpp".into()));
        throttle.update("Searching b.cpp".into());
        throttle.flush();
        assert!(throttle.state.lock().pending.is_none());
    }
}
