//! The editor thread. Every UI effect (status line, prompts, opening a
//! location) is funnelled through one thread so workers never touch the
//! editor directly.

use crossbeam::channel::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Called with the index of the chosen item, or `None` when the prompt is
/// dismissed.
pub type OnSelect = Box<dyn FnOnce(Option<usize>) + Send + 'static>;

/// What the engine needs from the editor shell.
pub trait Ui: Send + Sync {
    fn status_message(&self, message: &str);

    fn error_message(&self, message: &str);

    /// Shows a list of rows (each row one or more columns) to choose from.
    fn show_quick_panel(&self, items: Vec<Vec<String>>, on_select: OnSelect);

    /// Opens `path:line:col`.
    fn open_location(&self, location: &str);
}

/// A [`Ui`] that only logs. Prompts are always dismissed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl Ui for LogUi {
    fn status_message(&self, message: &str) {
        info!("{}", message);
    }

    fn error_message(&self, message: &str) {
        warn!("{}", message);
    }

    fn show_quick_panel(&self, items: Vec<Vec<String>>, on_select: OnSelect) {
        info!("Prompt with {} choices dismissed", items.len());
        on_select(None);
    }

    fn open_location(&self, location: &str) {
        info!("Open {}", location);
    }
}

/// Handle to the editor thread.
#[derive(Clone)]
pub struct MainThread {
    sender: Sender<Job>,
    ui: Arc<dyn Ui>,
}

impl MainThread {
    /// Starts the editor thread. It exits once every handle is dropped.
    pub fn spawn(ui: Arc<dyn Ui>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = channel::unbounded::<Job>();
        let handle = std::thread::spawn(move || {
            for job in receiver {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Editor job panicked");
                }
            }
        });
        (Self { sender, ui }, handle)
    }

    /// Queues `job` on the editor thread.
    pub fn run(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(job)).is_err() {
            warn!("Editor thread is gone; dropping job");
        }
    }

    pub fn ui(&self) -> Arc<dyn Ui> {
        self.ui.clone()
    }

    pub fn status_message(&self, message: impl Into<String>) {
        let ui = self.ui.clone();
        let message = message.into();
        self.run(move || ui.status_message(&message));
    }

    pub fn error_message(&self, message: impl Into<String>) {
        let ui = self.ui.clone();
        let message = message.into();
        self.run(move || ui.error_message(&message));
    }

    pub fn show_quick_panel(&self, items: Vec<Vec<String>>, on_select: OnSelect) {
        let ui = self.ui.clone();
        self.run(move || ui.show_quick_panel(items, on_select));
    }

    /// Blocks until every job queued before this call has run.
    pub fn flush(&self) {
        let (done, wait) = channel::bounded::<()>(1);
        self.run(move || {
            let _ = done.send(());
        });
        let _ = wait.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
    }

    impl Ui for Recorder {
        fn status_message(&self, message: &str) {
            self.messages.lock().push(format!("status:{}", message));
        }

        fn error_message(&self, message: &str) {
            self.messages.lock().push(format!("error:{}", message));
        }

        fn show_quick_panel(&self, _items: Vec<Vec<String>>, on_select: OnSelect) {
            on_select(Some(0));
        }

        fn open_location(&self, location: &str) {
            self.messages.lock().push(format!("open:{}", location));
        }
    }

    #[test]
    fn jobs_run_in_order_on_the_editor_thread() {
        let recorder = Arc::new(Recorder::default());
        let (main, _handle) = MainThread::spawn(recorder.clone());
        main.status_message("one");
        main.error_message("two");
        let thread = Arc::new(Mutex::new(None));
        let seen = thread.clone();
        main.run(move || *seen.lock() = Some(std::thread::current().id()));
        main.flush();
        assert_eq!(*recorder.messages.lock(), vec!["status:one", "error:two"]);
        assert_ne!(*thread.lock(), Some(std::thread::current().id()));
    }

    #[test]
    fn log_ui_dismisses_prompts() {
        let (main, _handle) = MainThread::spawn(Arc::new(LogUi));
        let (tx, rx) = channel::bounded(1);
        main.show_quick_panel(
            vec![vec!["Yes".into()], vec!["No".into()]],
            Box::new(move |choice| {
                let _ = tx.send(choice);
            }),
        );
        assert_eq!(rx.recv().ok(), Some(None));
    }
}
