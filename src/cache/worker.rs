use crossbeam::channel::Receiver;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{Inner, OnDone, Queued, Task};

/// Starts `count` workers. They hold the cache weakly and stop once every
/// handle to it is gone and the queue is closed.
pub(super) fn spawn_workers(inner: &Arc<Inner>, receiver: Receiver<Queued>, count: usize) {
    let delay = inner.config.startup_delay;
    for n in 0..count {
        let cache = Arc::downgrade(inner);
        let receiver = receiver.clone();
        std::thread::spawn(move || {
            if !delay.is_zero() {
                // let the editor finish starting up first
                std::thread::sleep(delay);
            }
            for queued in receiver.iter() {
                let Some(inner) = cache.upgrade() else {
                    break;
                };
                inner.run_task(queued);
                inner.pending.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("Cache worker {} stopped", n);
        });
    }
    debug!("Started {} cache workers", count);
}

/// Releases a file's busy slot and turn, and its parsing count for parse
/// tasks, however the task ends.
struct BusyGuard<'a> {
    inner: &'a Inner,
    filename: PathBuf,
    ticket: u64,
    parse_task: bool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.parse_task {
            let mut parsing = self.inner.parsing.lock();
            if let Some(count) = parsing.get_mut(&self.filename) {
                *count -= 1;
                if *count == 0 {
                    parsing.remove(&self.filename);
                }
            }
        }
        let mut busy = self.inner.busy.lock();
        {
            let mut turns = self.inner.turns.lock();
            if let Some(turn) = turns.get_mut(&self.filename) {
                turn.served = turn.served.max(self.ticket + 1);
                if turn.served >= turn.issued {
                    turns.remove(&self.filename);
                }
            }
        }
        busy.remove(&self.filename);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Inner {
    /// Claims the busy slot of a file for the task holding `ticket`. False
    /// when another worker holds the slot or an earlier task for the file
    /// has not run yet.
    fn claim(&self, filename: &Path, ticket: u64) -> bool {
        let mut busy = self.busy.lock();
        if busy.contains(filename) {
            return false;
        }
        let in_turn = self
            .turns
            .lock()
            .get(filename)
            .map_or(true, |turn| turn.served == ticket);
        in_turn && busy.insert(filename.to_path_buf())
    }

    pub(super) fn run_task(&self, queued: Queued) {
        let slot = queued.task.filename().map(Path::to_path_buf).zip(queued.ticket);
        let label = match &slot {
            Some((filename, _)) => filename.display().to_string(),
            None => "<all>".to_string(),
        };
        let _guard = match slot {
            Some((filename, ticket)) => {
                if !self.claim(&filename, ticket) {
                    // someone else is working on this file; try again later
                    if self.tasks.is_empty() {
                        std::thread::sleep(self.config.busy_retry_delay);
                    }
                    self.requeue(queued);
                    return;
                }
                Some(BusyGuard {
                    inner: self,
                    filename,
                    ticket,
                    parse_task: queued.task.is_parse(),
                })
            }
            None => None,
        };
        match catch_unwind(AssertUnwindSafe(|| self.execute(queued.task))) {
            Ok(Some(on_done)) => {
                drop(_guard);
                self.main.run(on_done);
            }
            Ok(None) => {}
            Err(payload) => error!(
                "Cache task for {} panicked: {}",
                label,
                panic_message(payload.as_ref())
            ),
        }
    }

    fn execute(&self, task: Task) -> Option<OnDone> {
        match task {
            Task::Parse { request, on_done } => {
                let name = request.filename.display().to_string();
                self.main.status_message(format!("Parsing {}", name));
                let parsed = self.get_translation_unit(&request, &[]).is_some();
                self.main.status_message(if parsed {
                    format!("Parsing {} done", name)
                } else {
                    format!("Parsing {} failed", name)
                });
                on_done
            }
            Task::Reparse {
                request,
                unsaved,
                on_done,
            } => {
                let name = request.filename.display().to_string();
                self.main.status_message(format!("Reparsing {}", name));
                if let Some(entry) = self.get_translation_unit(&request, &unsaved) {
                    match entry.reparse(&unsaved) {
                        Ok(()) => self.main.status_message(format!("Reparsing {} done", name)),
                        Err(e) => warn!("Reparse of {} failed: {}", name, e),
                    }
                }
                on_done
            }
            Task::Remove(filename) => {
                if self.tus.lock().remove(&filename).is_some() {
                    debug!("Removed {} from the cache", filename.display());
                }
                self.opts_cache.lock().remove(&filename);
                None
            }
            Task::Clear => {
                self.tus.lock().clear();
                self.opts_cache.lock().clear();
                self.search_cache.clear();
                debug!("Cache cleared");
                None
            }
            Task::Analyze { request, on_done } => {
                self.analyze(&request, on_done);
                None
            }
            #[cfg(test)]
            Task::Fail(filename) => panic!("task for {} failed", filename.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_read_from_the_payload() {
        let payload = catch_unwind(|| panic!("lost {} tasks", 3)).expect_err("panicked");
        assert_eq!(panic_message(payload.as_ref()), "lost 3 tasks");
        let payload = catch_unwind(|| panic!("static message")).expect_err("panicked");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload = catch_unwind(|| std::panic::panic_any(7_u8)).expect_err("panicked");
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
