//! State the editor shell polls for: goto jobs that finish after the
//! request returned, selection prompts awaiting an answer and queued
//! status messages.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::editor::{OnSelect, Ui};
use crate::goto::{GotoCallback, GotoTarget};

/// Messages kept for the shell to drain; older ones are dropped.
const MAX_MESSAGES: usize = 256;

// ---------------------------------------------------------------------------
// Goto jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Done { target: Option<GotoTarget> },
}

#[derive(Default)]
pub struct Jobs {
    jobs: DashMap<String, JobState>,
}

impl Jobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending job. The returned callback records the result
    /// and wakes the receiver.
    pub fn start(self: &Arc<Self>) -> (String, GotoCallback, oneshot::Receiver<Option<GotoTarget>>) {
        let id = uuid::Uuid::new_v4().to_string();
        self.jobs.insert(id.clone(), JobState::Pending);
        let (tx, rx) = oneshot::channel();
        let jobs = self.clone();
        let job_id = id.clone();
        let callback: GotoCallback = Box::new(move |target| {
            jobs.jobs.insert(
                job_id,
                JobState::Done {
                    target: target.clone(),
                },
            );
            let _ = tx.send(target);
        });
        (id, callback, rx)
    }

    pub fn get(&self, id: &str) -> Option<JobState> {
        self.jobs.get(id).map(|j| j.value().clone())
    }

    /// Forgets a finished job once its result was collected.
    pub fn take_done(&self, id: &str) -> Option<JobState> {
        self.jobs
            .remove_if(id, |_, state| matches!(state, JobState::Done { .. }))
            .map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

struct PendingPrompt {
    items: Vec<Vec<String>>,
    created_at: DateTime<Utc>,
    on_select: Mutex<Option<OnSelect>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptView {
    pub id: String,
    pub items: Vec<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct Prompts {
    pending: DashMap<String, PendingPrompt>,
}

impl Prompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, items: Vec<Vec<String>>, on_select: OnSelect) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.pending.insert(
            id.clone(),
            PendingPrompt {
                items,
                created_at: Utc::now(),
                on_select: Mutex::new(Some(on_select)),
            },
        );
        id
    }

    /// Open prompts, oldest first.
    pub fn list(&self) -> Vec<PromptView> {
        let mut prompts: Vec<PromptView> = self
            .pending
            .iter()
            .map(|entry| PromptView {
                id: entry.key().clone(),
                items: entry.items.clone(),
                created_at: entry.created_at,
            })
            .collect();
        prompts.sort_by_key(|p| p.created_at);
        prompts
    }

    /// Removes a prompt and returns its handler. A choice out of range
    /// counts as dismissal.
    pub fn answer(&self, id: &str, choice: Option<usize>) -> Option<(OnSelect, Option<usize>)> {
        let (_, prompt) = self.pending.remove(id)?;
        let choice = choice.filter(|c| *c < prompt.items.len());
        let on_select = prompt.on_select.lock().take()?;
        Some((on_select, choice))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Status,
    Error,
    Open,
    /// A static analyzer finding, `file:line:col - description`.
    Analysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct Messages {
    queue: Mutex<VecDeque<Message>>,
}

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: MessageKind, text: &str) {
        let mut queue = self.queue.lock();
        if queue.len() >= MAX_MESSAGES {
            queue.pop_front();
        }
        queue.push_back(Message {
            kind,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn drain(&self) -> Vec<Message> {
        self.queue.lock().drain(..).collect()
    }
}

/// The editor sink of the HTTP server: everything the engine shows is
/// queued for the shell to poll.
pub struct ServerUi {
    prompts: Arc<Prompts>,
    messages: Arc<Messages>,
}

impl ServerUi {
    pub fn new(prompts: Arc<Prompts>, messages: Arc<Messages>) -> Self {
        Self { prompts, messages }
    }
}

impl Ui for ServerUi {
    fn status_message(&self, message: &str) {
        self.messages.push(MessageKind::Status, message);
    }

    fn error_message(&self, message: &str) {
        self.messages.push(MessageKind::Error, message);
    }

    fn show_quick_panel(&self, items: Vec<Vec<String>>, on_select: OnSelect) {
        let id = self.prompts.push(items, on_select);
        tracing::debug!("Prompt {} waiting for an answer", id);
    }

    fn open_location(&self, location: &str) {
        self.messages.push(MessageKind::Open, location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_record_their_result() {
        let jobs = Arc::new(Jobs::new());
        let (id, callback, mut rx) = jobs.start();
        assert_eq!(jobs.get(&id), Some(JobState::Pending));
        assert!(jobs.take_done(&id).is_none());

        callback(Some(GotoTarget::Location("/w/a.cpp:3:5".into())));
        let done = JobState::Done {
            target: Some(GotoTarget::Location("/w/a.cpp:3:5".into())),
        };
        assert_eq!(jobs.get(&id), Some(done.clone()));
        assert_eq!(
            rx.try_recv().ok(),
            Some(Some(GotoTarget::Location("/w/a.cpp:3:5".into())))
        );
        assert_eq!(jobs.take_done(&id), Some(done));
        assert!(jobs.is_empty());
    }

    #[test]
    fn prompts_answer_once() {
        let prompts = Prompts::new();
        let chosen = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = chosen.clone();
        let id = prompts.push(
            vec![vec!["Yes".into()], vec!["No".into()]],
            Box::new(move |c| seen.store(c.unwrap_or(99), Ordering::SeqCst)),
        );
        assert_eq!(prompts.list().len(), 1);

        let (on_select, choice) = prompts.answer(&id, Some(5)).expect("pending");
        assert_eq!(choice, None);
        on_select(choice);
        assert_eq!(chosen.load(Ordering::SeqCst), 99);
        assert!(prompts.answer(&id, Some(0)).is_none());
    }

    #[test]
    fn messages_drain_in_order_and_cap() {
        let messages = Messages::new();
        for i in 0..MAX_MESSAGES + 2 {
            messages.push(MessageKind::Status, &i.to_string());
        }
        let drained = messages.drain();
        assert_eq!(drained.len(), MAX_MESSAGES);
        assert_eq!(drained[0].text, "2");
        assert!(messages.drain().is_empty());
    }
}
