//! Debounced note autosave
//!
//! One worker task per open editor. Every edit restarts a countdown;
//! when it elapses without another edit the worker issues a single
//! `save_content` with the latest title and content. Writes are
//! serialized by the worker, so they can never land out of order.
//!
//! State machine:
//! - `Idle` --edit--> `PendingWrite(deadline)`
//! - `PendingWrite` --edit--> `PendingWrite(new deadline)`
//! - `PendingWrite` --deadline--> `Writing` --done--> `Idle`
//! - `Writing` --transport failure--> `PendingWrite(new deadline)`
//!
//! Any other failed write leaves the draft dirty until the next edit or
//! flush.
//!
//! Closing the editor with a pending countdown drops those edits unless
//! the caller asks for `NavigationPolicy::FlushPending`.

use crate::database::Note;
use crate::error::{AppError, ErrorKind, Result};
use crate::repository::NotesRepository;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// What happens to unsaved edits when the editor closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NavigationPolicy {
    /// Cancel the countdown; trailing edits are lost
    #[default]
    DiscardPending,
    /// Persist unsaved edits before closing
    FlushPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    PendingWrite { deadline: Instant },
    Writing,
}

/// Observable autosave progress for an editor
#[derive(Debug, Clone, PartialEq)]
pub struct AutosaveStatus {
    pub state: SaveState,
    pub last_saved: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Successful writes since the editor opened
    pub writes: u64,
    /// The draft differs from what is stored remotely
    pub dirty: bool,
}

enum Command {
    Edit { title: String, content: String },
    Flush(oneshot::Sender<Result<()>>),
    Close {
        policy: NavigationPolicy,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Editor-side handle to an autosave worker.
///
/// Dropping the handle behaves like closing with `DiscardPending`.
pub struct AutosaveHandle {
    note_id: String,
    title: String,
    content: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<AutosaveStatus>,
}

impl AutosaveHandle {
    /// Start a worker for `note`, debouncing writes by `delay`
    pub fn spawn(repo: NotesRepository, note: &Note, delay: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(AutosaveStatus {
            state: SaveState::Idle,
            last_saved: None,
            last_error: None,
            writes: 0,
            dirty: false,
        });

        let worker = Worker {
            repo,
            note_id: note.id.clone(),
            delay,
            persisted: (note.title.clone(), note.content.clone()),
            draft: (note.title.clone(), note.content.clone()),
            deadline: None,
            status: status_tx,
        };

        tracing::debug!("Starting autosave for note {} ({:?})", note.id, delay);
        tokio::spawn(worker.run(rx));

        Self {
            note_id: note.id.clone(),
            title: note.title.clone(),
            content: note.content.clone(),
            commands,
            status,
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    /// Current local title, including unsaved edits
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Record an edit and restart the countdown
    pub fn edit(&mut self, title: &str, content: &str) -> Result<()> {
        self.title = title.to_string();
        self.content = content.to_string();
        self.send(Command::Edit {
            title: self.title.clone(),
            content: self.content.clone(),
        })
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        let content = self.content.clone();
        self.edit(title, &content)
    }

    pub fn set_content(&mut self, content: &str) -> Result<()> {
        let title = self.title.clone();
        self.edit(&title, content)
    }

    /// Write unsaved edits now instead of waiting for the countdown
    pub async fn flush(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Flush(reply))?;
        done.await.map_err(|_| worker_stopped())?
    }

    /// Stop the worker, handling unsaved edits per `policy`
    pub async fn close(self, policy: NavigationPolicy) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Close { policy, reply })?;
        done.await.map_err(|_| worker_stopped())?
    }

    pub fn status(&self) -> AutosaveStatus {
        self.status.borrow().clone()
    }

    /// Edits not yet stored, including ones whose write failed
    pub fn has_unsaved_changes(&self) -> bool {
        let status = self.status.borrow();
        status.dirty || !matches!(status.state, SaveState::Idle)
    }

    pub fn subscribe(&self) -> watch::Receiver<AutosaveStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| worker_stopped())
    }
}

fn worker_stopped() -> AppError {
    AppError::Generic("Autosave worker has stopped".to_string())
}

struct Worker {
    repo: NotesRepository,
    note_id: String,
    delay: Duration,
    /// Last values known to be stored remotely
    persisted: (String, String),
    draft: (String, String),
    deadline: Option<Instant>,
    status: watch::Sender<AutosaveStatus>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = match self.deadline {
                Some(deadline) => tokio::select! {
                    command = commands.recv() => command,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.deadline = None;
                        if let Err(e) = self.write().await {
                            if e.kind() == ErrorKind::Transport {
                                self.arm();
                            }
                        }
                        continue;
                    }
                },
                None => commands.recv().await,
            };

            match command {
                Some(Command::Edit { title, content }) => {
                    self.draft = (title, content);
                    self.arm();
                }
                Some(Command::Flush(reply)) => {
                    self.deadline = None;
                    let _ = reply.send(self.write().await);
                }
                Some(Command::Close { policy, reply }) => {
                    let result = match policy {
                        NavigationPolicy::FlushPending => self.write().await,
                        NavigationPolicy::DiscardPending => {
                            self.discard();
                            Ok(())
                        }
                    };
                    let _ = reply.send(result);
                    break;
                }
                None => {
                    self.discard();
                    break;
                }
            }
        }

        tracing::debug!("Autosave for note {} stopped", self.note_id);
    }

    fn is_dirty(&self) -> bool {
        self.draft != self.persisted
    }

    /// Start or restart the countdown
    fn arm(&mut self) {
        let deadline = Instant::now() + self.delay;
        self.deadline = Some(deadline);
        let dirty = self.is_dirty();
        self.status.send_modify(|status| {
            status.state = SaveState::PendingWrite { deadline };
            status.dirty = dirty;
        });
    }

    fn discard(&mut self) {
        if self.is_dirty() {
            tracing::warn!(
                "Discarding unsaved edits to note {} on close",
                self.note_id
            );
        }
        self.deadline = None;
        self.set_state(SaveState::Idle);
    }

    async fn write(&mut self) -> Result<()> {
        if !self.is_dirty() {
            self.status.send_modify(|status| {
                status.state = SaveState::Idle;
                status.dirty = false;
            });
            return Ok(());
        }

        self.set_state(SaveState::Writing);
        let (title, content) = self.draft.clone();

        match self.repo.save_content(&self.note_id, &title, &content).await {
            Ok(()) => {
                tracing::debug!("Autosaved note {}", self.note_id);
                self.persisted = (title, content);
                self.status.send_modify(|status| {
                    status.state = SaveState::Idle;
                    status.last_saved = Some(Utc::now());
                    status.last_error = None;
                    status.writes += 1;
                    status.dirty = false;
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!("Autosave of note {} failed: {}", self.note_id, e);
                self.status.send_modify(|status| {
                    status.state = SaveState::Idle;
                    status.last_error = Some(e.to_string());
                    status.dirty = true;
                });
                Err(e)
            }
        }
    }

    fn set_state(&self, state: SaveState) {
        self.status.send_modify(|status| status.state = state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewNote;
    use crate::repository::testing::MemoryTables;
    use serde_json::json;
    use std::sync::Arc;

    const DELAY: Duration = Duration::from_millis(800);

    async fn setup() -> (Arc<MemoryTables>, NotesRepository, Note) {
        let tables = Arc::new(MemoryTables::default());
        let repo = NotesRepository::new(tables.clone());
        let note = repo.create("u1", &NewNote::default()).await.unwrap();
        (tables, repo, note)
    }

    async fn pause(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_write_once_with_final_values() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);

        editor.edit("D", "").unwrap();
        pause(300).await;
        editor.edit("Dr", "a").unwrap();
        pause(700).await;
        editor.edit("Draft", "ab").unwrap();
        pause(799).await;
        assert!(tables.updates_for(&note.id).is_empty());

        pause(10).await;

        let updates = tables.updates_for(&note.id);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["title"], json!("Draft"));
        assert_eq!(updates[0]["content"], json!("ab"));
        assert_eq!(editor.status().writes, 1);
        assert_eq!(editor.status().state, SaveState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separated_edits_write_each_time() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);

        editor.set_title("One").unwrap();
        pause(1000).await;
        editor.set_content("body").unwrap();
        pause(1000).await;

        let updates = tables.updates_for(&note.id);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1]["title"], json!("One"));
        assert_eq!(updates[1]["content"], json!("body"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_draft_is_not_written() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);

        editor.edit(&note.title, &note.content).unwrap();
        pause(1000).await;

        assert!(tables.updates_for(&note.id).is_empty());
        assert!(!editor.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_pending_edits_by_default() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);

        editor.edit("Lost", "edit").unwrap();
        pause(100).await;
        editor.close(NavigationPolicy::default()).await.unwrap();
        pause(2000).await;

        assert!(tables.updates_for(&note.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_can_flush_pending_edits() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);

        editor.edit("Kept", "edit").unwrap();
        editor.close(NavigationPolicy::FlushPending).await.unwrap();

        let updates = tables.updates_for(&note.id);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["title"], json!("Kept"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);

        editor.edit("Now", "").unwrap();
        editor.flush().await.unwrap();
        assert_eq!(tables.updates_for(&note.id).len(), 1);

        pause(2000).await;
        assert_eq!(tables.updates_for(&note.id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_reported() {
        let tables = Arc::new(MemoryTables::default());
        let repo = NotesRepository::new(tables.clone());
        let ghost = Note {
            id: "missing".to_string(),
            user_id: "u1".to_string(),
            folder_id: None,
            title: "t".to_string(),
            content: String::new(),
            is_public: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut editor = AutosaveHandle::spawn(repo, &ghost, DELAY);

        editor.edit("changed", "").unwrap();
        let result = editor.flush().await;

        assert!(matches!(result, Err(AppError::Authorization(_))));
        assert!(editor.status().last_error.is_some());
        assert_eq!(editor.status().writes, 0);
        assert_eq!(editor.status().state, SaveState::Idle);
        assert!(editor.has_unsaved_changes());

        // Not retried on its own
        pause(2000).await;
        assert!(editor.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_retried() {
        let (tables, repo, note) = setup().await;
        let mut editor = AutosaveHandle::spawn(repo, &note, DELAY);
        tables.fail_next_updates(1);

        editor.edit("Retry", "").unwrap();
        pause(810).await;
        assert!(tables.updates_for(&note.id).is_empty());
        assert!(editor.status().last_error.is_some());
        assert!(editor.has_unsaved_changes());

        pause(800).await;
        let updates = tables.updates_for(&note.id);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["title"], json!("Retry"));
        assert!(editor.status().last_error.is_none());
        assert!(!editor.has_unsaved_changes());
    }
}
