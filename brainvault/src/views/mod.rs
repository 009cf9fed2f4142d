//! View controllers
//!
//! Headless state for each screen. A view owns its cached list behind
//! an async mutex that is never held across a remote call. Every fetch
//! is tagged with the view's generation; a response whose ticket no
//! longer matches (unmounted, user changed, list mutated meanwhile) is
//! dropped instead of applied.

pub mod dashboard;
pub mod files;
pub mod folders;
pub mod gallery;
pub mod notes;

pub use dashboard::{DashboardCounts, DashboardView};
pub use files::FilesView;
pub use folders::FoldersView;
pub use gallery::GalleryView;
pub use notes::NotesView;

use crate::error::{AppError, ErrorKind, Result};
use crate::repository::{LocalCache, Record};
use crate::session::{SessionContext, SessionState};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Fetches issued by one `refresh` while the list is still unloaded
const MAX_FETCH_ATTEMPTS: usize = 3;

/// What a list view should render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No user; owner-scoped views show a sign-in prompt
    Unauthenticated,
    /// Session or first list still resolving; never shown as empty
    Loading,
    Loaded,
    /// Loaded, and the user really has zero items
    Empty,
    /// A create/update/delete is in flight
    Mutating,
    /// The first load failed; see notices
    Unavailable,
}

/// Transient, dismissible failure message
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: u64,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ViewSnapshot<T> {
    pub phase: Phase,
    pub items: Vec<T>,
    pub notices: Vec<Notice>,
}

struct ViewState<T> {
    cache: LocalCache<T>,
    /// Bumped whenever an in-flight fetch must not be applied
    generation: u64,
    /// Bumped on unmount and user change; guards mutation results
    epoch: u64,
    mounted: bool,
    seen_user: Option<String>,
    mutations: usize,
    failed: bool,
    notices: Vec<Notice>,
    next_notice: u64,
}

impl<T: Record> ViewState<T> {
    fn new() -> Self {
        Self {
            cache: LocalCache::new(),
            generation: 0,
            epoch: 0,
            mounted: true,
            seen_user: None,
            mutations: 0,
            failed: false,
            notices: Vec::new(),
            next_notice: 1,
        }
    }

    fn push_notice(&mut self, label: &str, error: &AppError) {
        let id = self.next_notice;
        self.next_notice += 1;
        self.notices.push(Notice {
            id,
            kind: error.kind(),
            message: format!("{}: {}", label, error),
        });
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.notices.clear();
        self.failed = false;
        self.epoch += 1;
        self.generation += 1;
    }
}

/// Shared list-view machinery, parametrized by entity
pub struct ListController<T> {
    label: &'static str,
    session: SessionContext,
    requires_user: bool,
    state: Arc<Mutex<ViewState<T>>>,
}

impl<T> Clone for ListController<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            session: self.session.clone(),
            requires_user: self.requires_user,
            state: self.state.clone(),
        }
    }
}

impl<T: Record> ListController<T> {
    /// View over the signed-in user's rows
    pub fn owned(label: &'static str, session: SessionContext) -> Self {
        Self::build(label, session, true)
    }

    /// View that needs no signed-in user
    pub fn public(label: &'static str, session: SessionContext) -> Self {
        Self::build(label, session, false)
    }

    fn build(label: &'static str, session: SessionContext, requires_user: bool) -> Self {
        Self {
            label,
            session,
            requires_user,
            state: Arc::new(Mutex::new(ViewState::new())),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Signed-in user id, or `Authorization` when signed out
    pub fn require_user(&self) -> Result<String> {
        self.session
            .user_id()
            .ok_or_else(|| AppError::Authorization("Not signed in".to_string()))
    }

    pub async fn phase(&self) -> Phase {
        let state = self.state.lock().await;
        self.phase_of(&state)
    }

    fn phase_of(&self, state: &ViewState<T>) -> Phase {
        let session = self.session.snapshot();
        if session.is_loading {
            return Phase::Loading;
        }
        if self.requires_user && session.user.is_none() {
            return Phase::Unauthenticated;
        }
        if state.mutations > 0 {
            return Phase::Mutating;
        }
        if state.cache.is_loaded() {
            if state.cache.is_empty() {
                Phase::Empty
            } else {
                Phase::Loaded
            }
        } else if state.failed {
            Phase::Unavailable
        } else {
            Phase::Loading
        }
    }

    pub async fn snapshot(&self) -> ViewSnapshot<T> {
        let state = self.state.lock().await;
        ViewSnapshot {
            phase: self.phase_of(&state),
            items: state.cache.items().to_vec(),
            notices: state.notices.clone(),
        }
    }

    pub async fn items(&self) -> Vec<T> {
        self.state.lock().await.cache.items().to_vec()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.state.lock().await.cache.get(id).cloned()
    }

    pub async fn notices(&self) -> Vec<Notice> {
        self.state.lock().await.notices.clone()
    }

    pub async fn dismiss_notice(&self, id: u64) -> bool {
        let mut state = self.state.lock().await;
        let before = state.notices.len();
        state.notices.retain(|notice| notice.id != id);
        state.notices.len() != before
    }

    pub async fn mount(&self) {
        let mut state = self.state.lock().await;
        if !state.mounted {
            state.mounted = true;
            state.epoch += 1;
            state.generation += 1;
        }
    }

    /// Late responses after this point are discarded
    pub async fn unmount(&self) {
        let mut state = self.state.lock().await;
        state.mounted = false;
        state.epoch += 1;
        state.generation += 1;
        tracing::debug!("{} view unmounted", self.label);
    }

    pub async fn is_mounted(&self) -> bool {
        self.state.lock().await.mounted
    }

    /// Reconcile with a new session state. On a user change the cached
    /// list is dropped. Returns true when the caller should re-fetch.
    pub async fn reset_for(&self, session: &SessionState) -> bool {
        if session.is_loading {
            return false;
        }

        let user = session.user_id().map(str::to_string);
        let mut state = self.state.lock().await;
        if state.seen_user == user && state.cache.is_loaded() {
            return false;
        }

        if state.seen_user != user {
            tracing::debug!(
                "{} view: user changed {:?} -> {:?}",
                self.label,
                state.seen_user,
                user
            );
            state.seen_user = user.clone();
            if self.requires_user {
                state.reset();
            }
        }

        state.mounted && (user.is_some() || !self.requires_user)
    }

    /// Discard any fetch currently in flight
    pub async fn invalidate(&self) {
        self.state.lock().await.generation += 1;
    }

    /// Apply a change made through another view to the cached rows
    pub async fn edit_cached<F>(&self, edit: F)
    where
        F: FnOnce(&mut LocalCache<T>),
    {
        let mut state = self.state.lock().await;
        edit(&mut state.cache);
        state.generation += 1;
    }

    /// Drop a row that changed elsewhere, along with any fetch in flight
    /// that may still carry it
    pub async fn evict(&self, id: &str) {
        let mut state = self.state.lock().await;
        state.cache.remove(id);
        state.generation += 1;
    }

    /// Fetch a fresh list and apply it if it is still relevant.
    ///
    /// `fetch` receives the signed-in user id. Owner-scoped views do not
    /// fetch while signed out or while the session is resolving. On
    /// failure the previous items stay and a notice is posted.
    ///
    /// A stale response is dropped. If the list has never been loaded the
    /// fetch is issued again, so a mutation racing the first load cannot
    /// leave the view loading forever.
    pub async fn refresh<F, Fut>(&self, mut fetch: F) -> Result<()>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut attempts = 0;
        loop {
            if self.session.is_loading() {
                return Ok(());
            }

            let owner = self.session.user_id();
            let ticket = {
                let mut state = self.state.lock().await;
                if self.requires_user && owner.is_none() {
                    if state.cache.is_loaded() {
                        state.reset();
                    }
                    return Ok(());
                }
                if !state.mounted {
                    return Ok(());
                }
                state.generation
            };

            let result = fetch(owner.clone()).await;
            attempts += 1;

            let mut state = self.state.lock().await;
            let same_user = !self.requires_user || self.session.user_id() == owner;
            if state.generation != ticket || !state.mounted || !same_user {
                tracing::debug!("{} view: discarding stale list response", self.label);
                if state.mounted && !state.cache.is_loaded() && attempts < MAX_FETCH_ATTEMPTS {
                    continue;
                }
                return Ok(());
            }

            return match result {
                Ok(items) => {
                    tracing::debug!("{} view: applied {} item(s)", self.label, items.len());
                    let scope = if self.requires_user { owner.as_deref() } else { None };
                    state.cache.apply_list(scope, items);
                    state.failed = false;
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!("{} view: refresh failed: {}", self.label, e);
                    state.failed = true;
                    state.push_notice(self.label, &e);
                    Err(e)
                }
            };
        }
    }

    /// Run a remote mutation and, if it succeeds while the view is still
    /// showing the same user, apply it to the cache with `apply`.
    pub async fn mutate<R, Fut, A>(&self, op: Fut, apply: A) -> Result<R>
    where
        Fut: Future<Output = Result<R>>,
        A: FnOnce(&mut LocalCache<T>, &R),
    {
        let epoch = {
            let mut state = self.state.lock().await;
            state.mutations += 1;
            state.epoch
        };

        let result = op.await;

        let mut state = self.state.lock().await;
        state.mutations -= 1;
        let current = state.epoch == epoch;

        match result {
            Ok(value) => {
                if current {
                    apply(&mut state.cache, &value);
                    state.generation += 1;
                } else {
                    tracing::debug!("{} view: mutation finished after reset", self.label);
                }
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("{} view: mutation failed: {}", self.label, e);
                if current {
                    state.push_notice(self.label, &e);
                }
                Err(e)
            }
        }
    }

    /// Post a notice for a failure that happened outside `refresh`/`mutate`
    pub async fn report(&self, error: &AppError) {
        self.state.lock().await.push_notice(self.label, error);
    }
}

/// Views that follow the session
#[async_trait]
pub trait SessionAware: Send + Sync + 'static {
    async fn session_changed(&self, session: &SessionState);
}

/// Keep `view` in step with `session` until the session is dropped
pub fn watch_session<V>(view: V, session: &SessionContext) -> JoinHandle<()>
where
    V: SessionAware,
{
    let mut changes = session.subscribe();
    tokio::spawn(async move {
        loop {
            let current = changes.borrow_and_update().clone();
            view.session_changed(&current).await;

            if changes.changed().await.is_err() {
                break;
            }
        }
    })
}
