//! Session context
//!
//! Holds the current identity and loading flag for one client and
//! broadcasts every change over a watch channel. Views subscribe and
//! compare user ids to decide when their cached lists are stale.

use crate::error::Result;
use crate::remote::{AuthUser, IdentityService};
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot observed by dependents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<AuthUser>,
    /// True until the existing session has been resolved
    pub is_loading: bool,
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

/// Current identity of this client, injected into every view
#[derive(Clone)]
pub struct SessionContext {
    identity: Arc<dyn IdentityService>,
    state: Arc<watch::Sender<SessionState>>,
}

impl SessionContext {
    /// New context in the loading state; call `initialize` to resolve it
    pub fn new(identity: Arc<dyn IdentityService>) -> Self {
        let (state, _) = watch::channel(SessionState {
            user: None,
            is_loading: true,
        });
        Self {
            identity,
            state: Arc::new(state),
        }
    }

    /// Resolve any existing session.
    ///
    /// Loading ends even when resolution fails; the client is then
    /// treated as signed out.
    pub async fn initialize(&self) -> Result<Option<AuthUser>> {
        tracing::info!("Resolving existing session");

        let resolved = self.identity.current_session().await;
        let user = match &resolved {
            Ok(user) => user.clone(),
            Err(e) => {
                tracing::warn!("Failed to resolve session: {}", e);
                None
            }
        };

        self.publish(user, false);
        resolved
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.identity.sign_in(email, password).await?;
        self.publish(Some(user.clone()), false);
        Ok(user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.identity.sign_up(email, password).await?;
        self.publish(Some(user.clone()), false);
        Ok(user)
    }

    /// Clear the session. Dependents fall back to signed-out even if the
    /// remote call fails; that failure is still reported.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.identity.sign_out().await;
        if let Err(e) = &result {
            tracing::warn!("Remote sign-out failed: {}", e);
        }

        self.publish(None, false);
        tracing::info!("Signed out");
        result
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().user.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().user_id().map(str::to_string)
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every change to the session state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn publish(&self, user: Option<AuthUser>, is_loading: bool) {
        let next = SessionState { user, is_loading };
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.user_id() != next.user_id() {
                tracing::debug!(
                    "Session user changed: {:?} -> {:?}",
                    current.user_id(),
                    next.user_id()
                );
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Identity double with a scripted current session
    struct FakeIdentity {
        existing: Mutex<Option<AuthUser>>,
        fail_sign_out: bool,
    }

    impl FakeIdentity {
        fn new(existing: Option<AuthUser>) -> Self {
            Self {
                existing: Mutex::new(existing),
                fail_sign_out: false,
            }
        }
    }

    #[async_trait]
    impl IdentityService for FakeIdentity {
        async fn current_session(&self) -> Result<Option<AuthUser>> {
            Ok(self.existing.lock().unwrap().clone())
        }

        async fn sign_in(&self, email: &str, _password: &str) -> Result<AuthUser> {
            let user = AuthUser {
                id: format!("id-{}", email),
                email: email.to_string(),
            };
            *self.existing.lock().unwrap() = Some(user.clone());
            Ok(user)
        }

        async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
            self.sign_in(email, password).await
        }

        async fn sign_out(&self) -> Result<()> {
            *self.existing.lock().unwrap() = None;
            if self.fail_sign_out {
                return Err(AppError::Transport("offline".to_string()));
            }
            Ok(())
        }
    }

    fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            email: format!("{}@example.com", id),
        }
    }

    #[tokio::test]
    async fn test_loading_until_initialized() {
        let session = SessionContext::new(Arc::new(FakeIdentity::new(Some(user("u1")))));

        assert!(session.is_loading());
        assert!(session.current_user().is_none());

        session.initialize().await.unwrap();

        assert!(!session.is_loading());
        assert_eq!(session.user_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_initialize_without_session() {
        let session = SessionContext::new(Arc::new(FakeIdentity::new(None)));
        let resolved = session.initialize().await.unwrap();

        assert!(resolved.is_none());
        assert_eq!(
            session.snapshot(),
            SessionState {
                user: None,
                is_loading: false
            }
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_user_changes() {
        let session = SessionContext::new(Arc::new(FakeIdentity::new(None)));
        let mut rx = session.subscribe();

        session.initialize().await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        session.sign_in("a", "pw").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().user_id(), Some("id-a"));

        session.sign_out().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().user_id(), None);
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_on_remote_failure() {
        let identity = FakeIdentity {
            existing: Mutex::new(Some(user("u1"))),
            fail_sign_out: true,
        };
        let session = SessionContext::new(Arc::new(identity));
        session.initialize().await.unwrap();

        let result = session.sign_out().await;

        assert!(matches!(result, Err(AppError::Transport(_))));
        assert!(session.current_user().is_none());
        assert!(!session.is_loading());
    }
}
