//! Application state and initialization
//!
//! This module wires the configured backend into the session context,
//! the repositories and the views. All of them are available through
//! `AppState`.

use crate::config::{AppConfig, BackendConfig};
use crate::error::Result;
use crate::remote::{LocalBackend, RemoteClient, RestBackend};
use crate::repository::{FilesRepository, FoldersRepository, NotesRepository, TagsRepository};
use crate::session::SessionContext;
use crate::views::{
    watch_session, DashboardView, FilesView, FoldersView, GalleryView, NotesView,
};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the log subscriber. `RUST_LOG` overrides the default filter.
/// Calling it again is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brainvault=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub remote: RemoteClient,
    pub session: SessionContext,
    pub notes: NotesRepository,
    pub files: FilesRepository,
    pub folders: FoldersRepository,
    pub tags: TagsRepository,
    pub notes_view: NotesView,
    pub files_view: FilesView,
    pub folders_view: FoldersView,
    pub gallery: GalleryView,
    pub dashboard: DashboardView,
}

impl AppState {
    /// Build the backend named by `config` and everything on top of it
    pub async fn connect(config: AppConfig) -> Result<Self> {
        tracing::info!("Initializing application");

        let remote = match &config.backend {
            BackendConfig::Hosted {
                url,
                anon_key,
                bucket,
            } => {
                tracing::info!("Using hosted backend at {}", url);
                RemoteClient::from_backend(RestBackend::new(url.clone(), anon_key.clone(), bucket.clone())?)
            }
            BackendConfig::Local { data_dir } => {
                tracing::info!("Using local backend in {:?}", data_dir);
                RemoteClient::from_backend(LocalBackend::open(data_dir).await?)
            }
        };

        Ok(Self::with_remote(config, remote))
    }

    /// Assemble the application over an already configured client
    pub fn with_remote(config: AppConfig, remote: RemoteClient) -> Self {
        let session = SessionContext::new(remote.identity.clone());

        let notes = NotesRepository::new(remote.tables.clone());
        let files = FilesRepository::new(remote.tables.clone(), remote.objects.clone());
        let folders = FoldersRepository::new(remote.tables.clone());
        let tags = TagsRepository::new(remote.tables.clone());

        let notes_view = NotesView::new(session.clone(), notes.clone(), config.auto_save_delay);
        let gallery = GalleryView::new(session.clone(), files.clone());
        let files_view =
            FilesView::new(session.clone(), files.clone()).with_gallery(gallery.clone());
        let folders_view = FoldersView::new(session.clone(), folders.clone())
            .with_contents(notes_view.clone(), files_view.clone());
        let dashboard = DashboardView::new(
            session.clone(),
            notes.clone(),
            files.clone(),
            folders.clone(),
        );

        Self {
            config,
            remote,
            session,
            notes,
            files,
            folders,
            tags,
            notes_view,
            files_view,
            folders_view,
            gallery,
            dashboard,
        }
    }

    /// Subscribe every view to the session, then resolve the existing
    /// session. A failed resolution leaves the app signed out.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let watchers = vec![
            watch_session(self.notes_view.clone(), &self.session),
            watch_session(self.files_view.clone(), &self.session),
            watch_session(self.folders_view.clone(), &self.session),
            watch_session(self.gallery.clone(), &self.session),
            watch_session(self.dashboard.clone(), &self.session),
        ];

        if let Err(e) = self.session.initialize().await {
            tracing::error!("Session initialization failed: {}", e);
        }

        tracing::info!("Application initialized successfully");
        watchers
    }
}
