//! BrainVault library
//!
//! Client data-access and state-sync layer for a personal knowledge
//! vault: session tracking, per-entity repositories over remote
//! identity/table/object stores, debounced note autosave and headless
//! view controllers.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod remote;
pub mod repository;
pub mod services;
pub mod session;
pub mod storage;
pub mod views;

pub use app::{init_tracing, AppState};
pub use config::AppConfig;
pub use error::{AppError, Result};
