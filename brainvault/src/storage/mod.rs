//! Storage module
//!
//! Provides on-disk blob storage for uploaded file bytes.

pub mod blob_store;

pub use blob_store::BlobStore;
