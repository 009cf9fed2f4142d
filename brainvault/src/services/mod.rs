//! Services module
//!
//! Background work that runs alongside the views.

pub mod autosave;

pub use autosave::{AutosaveHandle, AutosaveStatus, NavigationPolicy, SaveState};
