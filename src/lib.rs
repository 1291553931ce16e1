//! Native window lifecycle tracker for a taskbar.
//!
//! Subscribes to the shell hook channel and WinEvent hooks, normalizes their
//! notifications into one event stream and keeps a deduplicated model of the
//! windows that belong on the taskbar. Consumers read snapshots and subscribe to
//! `Added` / `Removed` / `Updated` / `MonitorChanged` events.

#[macro_use]
pub mod utils;

pub mod config;
pub mod error;
pub mod events;
pub mod services;

pub use config::{Config, TrackerSettings};
pub use error::{StartError, TrackerError};
pub use events::{TrackedWindowView, TrackerEvent, TrackerEventKind, WindowHandle};
pub use services::{create_desktop, listener_fn, WindowListener, WindowTracker};
