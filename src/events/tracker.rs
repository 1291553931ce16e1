use super::window::{MonitorId, WindowHandle};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Неизменяемый снимок отслеживаемого окна, отдаваемый подписчикам
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedWindowView {
    pub handle: WindowHandle,
    pub title: String,
    pub class_name: String,
    pub process_name: String,
    pub monitor: Option<MonitorId>,
    pub is_active: bool,
    pub is_flashing: bool,
}

impl fmt::Display for TrackedWindowView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.handle, self.title)?;
        if !self.class_name.is_empty() {
            write!(f, " ({})", self.class_name)?;
        }
        if self.is_active {
            write!(f, " [active]")?;
        }
        if self.is_flashing {
            write!(f, " [flashing]")?;
        }
        Ok(())
    }
}

/// Тип события, рассылаемого подписчикам
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackerEventKind {
    Added,
    Removed,
    Updated,
    MonitorChanged,
}

/// Событие трекера: тип, дескриптор и снимок окна на момент события
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    pub kind: TrackerEventKind,
    pub handle: WindowHandle,
    pub window: TrackedWindowView,
}

impl TrackerEvent {
    pub fn new(kind: TrackerEventKind, window: TrackedWindowView) -> Self {
        Self {
            kind,
            handle: window.handle,
            window,
        }
    }

    pub fn added(window: TrackedWindowView) -> Self {
        Self::new(TrackerEventKind::Added, window)
    }

    pub fn removed(window: TrackedWindowView) -> Self {
        Self::new(TrackerEventKind::Removed, window)
    }

    pub fn updated(window: TrackedWindowView) -> Self {
        Self::new(TrackerEventKind::Updated, window)
    }

    pub fn monitor_changed(window: TrackedWindowView) -> Self {
        Self::new(TrackerEventKind::MonitorChanged, window)
    }
}

impl fmt::Display for TrackerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.window)
    }
}
