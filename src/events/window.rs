use serde::{Deserialize, Serialize};
use std::fmt;

/// Непрозрачный идентификатор окна верхнего уровня (HWND)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub fn new(raw: isize) -> Self {
        Self(raw)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// `None` for the null handle, so "no handle supplied" reads as an `Option`.
    pub fn non_null(raw: isize) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn value(&self) -> isize {
        self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Идентификатор монитора (HMONITOR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorId(pub isize);

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor:{:#x}", self.0)
    }
}

/// Поля окна, извлекаемые классификатором
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowFields {
    pub title: String,
    pub class_name: String,
    pub process_name: String,
    pub monitor: Option<MonitorId>,
}

impl WindowFields {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_process(mut self, process_name: impl Into<String>) -> Self {
        self.process_name = process_name.into();
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorId) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Сравнение без учёта монитора: смена монитора сообщается отдельным событием
    pub fn same_except_monitor(&self, other: &WindowFields) -> bool {
        self.title == other.title
            && self.class_name == other.class_name
            && self.process_name == other.process_name
    }
}

impl fmt::Display for WindowFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class_name.is_empty() {
            write!(f, "\"{}\"", self.title)
        } else {
            write!(f, "\"{}\" ({})", self.title, self.class_name)
        }
    }
}

/// Нормализованное событие окна, полученное из любого канала уведомлений
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvent {
    pub kind: WindowEventKind,
    /// `None` only for Activated, where the OS may omit the handle.
    pub handle: Option<WindowHandle>,
    pub timestamp: std::time::Instant,
}

impl WindowEvent {
    pub fn new(kind: WindowEventKind, handle: WindowHandle) -> Self {
        Self {
            kind,
            handle: Some(handle),
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn activated(handle: Option<WindowHandle>) -> Self {
        Self {
            kind: WindowEventKind::Activated,
            handle,
            timestamp: std::time::Instant::now(),
        }
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle {
            Some(handle) => write!(
                f,
                "{}({}) ({}ms ago)",
                self.kind,
                handle,
                self.timestamp.elapsed().as_millis()
            ),
            None => write!(
                f,
                "{}(<none>) ({}ms ago)",
                self.kind,
                self.timestamp.elapsed().as_millis()
            ),
        }
    }
}

/// Тип нормализованного события окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventKind {
    // shell-канал
    Created,
    Destroyed,
    Activated,
    Redraw,
    Flash,
    EndTask,
    Replacing,
    Replaced,
    MonitorChanged,
    // WinEvent-канал
    Cloaked,
    Uncloaked,
    Show,
    Hide,
}

impl WindowEventKind {
    pub fn is_visibility(&self) -> bool {
        matches!(self, WindowEventKind::Show | WindowEventKind::Hide)
    }
}

impl fmt::Display for WindowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
