pub mod native;
pub mod tracker;
pub mod window;

pub use native::{HookRange, RawNotification};
pub use tracker::{TrackedWindowView, TrackerEvent, TrackerEventKind};
pub use window::{MonitorId, WindowEvent, WindowEventKind, WindowFields, WindowHandle};
