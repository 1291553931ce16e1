use crate::error::{PlatformError, Result};
use crate::events::{HookRange, RawNotification, WindowHandle};
use std::sync::Arc;

/// Receives raw notifications exactly as the OS delivered them, on whatever thread it used.
pub type RawSink = Arc<dyn Fn(RawNotification) + Send + Sync>;

/// Opaque identifier of an installed WinEvent hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Активная регистрация shell-канала на окне-владельце
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellRegistration {
    pub owner: WindowHandle,
    /// Message id the OS uses for shell notifications to `owner`.
    pub message_id: u32,
}

/// OS primitives the bridge and the normalizer need.
///
/// Every registration has a matching release; releasing something already
/// released is a no-op.
pub trait NativePlatform: Send + Sync {
    fn register_shell_channel(
        &self,
        owner: WindowHandle,
        sink: RawSink,
    ) -> std::result::Result<ShellRegistration, PlatformError>;

    fn unregister_shell_channel(&self, registration: ShellRegistration);

    fn install_hook(&self, range: HookRange, sink: RawSink) -> std::result::Result<HookId, PlatformError>;

    fn uninstall_hook(&self, hook: HookId);

    fn foreground_window(&self) -> Option<WindowHandle>;

    /// Top-level windows in z-order.
    fn enumerate_windows(&self) -> Vec<WindowHandle>;
}

/// Runs whatever keeps the owner window alive (a message pump, or a scripted demo)
#[async_trait::async_trait]
pub trait DesktopSession {
    fn owner(&self) -> WindowHandle;

    async fn run(self: Box<Self>) -> Result<()>;
}
