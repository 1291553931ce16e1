//! Desktop platform: responsibility and boundaries
//!
//! This module owns everything that talks to the windowing system: shell-channel
//! registration, WinEvent hooks, window enumeration and the taskbar classifier.
//! It MUST NOT keep any tracker state; registry mutations belong to the normalizer.

mod dry_run;
mod r#trait;
#[cfg(windows)]
mod win32;

pub use self::dry_run::{DryRunSession, SimulatedDesktop};
pub use self::r#trait::{DesktopSession, HookId, NativePlatform, RawSink, ShellRegistration};
#[cfg(windows)]
pub use self::win32::{dispatch_owner_message, PumpHandle, Win32Classifier, Win32Platform, Win32Session};

use crate::config::Config;
use crate::error::Result;
use crate::services::classifier::WindowClassifier;
use std::sync::Arc;

/// Платформа, классификатор и сессия, собранные для одного режима работы
pub struct Desktop {
    pub platform: Arc<dyn NativePlatform>,
    pub classifier: Arc<dyn WindowClassifier>,
    pub session: Box<dyn DesktopSession + Send>,
}

/// Factory function to create the desktop backend based on the dry_run flag
pub fn create_desktop(config: &Config, dry_run: bool) -> Result<Desktop> {
    if dry_run {
        let desktop = Arc::new(SimulatedDesktop::new());
        return Ok(Desktop {
            platform: desktop.clone(),
            classifier: desktop.clone(),
            session: Box::new(DryRunSession::new(desktop)),
        });
    }

    create_native_desktop(config)
}

#[cfg(windows)]
fn create_native_desktop(config: &Config) -> Result<Desktop> {
    let session = Win32Session::spawn()?;
    Ok(Desktop {
        platform: Arc::new(Win32Platform::new(session.pump())),
        classifier: Arc::new(Win32Classifier::new(&config.tracker_settings(), &config.filters)),
        session: Box::new(session),
    })
}

#[cfg(not(windows))]
fn create_native_desktop(_config: &Config) -> Result<Desktop> {
    Err(crate::tracker_error!(
        service_unavailable,
        "нативный трекер окон доступен только в Windows, используйте --dry-run"
    ))
}
