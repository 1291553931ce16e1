//! Native event bridge: responsibility and boundaries
//!
//! Owns the OS subscriptions (shell channel + WinEvent hooks) and turns every raw
//! notification into a [`WindowEvent`] handed to the poster. It decodes and
//! marshals, nothing more: it never reads or writes the registry, and hook
//! callbacks (which may run on a foreign thread) only ever call the poster.

use crate::error::{DropReason, StartError};
use crate::events::native::{hook_event_kind, shell_code_kind, CHILDID_SELF, OBJID_WINDOW};
use crate::events::{HookRange, RawNotification, WindowEvent, WindowEventKind, WindowHandle};
use crate::services::platform::{HookId, NativePlatform, RawSink, ShellRegistration};
use crate::trace_if_enabled;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// "Post to owning loop": the only thing a decoded notification may do.
pub type EventPoster = Arc<dyn Fn(WindowEvent) + Send + Sync>;

/// Флаг, закрываемый первым при остановке: после него ни одно уведомление не проходит дальше
#[derive(Debug, Clone, Default)]
pub struct BridgeGate(Arc<AtomicBool>);

impl BridgeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct NativeEventBridge {
    platform: Arc<dyn NativePlatform>,
    strict_filtering: bool,
    gate: BridgeGate,
    shell: Option<ShellRegistration>,
    hooks: Vec<(HookRange, HookId)>,
}

impl NativeEventBridge {
    pub fn new(platform: Arc<dyn NativePlatform>, strict_filtering: bool) -> Self {
        Self {
            platform,
            strict_filtering,
            gate: BridgeGate::new(),
            shell: None,
            hooks: Vec::new(),
        }
    }

    pub fn gate(&self) -> BridgeGate {
        self.gate.clone()
    }

    pub fn is_started(&self) -> bool {
        self.shell.is_some()
    }

    pub fn installed_hooks(&self) -> Vec<HookRange> {
        self.hooks.iter().map(|(range, _)| *range).collect()
    }

    /// Registers both channels. On any failure everything already installed is torn down.
    pub fn start(&mut self, owner: WindowHandle, poster: EventPoster) -> Result<(), StartError> {
        if self.is_started() {
            return Ok(());
        }
        if owner.is_null() {
            return Err(StartError::InvalidOwner(owner));
        }

        self.gate.open();
        let sink = Self::make_sink(self.gate.clone(), self.strict_filtering, poster);

        match self.platform.register_shell_channel(owner, Arc::clone(&sink)) {
            Ok(registration) => {
                info!(
                    "Shell-канал зарегистрирован на окне {} (сообщение {:#x})",
                    owner, registration.message_id
                );
                self.shell = Some(registration);
            }
            Err(e) => {
                error!("Не удалось зарегистрировать shell-канал на {}: {}", owner, e);
                self.stop();
                return Err(StartError::ShellChannel(e));
            }
        }

        let mut ranges = vec![HookRange::CLOAK];
        if !self.strict_filtering {
            ranges.push(HookRange::SHOW_HIDE);
        }

        for range in ranges {
            match self.platform.install_hook(range, Arc::clone(&sink)) {
                Ok(id) => {
                    debug!("WinEvent-хук {} установлен", range);
                    self.hooks.push((range, id));
                }
                Err(e) => {
                    error!("Не удалось установить WinEvent-хук {}: {}", range, e);
                    self.stop();
                    return Err(StartError::Hook(e));
                }
            }
        }

        info!(
            "Мост событий запущен: {} хук(ов), строгая фильтрация: {}",
            self.hooks.len(),
            self.strict_filtering
        );
        Ok(())
    }

    /// Reverses every registration of `start`. Idempotent, safe when never started.
    pub fn stop(&mut self) {
        self.gate.close();

        for (range, id) in self.hooks.drain(..) {
            self.platform.uninstall_hook(id);
            debug!("WinEvent-хук {} снят", range);
        }

        if let Some(registration) = self.shell.take() {
            self.platform.unregister_shell_channel(registration);
            info!("Shell-канал на окне {} снят", registration.owner);
        }
    }

    /// Декодирование сырого уведомления в нормализованное событие
    pub fn decode(raw: RawNotification, strict_filtering: bool) -> Result<WindowEvent, DropReason> {
        match raw {
            RawNotification::Shell { code, handle } => {
                let kind = shell_code_kind(code).ok_or(DropReason::UnknownShellCode(code))?;
                match (kind, WindowHandle::non_null(handle)) {
                    (WindowEventKind::Activated, handle) => Ok(WindowEvent::activated(handle)),
                    (kind, Some(handle)) => Ok(WindowEvent::new(kind, handle)),
                    (_, None) => Err(DropReason::NullHandle),
                }
            }
            RawNotification::Hook {
                event,
                handle,
                object_id,
                child_id,
            } => {
                let handle = WindowHandle::non_null(handle).ok_or(DropReason::NullHandle)?;
                if object_id != OBJID_WINDOW || child_id != CHILDID_SELF {
                    return Err(DropReason::NotWholeWindow { object_id, child_id });
                }
                let kind = hook_event_kind(event).ok_or(DropReason::UnknownHookEvent(event))?;
                if kind.is_visibility() && strict_filtering {
                    return Err(DropReason::ChannelDisabled);
                }
                Ok(WindowEvent::new(kind, handle))
            }
        }
    }

    fn make_sink(gate: BridgeGate, strict_filtering: bool, poster: EventPoster) -> RawSink {
        Arc::new(move |raw: RawNotification| {
            if !gate.is_open() {
                trace_if_enabled!("Уведомление {:?} отброшено: {}", raw, DropReason::Inactive);
                return;
            }
            match Self::decode(raw, strict_filtering) {
                Ok(event) => poster(event),
                Err(reason) => trace_if_enabled!("Уведомление {:?} отброшено: {}", raw, reason),
            }
        })
    }
}

impl Drop for NativeEventBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::native::*;
    use crate::services::platform::SimulatedDesktop;
    use parking_lot::Mutex;

    fn recording_poster() -> (EventPoster, Arc<Mutex<Vec<WindowEvent>>>) {
        let posted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&posted);
        let poster: EventPoster = Arc::new(move |event: WindowEvent| sink.lock().push(event));
        (poster, posted)
    }

    #[test]
    fn test_decode_shell_codes() {
        let event = NativeEventBridge::decode(RawNotification::shell(HSHELL_WINDOWCREATED, 0x10), false).unwrap();
        assert_eq!(event.kind, WindowEventKind::Created);
        assert_eq!(event.handle, Some(WindowHandle(0x10)));

        let event = NativeEventBridge::decode(RawNotification::shell(HSHELL_RUDEAPPACTIVATED, 0), false).unwrap();
        assert_eq!(event.kind, WindowEventKind::Activated);
        assert_eq!(event.handle, None);

        assert_eq!(
            NativeEventBridge::decode(RawNotification::shell(HSHELL_REDRAW, 0), false),
            Err(DropReason::NullHandle)
        );
        assert_eq!(
            NativeEventBridge::decode(RawNotification::shell(12, 0x10), false),
            Err(DropReason::UnknownShellCode(12))
        );
    }

    #[test]
    fn test_decode_hook_requires_whole_window() {
        let sub_element = RawNotification::Hook {
            event: EVENT_OBJECT_CLOAKED,
            handle: 0x20,
            object_id: -4,
            child_id: 0,
        };
        assert_eq!(
            NativeEventBridge::decode(sub_element, false),
            Err(DropReason::NotWholeWindow { object_id: -4, child_id: 0 })
        );

        let child = RawNotification::Hook {
            event: EVENT_OBJECT_SHOW,
            handle: 0x20,
            object_id: OBJID_WINDOW,
            child_id: 3,
        };
        assert!(NativeEventBridge::decode(child, false).is_err());

        let event = NativeEventBridge::decode(RawNotification::hook(EVENT_OBJECT_UNCLOAKED, 0x20), false).unwrap();
        assert_eq!(event.kind, WindowEventKind::Uncloaked);
    }

    #[test]
    fn test_decode_show_hide_dropped_under_strict_filtering() {
        assert_eq!(
            NativeEventBridge::decode(RawNotification::hook(EVENT_OBJECT_SHOW, 0x30), true),
            Err(DropReason::ChannelDisabled)
        );
        assert!(NativeEventBridge::decode(RawNotification::hook(EVENT_OBJECT_CLOAKED, 0x30), true).is_ok());
    }

    #[test]
    fn test_start_installs_hooks_per_policy() {
        let desktop = Arc::new(SimulatedDesktop::new());
        let (poster, _) = recording_poster();

        let mut bridge = NativeEventBridge::new(desktop.clone(), false);
        bridge.start(WindowHandle(1), poster.clone()).unwrap();
        assert_eq!(bridge.installed_hooks(), vec![HookRange::CLOAK, HookRange::SHOW_HIDE]);
        assert!(desktop.is_shell_registered());
        bridge.stop();

        let mut strict = NativeEventBridge::new(desktop.clone(), true);
        strict.start(WindowHandle(1), poster).unwrap();
        assert_eq!(strict.installed_hooks(), vec![HookRange::CLOAK]);
        assert_eq!(desktop.installed_hooks(), vec![HookRange::CLOAK]);
    }

    #[test]
    fn test_hook_failure_tears_down_shell_channel() {
        let desktop = Arc::new(SimulatedDesktop::new());
        desktop.fail_hook(HookRange::SHOW_HIDE);
        let (poster, _) = recording_poster();

        let mut bridge = NativeEventBridge::new(desktop.clone(), false);
        let result = bridge.start(WindowHandle(1), poster);

        assert!(matches!(result, Err(StartError::Hook(_))));
        assert!(!bridge.is_started());
        assert!(!desktop.is_shell_registered());
        assert!(desktop.installed_hooks().is_empty());
    }

    #[test]
    fn test_refused_shell_channel_is_fatal() {
        let desktop = Arc::new(SimulatedDesktop::new());
        desktop.fail_shell_registration(true);
        let (poster, posted) = recording_poster();

        let mut bridge = NativeEventBridge::new(desktop.clone(), false);
        let result = bridge.start(WindowHandle(1), poster.clone());

        assert!(matches!(result, Err(StartError::ShellChannel(_))));
        assert!(!bridge.is_started());
        assert!(!bridge.gate().is_open());
        assert!(bridge.installed_hooks().is_empty());
        assert!(desktop.installed_hooks().is_empty());
        assert!(!desktop.send_shell(HSHELL_WINDOWCREATED, 0x10));
        assert!(posted.lock().is_empty());

        // после снятия отказа запуск проходит
        desktop.fail_shell_registration(false);
        bridge.start(WindowHandle(1), poster).unwrap();
        assert!(desktop.is_shell_registered());
    }

    #[test]
    fn test_null_owner_rejected() {
        let desktop = Arc::new(SimulatedDesktop::new());
        let (poster, _) = recording_poster();
        let mut bridge = NativeEventBridge::new(desktop.clone(), false);

        assert!(matches!(
            bridge.start(WindowHandle::NULL, poster),
            Err(StartError::InvalidOwner(_))
        ));
        assert!(!desktop.is_shell_registered());
    }

    #[test]
    fn test_callbacks_after_stop_are_dropped() {
        let desktop = Arc::new(SimulatedDesktop::new());
        let (poster, posted) = recording_poster();
        let mut bridge = NativeEventBridge::new(desktop.clone(), false);
        bridge.start(WindowHandle(1), poster).unwrap();

        // перехватываем sink, как если бы ОС держала указатель на колбэк
        let in_flight = desktop.hook_sink(HookRange::CLOAK).unwrap();
        in_flight(RawNotification::hook(EVENT_OBJECT_CLOAKED, 0x40));
        assert_eq!(posted.lock().len(), 1);

        bridge.stop();
        bridge.stop();
        in_flight(RawNotification::hook(EVENT_OBJECT_CLOAKED, 0x40));
        assert_eq!(posted.lock().len(), 1);
        assert!(desktop.installed_hooks().is_empty());
    }

    #[test]
    fn test_hook_callback_from_foreign_thread_only_posts() {
        let desktop = Arc::new(SimulatedDesktop::new());
        let (poster, posted) = recording_poster();
        let mut bridge = NativeEventBridge::new(desktop.clone(), false);
        bridge.start(WindowHandle(1), poster).unwrap();

        let remote = Arc::clone(&desktop);
        std::thread::spawn(move || {
            remote.send_hook(EVENT_OBJECT_HIDE, 0x50);
            remote.send_hook(EVENT_OBJECT_SHOW, 0x50);
        })
        .join()
        .unwrap();

        let kinds: Vec<_> = posted.lock().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![WindowEventKind::Hide, WindowEventKind::Show]);
    }
}
