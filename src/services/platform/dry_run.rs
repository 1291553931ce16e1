use super::r#trait::{DesktopSession, HookId, NativePlatform, RawSink, ShellRegistration};
use crate::error::{ClassifyError, PlatformError, Result};
use crate::events::native::*;
use crate::events::{HookRange, MonitorId, RawNotification, WindowFields, WindowHandle};
use crate::services::classifier::{Classification, WindowClassifier};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;

/// Message id reported for the simulated shell channel.
const SIMULATED_SHELL_MESSAGE: u32 = 0xC0DE;

#[derive(Debug, Clone)]
struct SimWindow {
    fields: WindowFields,
    accepted: bool,
    cloaked: bool,
    fail_classify: bool,
}

#[derive(Default)]
struct SimState {
    windows: HashMap<WindowHandle, SimWindow>,
    foreground: Option<WindowHandle>,
    shell: Option<(ShellRegistration, RawSink)>,
    hooks: Vec<(HookId, HookRange, RawSink)>,
    next_hook: u64,
    fail_shell_registration: bool,
    failing_hooks: Vec<HookRange>,
    classify_calls: HashMap<WindowHandle, usize>,
}

/// Scriptable in-memory desktop: platform and classifier in one.
///
/// Notifications are delivered through whatever sinks the bridge registered,
/// outside the internal lock, so a sink may call back into the desktop.
#[derive(Default)]
pub struct SimulatedDesktop {
    state: Mutex<SimState>,
}

impl SimulatedDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_window(&self, handle: WindowHandle, fields: WindowFields) {
        self.state.lock().windows.insert(
            handle,
            SimWindow {
                fields,
                accepted: true,
                cloaked: false,
                fail_classify: false,
            },
        );
    }

    pub fn remove_window(&self, handle: WindowHandle) {
        let mut state = self.state.lock();
        state.windows.remove(&handle);
        if state.foreground == Some(handle) {
            state.foreground = None;
        }
    }

    pub fn set_accepted(&self, handle: WindowHandle, accepted: bool) {
        self.with_window(handle, |w| w.accepted = accepted);
    }

    pub fn set_title(&self, handle: WindowHandle, title: impl Into<String>) {
        let title = title.into();
        self.with_window(handle, |w| w.fields.title = title);
    }

    pub fn set_monitor(&self, handle: WindowHandle, monitor: MonitorId) {
        self.with_window(handle, |w| w.fields.monitor = Some(monitor));
    }

    pub fn set_cloaked(&self, handle: WindowHandle, cloaked: bool) {
        self.with_window(handle, |w| w.cloaked = cloaked);
    }

    pub fn set_classify_failure(&self, handle: WindowHandle, fail: bool) {
        self.with_window(handle, |w| w.fail_classify = fail);
    }

    pub fn set_foreground(&self, handle: Option<WindowHandle>) {
        self.state.lock().foreground = handle;
    }

    pub fn fail_shell_registration(&self, fail: bool) {
        self.state.lock().fail_shell_registration = fail;
    }

    /// Makes the next installs of `range` fail.
    pub fn fail_hook(&self, range: HookRange) {
        self.state.lock().failing_hooks.push(range);
    }

    pub fn is_shell_registered(&self) -> bool {
        self.state.lock().shell.is_some()
    }

    pub fn installed_hooks(&self) -> Vec<HookRange> {
        self.state.lock().hooks.iter().map(|(_, range, _)| *range).collect()
    }

    pub fn hook_sink(&self, range: HookRange) -> Option<RawSink> {
        self.state
            .lock()
            .hooks
            .iter()
            .find(|(_, r, _)| *r == range)
            .map(|(_, _, sink)| Arc::clone(sink))
    }

    pub fn classify_calls(&self, handle: WindowHandle) -> usize {
        self.state.lock().classify_calls.get(&handle).copied().unwrap_or(0)
    }

    /// Delivers a shell notification; `false` when no channel is registered.
    pub fn send_shell(&self, code: u32, handle: isize) -> bool {
        let sink = self.state.lock().shell.as_ref().map(|(_, sink)| Arc::clone(sink));
        match sink {
            Some(sink) => {
                sink(RawNotification::shell(code, handle));
                true
            }
            None => false,
        }
    }

    /// Delivers a whole-window WinEvent to every hook whose range covers it.
    pub fn send_hook(&self, event: u32, handle: isize) -> usize {
        self.send_raw_hook(RawNotification::hook(event, handle))
    }

    pub fn send_raw_hook(&self, raw: RawNotification) -> usize {
        let RawNotification::Hook { event, .. } = raw else {
            return 0;
        };
        let sinks: Vec<RawSink> = self
            .state
            .lock()
            .hooks
            .iter()
            .filter(|(_, range, _)| range.contains(event))
            .map(|(_, _, sink)| Arc::clone(sink))
            .collect();
        for sink in &sinks {
            sink(raw);
        }
        sinks.len()
    }

    // сценарные шаги для демо-сессии

    pub fn open_window(&self, handle: WindowHandle, fields: WindowFields) {
        self.add_window(handle, fields);
        self.send_shell(HSHELL_WINDOWCREATED, handle.value());
        self.set_foreground(Some(handle));
        self.send_shell(HSHELL_WINDOWACTIVATED, handle.value());
    }

    pub fn close_window(&self, handle: WindowHandle) {
        self.remove_window(handle);
        self.send_shell(HSHELL_WINDOWDESTROYED, handle.value());
    }

    fn with_window(&self, handle: WindowHandle, f: impl FnOnce(&mut SimWindow)) {
        if let Some(window) = self.state.lock().windows.get_mut(&handle) {
            f(window);
        }
    }
}

impl NativePlatform for SimulatedDesktop {
    fn register_shell_channel(
        &self,
        owner: WindowHandle,
        sink: RawSink,
    ) -> std::result::Result<ShellRegistration, PlatformError> {
        let mut state = self.state.lock();
        if state.fail_shell_registration {
            return Err(PlatformError::call_failed(
                "RegisterShellHookWindow",
                "simulated failure",
            ));
        }
        if state.shell.is_some() {
            return Err(PlatformError::AlreadyRegistered("shell channel"));
        }
        let registration = ShellRegistration {
            owner,
            message_id: SIMULATED_SHELL_MESSAGE,
        };
        state.shell = Some((registration, sink));
        Ok(registration)
    }

    fn unregister_shell_channel(&self, registration: ShellRegistration) {
        let mut state = self.state.lock();
        if matches!(state.shell, Some((current, _)) if current == registration) {
            state.shell = None;
        }
    }

    fn install_hook(&self, range: HookRange, sink: RawSink) -> std::result::Result<HookId, PlatformError> {
        let mut state = self.state.lock();
        if state.failing_hooks.contains(&range) {
            return Err(PlatformError::call_failed(
                "SetWinEventHook",
                format!("simulated failure for {}", range),
            ));
        }
        state.next_hook += 1;
        let id = HookId(state.next_hook);
        state.hooks.push((id, range, sink));
        Ok(id)
    }

    fn uninstall_hook(&self, hook: HookId) {
        self.state.lock().hooks.retain(|(id, _, _)| *id != hook);
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        self.state.lock().foreground
    }

    fn enumerate_windows(&self) -> Vec<WindowHandle> {
        let mut handles: Vec<WindowHandle> = self.state.lock().windows.keys().copied().collect();
        handles.sort();
        handles
    }
}

impl WindowClassifier for SimulatedDesktop {
    fn classify(&self, handle: WindowHandle) -> std::result::Result<Classification, ClassifyError> {
        let mut state = self.state.lock();
        *state.classify_calls.entry(handle).or_insert(0) += 1;

        let Some(window) = state.windows.get(&handle) else {
            return Ok(Classification::rejected(WindowFields::default()));
        };
        if window.fail_classify {
            return Err(ClassifyError::Query {
                handle,
                detail: "simulated failure".to_string(),
            });
        }

        let fields = window.fields.clone();
        if window.accepted && !window.cloaked {
            Ok(Classification::accepted(fields))
        } else {
            Ok(Classification::rejected(fields))
        }
    }

    fn is_cloaked(&self, handle: WindowHandle) -> bool {
        self.state
            .lock()
            .windows
            .get(&handle)
            .map(|w| w.cloaked)
            .unwrap_or(false)
    }
}

/// Dry-run session: plays a fixed window scenario against the simulated desktop
pub struct DryRunSession {
    desktop: Arc<SimulatedDesktop>,
}

impl DryRunSession {
    pub const OWNER: WindowHandle = WindowHandle(0x1);

    pub fn new(desktop: Arc<SimulatedDesktop>) -> Self {
        Self { desktop }
    }

    fn play(&self, step: usize) {
        let terminal = WindowHandle(0x100);
        let browser = WindowHandle(0x200);

        match step {
            0 => {
                info!("Dry-run: открываем терминал");
                self.desktop.open_window(
                    terminal,
                    WindowFields::new("Terminal - dry_run")
                        .with_class("ConsoleWindowClass")
                        .with_process("terminal.exe")
                        .with_monitor(MonitorId(1)),
                );
            }
            1 => {
                info!("Dry-run: открываем браузер");
                self.desktop.open_window(
                    browser,
                    WindowFields::new("Browser - dry_run")
                        .with_class("Chrome_WidgetWin_1")
                        .with_process("browser.exe")
                        .with_monitor(MonitorId(1)),
                );
            }
            2 => {
                info!("Dry-run: серия перерисовок терминала со сменой заголовка");
                self.desktop.set_title(terminal, "Terminal - building...");
                for _ in 0..3 {
                    self.desktop.send_shell(HSHELL_REDRAW, terminal.value());
                }
            }
            3 => {
                info!("Dry-run: терминал мигает");
                self.desktop.send_shell(HSHELL_FLASH, terminal.value());
            }
            4 => {
                info!("Dry-run: переключаемся на терминал");
                self.desktop.set_foreground(Some(terminal));
                self.desktop.send_shell(HSHELL_RUDEAPPACTIVATED, terminal.value());
            }
            5 => {
                info!("Dry-run: браузер уходит на другой виртуальный стол");
                self.desktop.set_cloaked(browser, true);
                self.desktop.send_hook(EVENT_OBJECT_CLOAKED, browser.value());
            }
            6 => {
                info!("Dry-run: браузер возвращается");
                self.desktop.set_cloaked(browser, false);
                self.desktop.send_hook(EVENT_OBJECT_UNCLOAKED, browser.value());
            }
            7 => {
                info!("Dry-run: браузер переносится на второй монитор");
                self.desktop.set_monitor(browser, MonitorId(2));
                self.desktop.send_shell(HSHELL_MONITORCHANGED, browser.value());
            }
            _ => {
                info!("Dry-run: закрываем окна");
                self.desktop.close_window(terminal);
                self.desktop.close_window(browser);
            }
        }
    }
}

#[async_trait::async_trait]
impl DesktopSession for DryRunSession {
    fn owner(&self) -> WindowHandle {
        Self::OWNER
    }

    async fn run(self: Box<Self>) -> Result<()> {
        info!("Dry-run режим - рабочий стол работает в режиме эмуляции");

        const STEPS: usize = 9;
        let mut step = 0;
        let mut interval = interval(Duration::from_secs(2));

        loop {
            interval.tick().await;
            self.play(step);
            step = (step + 1) % STEPS;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reflects_cloak_and_acceptance() {
        let desktop = SimulatedDesktop::new();
        let handle = WindowHandle(0x10);
        desktop.add_window(handle, WindowFields::new("w"));

        assert!(desktop.classify(handle).unwrap().accepted);
        desktop.set_cloaked(handle, true);
        assert!(!desktop.classify(handle).unwrap().accepted);
        assert!(desktop.is_cloaked(handle));

        assert!(!desktop.classify(WindowHandle(0x99)).unwrap().accepted);
        assert_eq!(desktop.classify_calls(handle), 2);
    }

    #[test]
    fn test_hooks_receive_only_their_range() {
        let desktop = SimulatedDesktop::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: RawSink = Arc::new(move |raw: RawNotification| sink_seen.lock().push(raw));

        let id = desktop.install_hook(HookRange::CLOAK, sink).unwrap();
        assert_eq!(desktop.send_hook(EVENT_OBJECT_SHOW, 0x10), 0);
        assert_eq!(desktop.send_hook(EVENT_OBJECT_CLOAKED, 0x10), 1);
        assert_eq!(seen.lock().len(), 1);

        desktop.uninstall_hook(id);
        desktop.uninstall_hook(id);
        assert!(desktop.installed_hooks().is_empty());
    }

    #[test]
    fn test_second_shell_registration_is_rejected() {
        let desktop = SimulatedDesktop::new();
        let sink: RawSink = Arc::new(|_: RawNotification| {});
        let registration = desktop
            .register_shell_channel(WindowHandle(1), Arc::clone(&sink))
            .unwrap();

        assert_eq!(
            desktop.register_shell_channel(WindowHandle(1), sink),
            Err(PlatformError::AlreadyRegistered("shell channel"))
        );

        desktop.unregister_shell_channel(registration);
        assert!(!desktop.send_shell(HSHELL_WINDOWCREATED, 0x10));
    }
}
