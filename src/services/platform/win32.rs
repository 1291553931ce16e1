//! Win32 backend: shell hook window, WinEvent hooks and the taskbar classifier.
//!
//! Out-of-context WinEvent callbacks are delivered on the thread that installed
//! the hook, through its message queue. All hook (un)installs therefore run on
//! the owner window's pump thread; other threads submit commands to it.

use super::r#trait::{DesktopSession, HookId, NativePlatform, RawSink, ShellRegistration};
use crate::config::{FilterConfig, TrackerSettings};
use crate::error::{ClassifyError, PlatformError, Result};
use crate::events::{HookRange, MonitorId, RawNotification, WindowFields, WindowHandle};
use crate::services::classifier::{Classification, TaskbarFilter, WindowClassifier, WindowProbe};
use crate::{debug_if_enabled, tracker_error};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};
use windows::core::{w, BOOL, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED};
use windows::Win32::Graphics::Gdi::{MonitorFromWindow, MONITOR_DEFAULTTONULL};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DeregisterShellHookWindow, DispatchMessageW, EnumWindows,
    GetAncestor, GetClassNameW, GetForegroundWindow, GetMessageW, GetPropW, GetWindow,
    GetWindowLongW, GetWindowTextW, GetWindowThreadProcessId, IsWindow, IsWindowEnabled,
    IsWindowVisible, PostMessageW, RegisterClassW, RegisterShellHookWindow, RegisterWindowMessageW,
    TranslateMessage, GA_ROOT, GWL_EXSTYLE, GWL_STYLE, GW_OWNER, MSG, WINEVENT_OUTOFCONTEXT,
    WINEVENT_SKIPOWNPROCESS, WM_APP, WNDCLASSW, WS_EX_TOOLWINDOW, WS_OVERLAPPED,
};

/// Wakes the pump thread to drain its command queue.
const WM_PUMP_COMMAND: u32 = WM_APP + 1;

const HOOK_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

struct ShellChannel {
    registration: ShellRegistration,
    sink: RawSink,
}

static SHELL_CHANNEL: Lazy<Mutex<Option<ShellChannel>>> = Lazy::new(|| Mutex::new(None));

/// Sinks keyed by the raw hook handle; WinEvent callbacks carry no user data.
static HOOK_SINKS: Lazy<Mutex<HashMap<isize, RawSink>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.value() as *mut c_void)
}

fn handle_of(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

enum PumpCommand {
    InstallHook {
        range: HookRange,
        sink: RawSink,
        reply: mpsc::Sender<std::result::Result<HookId, PlatformError>>,
    },
    UninstallHook(HookId),
}

/// Submits work to the owner window's pump thread
#[derive(Clone)]
pub struct PumpHandle {
    owner: WindowHandle,
    commands: std::sync::Arc<Mutex<mpsc::Sender<PumpCommand>>>,
}

impl PumpHandle {
    pub fn owner(&self) -> WindowHandle {
        self.owner
    }

    fn submit(&self, command: PumpCommand) -> std::result::Result<(), PlatformError> {
        self.commands
            .lock()
            .send(command)
            .map_err(|_| PlatformError::call_failed("PostMessageW", "поток окна-владельца завершён"))?;
        unsafe { PostMessageW(Some(hwnd(self.owner)), WM_PUMP_COMMAND, WPARAM(0), LPARAM(0)) }
            .map_err(|e| PlatformError::call_failed("PostMessageW", e.to_string()))
    }
}

/// Routes a message received by the owner window. Returns `true` when it was a shell notification.
pub fn dispatch_owner_message(owner: WindowHandle, message: u32, wparam: usize, lparam: isize) -> bool {
    let sink = {
        let channel = SHELL_CHANNEL.lock();
        match channel.as_ref() {
            Some(c) if c.registration.owner == owner && c.registration.message_id == message => {
                std::sync::Arc::clone(&c.sink)
            }
            _ => return false,
        }
    };
    sink(RawNotification::shell(wparam as u32, lparam));
    true
}

unsafe extern "system" fn owner_window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let handled = catch_unwind(AssertUnwindSafe(|| {
        dispatch_owner_message(handle_of(hwnd), msg, wparam.0, lparam.0)
    }));

    match handled {
        Ok(true) => LRESULT(0),
        Ok(false) => DefWindowProcW(hwnd, msg, wparam, lparam),
        Err(e) => {
            error!("Паника в оконной процедуре владельца: {:?}", e);
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
    }
}

unsafe extern "system" fn win_event_callback(
    hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
    _id_event_thread: u32,
    _dwms_event_time: u32,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let sink = HOOK_SINKS.lock().get(&(hook.0 as isize)).cloned();
        if let Some(sink) = sink {
            sink(RawNotification::Hook {
                event,
                handle: hwnd.0 as isize,
                object_id: id_object,
                child_id: id_child,
            });
        }
    }));

    if let Err(e) = result {
        error!("Паника в WinEvent-колбэке: {:?}", e);
    }
}

unsafe extern "system" fn enum_windows_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = &mut *(lparam.0 as *mut Vec<WindowHandle>);
    handles.push(handle_of(hwnd));
    BOOL::from(true)
}

fn install_hook_on_pump(range: HookRange, sink: RawSink) -> std::result::Result<HookId, PlatformError> {
    let hook = unsafe {
        SetWinEventHook(
            range.min,
            range.max,
            None,
            Some(win_event_callback),
            0,
            0,
            WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
        )
    };
    if hook.is_invalid() {
        return Err(PlatformError::call_failed("SetWinEventHook", format!("диапазон {}", range)));
    }

    let raw = hook.0 as isize;
    HOOK_SINKS.lock().insert(raw, sink);
    Ok(HookId(raw as usize as u64))
}

fn uninstall_hook_on_pump(id: HookId) {
    let hook = HWINEVENTHOOK(id.0 as usize as *mut c_void);
    if !unsafe { UnhookWinEvent(hook) }.as_bool() {
        warn!("UnhookWinEvent не удался для {:?}", id);
    }
}

fn drain_commands(commands: &mpsc::Receiver<PumpCommand>) {
    while let Ok(command) = commands.try_recv() {
        match command {
            PumpCommand::InstallHook { range, sink, reply } => {
                let _ = reply.send(install_hook_on_pump(range, sink));
            }
            PumpCommand::UninstallHook(id) => uninstall_hook_on_pump(id),
        }
    }
}

/// Body of the pump thread: creates the hidden owner window and runs its message loop.
unsafe fn run_pump(init: mpsc::Sender<std::result::Result<isize, PlatformError>>, commands: mpsc::Receiver<PumpCommand>) {
    let instance = match GetModuleHandleW(None) {
        Ok(instance) => instance,
        Err(e) => {
            let _ = init.send(Err(PlatformError::call_failed("GetModuleHandleW", e.to_string())));
            return;
        }
    };

    let class_name = w!("TaskbarTrackerOwner");
    let class = WNDCLASSW {
        lpfnWndProc: Some(owner_window_proc),
        hInstance: instance.into(),
        lpszClassName: class_name,
        ..Default::default()
    };
    if RegisterClassW(&class) == 0 {
        let _ = init.send(Err(PlatformError::call_failed("RegisterClassW", "класс не зарегистрирован")));
        return;
    }

    // обычное скрытое окно верхнего уровня: message-only окна не получают SHELLHOOK
    let owner = match CreateWindowExW(
        WS_EX_TOOLWINDOW,
        class_name,
        w!("taskbar-tracker"),
        WS_OVERLAPPED,
        0,
        0,
        0,
        0,
        None,
        None,
        Some(instance.into()),
        None,
    ) {
        Ok(owner) => owner,
        Err(e) => {
            let _ = init.send(Err(PlatformError::call_failed("CreateWindowExW", e.to_string())));
            return;
        }
    };

    let _ = init.send(Ok(owner.0 as isize));

    let mut msg = MSG::default();
    loop {
        // 0 означает WM_QUIT, -1 ошибку
        if GetMessageW(&mut msg, None, 0, 0).0 <= 0 {
            break;
        }
        if msg.message == WM_PUMP_COMMAND {
            drain_commands(&commands);
            continue;
        }
        let _ = TranslateMessage(&msg);
        DispatchMessageW(&msg);
    }
}

/// Owner window plus the thread pumping its messages
pub struct Win32Session {
    pump: PumpHandle,
    thread: Option<JoinHandle<()>>,
}

impl Win32Session {
    pub fn spawn() -> Result<Self> {
        let (init_tx, init_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("taskbar-owner".to_string())
            .spawn(move || unsafe { run_pump(init_tx, command_rx) })
            .map_err(|e| PlatformError::call_failed("thread::spawn", e.to_string()))?;

        let raw = init_rx
            .recv()
            .map_err(|_| PlatformError::call_failed("CreateWindowExW", "поток окна-владельца завершился"))??;

        let owner = WindowHandle(raw);
        info!("Окно-владелец {} создано", owner);

        Ok(Self {
            pump: PumpHandle {
                owner,
                commands: std::sync::Arc::new(Mutex::new(command_tx)),
            },
            thread: Some(thread),
        })
    }

    pub fn pump(&self) -> PumpHandle {
        self.pump.clone()
    }
}

#[async_trait::async_trait]
impl DesktopSession for Win32Session {
    fn owner(&self) -> WindowHandle {
        self.pump.owner()
    }

    async fn run(self: Box<Self>) -> Result<()> {
        let mut session = self;
        let Some(thread) = session.thread.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| tracker_error!(internal, "Ожидание потока окна-владельца прервано: {}", e))?
            .map_err(|_| tracker_error!(internal, "Поток окна-владельца завершился с паникой"))?;

        warn!("Цикл сообщений окна-владельца завершён");
        Ok(())
    }
}

pub struct Win32Platform {
    pump: PumpHandle,
}

impl Win32Platform {
    pub fn new(pump: PumpHandle) -> Self {
        Self { pump }
    }
}

impl NativePlatform for Win32Platform {
    fn register_shell_channel(
        &self,
        owner: WindowHandle,
        sink: RawSink,
    ) -> std::result::Result<ShellRegistration, PlatformError> {
        let mut channel = SHELL_CHANNEL.lock();
        if channel.is_some() {
            return Err(PlatformError::AlreadyRegistered("shell channel"));
        }

        let message_id = unsafe { RegisterWindowMessageW(w!("SHELLHOOK")) };
        if message_id == 0 {
            return Err(PlatformError::call_failed("RegisterWindowMessageW", "SHELLHOOK"));
        }

        let registration = ShellRegistration { owner, message_id };
        *channel = Some(ShellChannel { registration, sink });

        if !unsafe { RegisterShellHookWindow(hwnd(owner)) }.as_bool() {
            *channel = None;
            return Err(PlatformError::call_failed(
                "RegisterShellHookWindow",
                format!("окно {}", owner),
            ));
        }

        Ok(registration)
    }

    fn unregister_shell_channel(&self, registration: ShellRegistration) {
        let mut channel = SHELL_CHANNEL.lock();
        if !matches!(channel.as_ref(), Some(c) if c.registration == registration) {
            return;
        }
        *channel = None;

        if !unsafe { DeregisterShellHookWindow(hwnd(registration.owner)) }.as_bool() {
            warn!("DeregisterShellHookWindow не удался для {}", registration.owner);
        }
    }

    fn install_hook(&self, range: HookRange, sink: RawSink) -> std::result::Result<HookId, PlatformError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.pump.submit(PumpCommand::InstallHook {
            range,
            sink,
            reply: reply_tx,
        })?;

        reply_rx
            .recv_timeout(HOOK_REPLY_TIMEOUT)
            .map_err(|_| PlatformError::call_failed("SetWinEventHook", "поток окна-владельца не ответил"))?
    }

    fn uninstall_hook(&self, hook: HookId) {
        // sink убирается сразу, снятие самого хука выполняется в потоке владельца
        if HOOK_SINKS.lock().remove(&(hook.0 as usize as isize)).is_none() {
            return;
        }
        if let Err(e) = self.pump.submit(PumpCommand::UninstallHook(hook)) {
            warn!("Не удалось передать снятие хука {:?}: {}", hook, e);
        }
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        let foreground = unsafe { GetForegroundWindow() };
        WindowHandle::non_null(foreground.0 as isize)
    }

    fn enumerate_windows(&self) -> Vec<WindowHandle> {
        let mut handles: Vec<WindowHandle> = Vec::new();
        let result = unsafe {
            EnumWindows(
                Some(enum_windows_callback),
                LPARAM(&mut handles as *mut Vec<WindowHandle> as isize),
            )
        };
        if let Err(e) = result {
            warn!("EnumWindows завершился с ошибкой: {}", e);
        }
        debug_if_enabled!("Найдено {} окон верхнего уровня", handles.len());
        handles
    }
}

/// Taskbar classifier backed by live Win32 queries
pub struct Win32Classifier {
    filter: TaskbarFilter,
}

impl Win32Classifier {
    pub fn new(settings: &TrackerSettings, filters: &FilterConfig) -> Self {
        Self {
            filter: TaskbarFilter::new(settings, filters),
        }
    }

    fn probe(&self, handle: WindowHandle) -> WindowProbe {
        let window = hwnd(handle);
        unsafe {
            if !IsWindow(Some(window)).as_bool() {
                return WindowProbe::default();
            }

            WindowProbe {
                fields: WindowFields {
                    title: window_text(window),
                    class_name: class_name(window),
                    process_name: process_name(window),
                    monitor: monitor_of(window),
                },
                exists: true,
                is_root: GetAncestor(window, GA_ROOT) == window,
                is_visible: IsWindowVisible(window).as_bool(),
                is_enabled: IsWindowEnabled(window).as_bool(),
                is_cloaked: cloaked(window),
                has_owner: GetWindow(window, GW_OWNER)
                    .map(|owner| !owner.is_invalid())
                    .unwrap_or(false),
                task_list_deleted: !GetPropW(window, w!("ITaskList_Deleted")).0.is_null(),
                style: GetWindowLongW(window, GWL_STYLE) as u32,
                ex_style: GetWindowLongW(window, GWL_EXSTYLE) as u32,
            }
        }
    }
}

impl WindowClassifier for Win32Classifier {
    fn classify(&self, handle: WindowHandle) -> std::result::Result<Classification, ClassifyError> {
        if handle.is_null() {
            return Err(ClassifyError::Gone(handle));
        }
        Ok(self.filter.classify(self.probe(handle)))
    }

    fn is_cloaked(&self, handle: WindowHandle) -> bool {
        cloaked(hwnd(handle))
    }
}

fn cloaked(window: HWND) -> bool {
    let mut value: u32 = 0;
    let result = unsafe {
        DwmGetWindowAttribute(
            window,
            DWMWA_CLOAKED,
            &mut value as *mut u32 as *mut c_void,
            std::mem::size_of::<u32>() as u32,
        )
    };
    result.is_ok() && value != 0
}

unsafe fn window_text(window: HWND) -> String {
    let mut buffer = [0u16; 512];
    let len = GetWindowTextW(window, &mut buffer);
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

unsafe fn class_name(window: HWND) -> String {
    let mut buffer = [0u16; 256];
    let len = GetClassNameW(window, &mut buffer);
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

unsafe fn monitor_of(window: HWND) -> Option<MonitorId> {
    let monitor = MonitorFromWindow(window, MONITOR_DEFAULTTONULL);
    if monitor.is_invalid() {
        None
    } else {
        Some(MonitorId(monitor.0 as isize))
    }
}

/// Executable file name of the owning process, empty when it can't be queried.
unsafe fn process_name(window: HWND) -> String {
    let mut pid: u32 = 0;
    GetWindowThreadProcessId(window, Some(&mut pid));
    if pid == 0 {
        return String::new();
    }

    let Ok(process) = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) else {
        return String::new();
    };

    let mut buffer = [0u16; 1024];
    let mut size = buffer.len() as u32;
    let queried = QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, PWSTR(buffer.as_mut_ptr()), &mut size);
    let _ = CloseHandle(process);

    if queried.is_err() {
        return String::new();
    }
    let path = String::from_utf16_lossy(&buffer[..size as usize]);
    path.rsplit('\\').next().unwrap_or_default().to_string()
}
