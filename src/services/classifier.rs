//! Window classifier: the external judgment of "does this handle belong on the taskbar".
//!
//! The tracker only consumes this interface. Implementations may query the OS but
//! MUST NOT touch tracker state; the normalizer calls them on every create/update
//! attempt and treats an `Err` as "drop this notification".

use crate::config::{FilterConfig, TrackerSettings};
use crate::error::ClassifyError;
use crate::events::{WindowFields, WindowHandle};
use std::collections::HashSet;

pub const WS_MINIMIZEBOX: u32 = 0x0002_0000;
pub const WS_EX_TOOLWINDOW: u32 = 0x0000_0080;
pub const WS_EX_WINDOWEDGE: u32 = 0x0000_0100;
pub const WS_EX_APPWINDOW: u32 = 0x0004_0000;
pub const WS_EX_NOACTIVATE: u32 = 0x0800_0000;

/// Системные классы, которые никогда не попадают на панель задач
const DEFAULT_EXCLUDED_CLASSES: &[&str] = &[
    "Progman",
    "Shell_TrayWnd",
    "Shell_SecondaryTrayWnd",
    "DV2ControlHost",
    "Windows.UI.Composition.DesktopWindowContentBridge",
    "ForegroundStaging",
    "ApplicationManager_DesktopShellWindow",
    "WorkerW",
    "Button",
    "Windows.UI.Input.InputSite.WindowClass",
    "Windows.Internal.Shell.TabProxyWindow",
    "Microsoft-Windows-Sts-ComponentHost-Elevated",
    "SysListView32",
    "XamlExplorerHostIslandWindow_WASDK",
    "Microsoft.UI.Content.PopupWindowSiteBridge",
    "Microsoft.UI.Content.DesktopChildSiteBridge",
    "SysHeader32",
    "#32768",
    "msctls_statusbar32",
    "DirectUIHWND",
    "SHELLDLL_DefView",
];

const DEFAULT_IGNORED_PROCESSES: &[&str] = &["SearchHost.exe"];

/// Frame classes that are immersive shell surfaces unless they carry `WS_EX_WINDOWEDGE`.
const IMMERSIVE_FRAME_CLASSES: &[&str] = &[
    "ApplicationFrameWindow",
    "Windows.UI.Core.CoreWindow",
    "StartMenuSizingFrame",
    "Shell_LightDismissOverlay",
];

/// Explorer-owned shell surfaces; other processes may reuse these class names.
const EXPLORER_SHELL_CLASSES: &[&str] = &[
    "ImmersiveBackgroundWindow",
    "SearchPane",
    "NativeHWNDHost",
    "Shell_CharmWindow",
    "ImmersiveLauncher",
];

/// Результат классификации окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub accepted: bool,
    /// Fields are extracted even for rejected windows; the host-wrapped retry needs the class.
    pub fields: WindowFields,
}

impl Classification {
    pub fn accepted(fields: WindowFields) -> Self {
        Self {
            accepted: true,
            fields,
        }
    }

    pub fn rejected(fields: WindowFields) -> Self {
        Self {
            accepted: false,
            fields,
        }
    }
}

pub trait WindowClassifier: Send + Sync {
    fn classify(&self, handle: WindowHandle) -> Result<Classification, ClassifyError>;

    /// Current cloak state, read from the OS on every call.
    fn is_cloaked(&self, _handle: WindowHandle) -> bool {
        false
    }
}

/// Окна, чьё содержимое размещено внутри общей оболочки (UWP-фреймы)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostWrapPolicy {
    classes: HashSet<String>,
    processes: HashSet<String>,
}

impl HostWrapPolicy {
    pub fn new(classes: HashSet<String>, processes: HashSet<String>) -> Self {
        Self { classes, processes }
    }

    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self::new(
            settings.host_wrapped_classes.clone(),
            settings.host_wrapped_processes.clone(),
        )
    }

    pub fn matches(&self, fields: &WindowFields) -> bool {
        self.classes.contains(fields.class_name.trim())
            || self.processes.contains(fields.process_name.trim())
    }
}

/// Raw window state gathered from the OS in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowProbe {
    pub fields: WindowFields,
    pub exists: bool,
    /// `GetAncestor(GA_ROOT)` returned the window itself.
    pub is_root: bool,
    pub is_visible: bool,
    pub is_enabled: bool,
    pub is_cloaked: bool,
    pub has_owner: bool,
    /// The shell marked the window with the `ITaskList_Deleted` property.
    pub task_list_deleted: bool,
    pub style: u32,
    pub ex_style: u32,
}

/// Taskbar eligibility rules, independent of how the probe was obtained
#[derive(Debug, Clone)]
pub struct TaskbarFilter {
    strict_filtering: bool,
    excluded_classes: HashSet<String>,
    ignored_processes: HashSet<String>,
    ignored_titles: HashSet<String>,
}

impl TaskbarFilter {
    pub fn new(settings: &TrackerSettings, filters: &FilterConfig) -> Self {
        let excluded_classes = DEFAULT_EXCLUDED_CLASSES
            .iter()
            .map(|c| c.to_string())
            .chain(filters.excluded_classes.iter().map(|c| c.trim().to_string()))
            .collect();
        let ignored_processes = DEFAULT_IGNORED_PROCESSES
            .iter()
            .map(|p| p.to_string())
            .chain(filters.ignored_processes.iter().map(|p| p.trim().to_string()))
            .collect();

        Self {
            strict_filtering: settings.strict_filtering,
            excluded_classes,
            ignored_processes,
            ignored_titles: filters.ignored_titles.iter().cloned().collect(),
        }
    }

    pub fn accepts(&self, probe: &WindowProbe) -> bool {
        let fields = &probe.fields;

        probe.exists
            && probe.is_root
            && !fields.title.trim().is_empty()
            && !probe.is_cloaked
            && !self.is_immersive_shell(probe)
            && self.passes_style_policy(probe)
            && !self.ignored_titles.contains(&fields.title)
            && !self.excluded_classes.contains(&fields.class_name)
            && (fields.process_name.is_empty() || !self.ignored_processes.contains(&fields.process_name))
    }

    pub fn classify(&self, probe: WindowProbe) -> Classification {
        if self.accepts(&probe) {
            Classification::accepted(probe.fields)
        } else {
            Classification::rejected(probe.fields)
        }
    }

    fn is_immersive_shell(&self, probe: &WindowProbe) -> bool {
        let class = probe.fields.class_name.as_str();
        if IMMERSIVE_FRAME_CLASSES.contains(&class) {
            return probe.ex_style & WS_EX_WINDOWEDGE == 0;
        }
        if EXPLORER_SHELL_CLASSES.contains(&class) {
            return probe.fields.process_name.to_lowercase().contains("explorer.exe");
        }
        false
    }

    fn passes_style_policy(&self, probe: &WindowProbe) -> bool {
        let app_window = probe.ex_style & WS_EX_APPWINDOW != 0;
        let tool_window = probe.ex_style & WS_EX_TOOLWINDOW != 0;
        let no_activate = probe.ex_style & WS_EX_NOACTIVATE != 0;
        let can_minimize = probe.style & WS_MINIMIZEBOX != 0 && probe.is_enabled;

        probe.is_visible
            && (!probe.has_owner || app_window)
            && (!no_activate || app_window)
            && !tool_window
            && !probe.task_list_deleted
            && (!self.strict_filtering || can_minimize)
    }
}
