use super::window::WindowEventKind;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

// Коды shell-хука (wParam сообщения SHELLHOOK)
pub const HSHELL_WINDOWCREATED: u32 = 1;
pub const HSHELL_WINDOWDESTROYED: u32 = 2;
pub const HSHELL_WINDOWACTIVATED: u32 = 4;
pub const HSHELL_REDRAW: u32 = 6;
pub const HSHELL_ENDTASK: u32 = 10;
pub const HSHELL_WINDOWREPLACED: u32 = 13;
pub const HSHELL_WINDOWREPLACING: u32 = 14;
pub const HSHELL_MONITORCHANGED: u32 = 16;
pub const HSHELL_HIGHBIT: u32 = 0x8000;
pub const HSHELL_FLASH: u32 = HSHELL_REDRAW | HSHELL_HIGHBIT;
pub const HSHELL_RUDEAPPACTIVATED: u32 = HSHELL_WINDOWACTIVATED | HSHELL_HIGHBIT;

// WinEvent-коды видимости и маскировки
pub const EVENT_OBJECT_SHOW: u32 = 0x8002;
pub const EVENT_OBJECT_HIDE: u32 = 0x8003;
pub const EVENT_OBJECT_CLOAKED: u32 = 0x8017;
pub const EVENT_OBJECT_UNCLOAKED: u32 = 0x8018;

/// `OBJID_WINDOW` and `CHILDID_SELF`: the event concerns the window itself.
pub const OBJID_WINDOW: i32 = 0;
pub const CHILDID_SELF: i32 = 0;

static SHELL_CODES: Lazy<HashMap<u32, WindowEventKind>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(HSHELL_WINDOWCREATED, WindowEventKind::Created);
    map.insert(HSHELL_WINDOWDESTROYED, WindowEventKind::Destroyed);
    map.insert(HSHELL_WINDOWACTIVATED, WindowEventKind::Activated);
    map.insert(HSHELL_RUDEAPPACTIVATED, WindowEventKind::Activated);
    map.insert(HSHELL_REDRAW, WindowEventKind::Redraw);
    map.insert(HSHELL_FLASH, WindowEventKind::Flash);
    map.insert(HSHELL_ENDTASK, WindowEventKind::EndTask);
    map.insert(HSHELL_WINDOWREPLACING, WindowEventKind::Replacing);
    map.insert(HSHELL_WINDOWREPLACED, WindowEventKind::Replaced);
    map.insert(HSHELL_MONITORCHANGED, WindowEventKind::MonitorChanged);
    map
});

static HOOK_EVENTS: Lazy<HashMap<u32, WindowEventKind>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(EVENT_OBJECT_CLOAKED, WindowEventKind::Cloaked);
    map.insert(EVENT_OBJECT_UNCLOAKED, WindowEventKind::Uncloaked);
    map.insert(EVENT_OBJECT_SHOW, WindowEventKind::Show);
    map.insert(EVENT_OBJECT_HIDE, WindowEventKind::Hide);
    map
});

pub fn shell_code_kind(code: u32) -> Option<WindowEventKind> {
    SHELL_CODES.get(&code).copied()
}

pub fn hook_event_kind(event: u32) -> Option<WindowEventKind> {
    HOOK_EVENTS.get(&event).copied()
}

/// Диапазон WinEvent-кодов для одной регистрации хука
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookRange {
    pub min: u32,
    pub max: u32,
}

impl HookRange {
    pub const CLOAK: HookRange = HookRange {
        min: EVENT_OBJECT_CLOAKED,
        max: EVENT_OBJECT_UNCLOAKED,
    };

    pub const SHOW_HIDE: HookRange = HookRange {
        min: EVENT_OBJECT_SHOW,
        max: EVENT_OBJECT_HIDE,
    };

    pub fn contains(&self, event: u32) -> bool {
        (self.min..=self.max).contains(&event)
    }
}

impl fmt::Display for HookRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}..={:#06x}", self.min, self.max)
    }
}

/// Сырое уведомление ОС до декодирования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawNotification {
    /// Сообщение SHELLHOOK: (wParam, lParam)
    Shell { code: u32, handle: isize },
    /// Обратный вызов WinEvent
    Hook {
        event: u32,
        handle: isize,
        object_id: i32,
        child_id: i32,
    },
}

impl RawNotification {
    pub fn shell(code: u32, handle: isize) -> Self {
        RawNotification::Shell { code, handle }
    }

    /// Hook payload about the whole window.
    pub fn hook(event: u32, handle: isize) -> Self {
        RawNotification::Hook {
            event,
            handle,
            object_id: OBJID_WINDOW,
            child_id: CHILDID_SELF,
        }
    }
}
