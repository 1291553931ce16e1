use crate::events::WindowHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка запуска трекера: {0}")]
    Start(#[from] StartError),

    #[error("Ошибка платформы: {0}")]
    Platform(#[from] PlatformError),

    #[error("Ошибка классификатора: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failures of `WindowTracker::start`. The tracker is fully stopped whenever one is returned.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Недопустимый дескриптор окна-владельца: {0}")]
    InvalidOwner(WindowHandle),

    #[error("Нет активного tokio runtime для цикла событий")]
    NoRuntime,

    #[error("Не удалось зарегистрировать shell-канал: {0}")]
    ShellChannel(#[source] PlatformError),

    #[error("Не удалось установить WinEvent-хук: {0}")]
    Hook(#[source] PlatformError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{call} вернул ошибку: {detail}")]
    CallFailed { call: &'static str, detail: String },

    #[error("Регистрация уже выполнена: {0}")]
    AlreadyRegistered(&'static str),
}

impl PlatformError {
    pub fn call_failed(call: &'static str, detail: impl Into<String>) -> Self {
        PlatformError::CallFailed {
            call,
            detail: detail.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Окно {0} больше не существует")]
    Gone(WindowHandle),

    #[error("Не удалось опросить окно {handle}: {detail}")]
    Query { handle: WindowHandle, detail: String },
}

/// Why a normalizer handler refused a notification. Idempotent no-ops are not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Классификатор отказал для {handle}: {source}")]
    Classifier {
        handle: WindowHandle,
        #[source]
        source: ClassifyError,
    },

    #[error("Канал show/hide отключён строгой фильтрацией ({0})")]
    ChannelDisabled(crate::events::WindowEventKind),
}

/// Why the bridge dropped a raw notification instead of posting it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    #[error("неизвестный shell-код {0:#x}")]
    UnknownShellCode(u32),

    #[error("неизвестное WinEvent-событие {0:#x}")]
    UnknownHookEvent(u32),

    #[error("событие относится к дочернему объекту (object_id={object_id}, child_id={child_id})")]
    NotWholeWindow { object_id: i32, child_id: i32 },

    #[error("пустой дескриптор окна")]
    NullHandle,

    #[error("событие show/hide при строгой фильтрации")]
    ChannelDisabled,

    #[error("мост остановлен")]
    Inactive,
}

#[macro_export]
macro_rules! tracker_error {
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::TrackerError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::TrackerError::Internal(format!($($arg)*))
    };
}
