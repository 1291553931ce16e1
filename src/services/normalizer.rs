//! Event normalizer: the per-event state machine over the window registry.
//!
//! Runs only on the owning loop. Every handler either mutates the registry and
//! returns the tracker events to fan out, or returns a [`NormalizeError`] with the
//! registry untouched. Delays are never awaited here, they are armed on the
//! scheduler and come back through [`EventNormalizer::on_deadline`].

use crate::config::TrackerSettings;
use crate::error::NormalizeError;
use crate::events::{TrackerEvent, TrackerEventKind, WindowEvent, WindowEventKind, WindowHandle};
use crate::services::classifier::{Classification, HostWrapPolicy, WindowClassifier};
use crate::services::platform::NativePlatform;
use crate::services::registry::{TrackedWindow, WindowRegistry};
use crate::services::scheduler::{Scheduler, TimerKey, TimerPurpose};
use crate::{debug_if_enabled, trace_if_enabled};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Events produced by one handler, in emission order.
pub type Emitted = SmallVec<[TrackerEvent; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitPolicy {
    IfChanged,
    Always,
}

#[derive(Debug, Clone, Copy, Default)]
struct AddOptions {
    active: bool,
    flashing: bool,
    retry_host_wrapped: bool,
}

pub struct EventNormalizer {
    registry: Arc<RwLock<WindowRegistry>>,
    classifier: Arc<dyn WindowClassifier>,
    platform: Arc<dyn NativePlatform>,
    scheduler: Arc<dyn Scheduler>,
    settings: TrackerSettings,
    host_wrap: HostWrapPolicy,
}

impl EventNormalizer {
    pub fn new(
        registry: Arc<RwLock<WindowRegistry>>,
        classifier: Arc<dyn WindowClassifier>,
        platform: Arc<dyn NativePlatform>,
        scheduler: Arc<dyn Scheduler>,
        settings: TrackerSettings,
    ) -> Self {
        let host_wrap = HostWrapPolicy::from_settings(&settings);
        Self {
            registry,
            classifier,
            platform,
            scheduler,
            settings,
            host_wrap,
        }
    }

    pub fn apply(&self, event: WindowEvent) -> Result<Emitted, NormalizeError> {
        trace_if_enabled!("Обработка события {}", event);

        if event.kind == WindowEventKind::Activated {
            return self.on_activated(event.handle);
        }

        // мост не пропускает пустые дескрипторы ни для чего, кроме Activated
        let Some(handle) = event.handle else {
            return Ok(Emitted::new());
        };

        match event.kind {
            WindowEventKind::Created => self.on_created(handle),
            WindowEventKind::Destroyed | WindowEventKind::EndTask | WindowEventKind::Replaced => {
                Ok(self.remove(handle))
            }
            WindowEventKind::Redraw => self.on_redraw(handle),
            WindowEventKind::Flash => self.on_flash(handle),
            WindowEventKind::Replacing => {
                if self.is_tracked(handle) {
                    self.refresh(handle, EmitPolicy::Always)
                } else {
                    Ok(Emitted::new())
                }
            }
            WindowEventKind::MonitorChanged => self.on_monitor_changed(handle),
            WindowEventKind::Cloaked => self.on_cloaked(handle),
            WindowEventKind::Uncloaked => {
                if self.is_tracked(handle) {
                    self.touch(handle)
                } else {
                    self.try_add(handle, AddOptions::default())
                }
            }
            WindowEventKind::Show => {
                self.ensure_visibility_channel(event.kind)?;
                if self.is_tracked(handle) {
                    self.refresh(handle, EmitPolicy::Always)
                } else {
                    self.try_add(handle, AddOptions::default())
                }
            }
            WindowEventKind::Hide => {
                self.ensure_visibility_channel(event.kind)?;
                Ok(self.remove(handle))
            }
            WindowEventKind::Activated => Ok(Emitted::new()),
        }
    }

    /// Handles a claimed deadline from the scheduler.
    pub fn on_deadline(&self, key: TimerKey) -> Result<Emitted, NormalizeError> {
        let tracked = self.is_tracked(key.handle);
        match key.purpose {
            TimerPurpose::Refresh if tracked => self.refresh(key.handle, EmitPolicy::IfChanged),
            TimerPurpose::HostRetry | TimerPurpose::MonitorSettle if !tracked => {
                debug_if_enabled!("Повторная проверка {} ({:?})", key.handle, key.purpose);
                self.try_add(key.handle, AddOptions::default())
            }
            _ => Ok(Emitted::new()),
        }
    }

    /// Brings the registry in line with the windows that exist right now.
    ///
    /// Used on every `start`. Tracked windows missing from `handles` are removed,
    /// surviving ones are re-evaluated, new ones are added, and `foreground`
    /// becomes the only active window.
    pub fn enumerate(&self, handles: &[WindowHandle], foreground: Option<WindowHandle>) -> Emitted {
        let mut emitted = Emitted::new();
        let mut failed = 0usize;

        let present: HashSet<WindowHandle> = handles.iter().copied().collect();
        let mut stale = self.registry.read().handles();
        stale.sort();
        for handle in stale {
            let result = if present.contains(&handle) {
                self.refresh(handle, EmitPolicy::IfChanged)
            } else {
                debug_if_enabled!("Окно {} исчезло, пока трекер был остановлен", handle);
                Ok(self.remove(handle))
            };
            match result {
                Ok(events) => emitted.extend(events),
                Err(e) => {
                    failed += 1;
                    debug_if_enabled!("Окно не переоценено при перечислении: {}", e);
                }
            }
        }

        for &handle in handles {
            let options = AddOptions {
                active: Some(handle) == foreground,
                ..AddOptions::default()
            };
            match self.try_add(handle, options) {
                Ok(events) => emitted.extend(events),
                Err(e) => {
                    failed += 1;
                    debug_if_enabled!("Окно пропущено при перечислении: {}", e);
                }
            }
        }

        {
            let mut registry = self.registry.write();
            let changes = registry.set_active(foreground);
            emitted.extend(Self::updated_views(&registry, &changes));
        }

        if failed > 0 {
            warn!("При перечислении пропущено {} окон из-за ошибок классификатора", failed);
        }
        let count = |kind: TrackerEventKind| emitted.iter().filter(|e| e.kind == kind).count();
        info!(
            "Перечисление завершено: добавлено {}, удалено {}, найдено окон {}",
            count(TrackerEventKind::Added),
            count(TrackerEventKind::Removed),
            handles.len()
        );
        emitted
    }

    fn is_tracked(&self, handle: WindowHandle) -> bool {
        self.registry.read().contains(handle)
    }

    fn ensure_visibility_channel(&self, kind: WindowEventKind) -> Result<(), NormalizeError> {
        if self.settings.strict_filtering {
            return Err(NormalizeError::ChannelDisabled(kind));
        }
        Ok(())
    }

    fn classify(&self, handle: WindowHandle) -> Result<Classification, NormalizeError> {
        self.classifier
            .classify(handle)
            .map_err(|source| NormalizeError::Classifier { handle, source })
    }

    fn on_created(&self, handle: WindowHandle) -> Result<Emitted, NormalizeError> {
        if self.is_tracked(handle) {
            return self.refresh(handle, EmitPolicy::IfChanged);
        }
        self.try_add(
            handle,
            AddOptions {
                retry_host_wrapped: true,
                ..AddOptions::default()
            },
        )
    }

    fn on_activated(&self, handle: Option<WindowHandle>) -> Result<Emitted, NormalizeError> {
        let Some(target) = handle.or_else(|| self.platform.foreground_window()) else {
            debug_if_enabled!("Activated без дескриптора и без активного окна, пропуск");
            return Ok(Emitted::new());
        };

        if !self.is_tracked(target) {
            let classification = self.classify(target)?;
            if classification.accepted {
                return Ok(self.insert(
                    target,
                    classification,
                    AddOptions {
                        active: true,
                        ..AddOptions::default()
                    },
                ));
            }
            // активным стало окно вне панели задач: снимаем флаг со всех
            let mut registry = self.registry.write();
            let changes = registry.set_active(None);
            return Ok(Self::updated_views(&registry, &changes));
        }

        let mut registry = self.registry.write();
        let mut changes = registry.set_active(Some(target));
        if let Some(window) = registry.get_mut(target) {
            if window.is_flashing {
                window.is_flashing = false;
                if !changes.contains(&target) {
                    changes.push(target);
                }
            }
        }
        Ok(Self::updated_views(&registry, &changes))
    }

    fn on_redraw(&self, handle: WindowHandle) -> Result<Emitted, NormalizeError> {
        if self.is_tracked(handle) {
            self.scheduler.schedule(
                TimerKey::new(handle, TimerPurpose::Refresh),
                self.settings.redraw_debounce,
            );
            return Ok(Emitted::new());
        }
        self.try_add(handle, AddOptions::default())
    }

    fn on_flash(&self, handle: WindowHandle) -> Result<Emitted, NormalizeError> {
        {
            let mut registry = self.registry.write();
            if let Some(window) = registry.get_mut(handle) {
                if window.is_flashing {
                    return Ok(Emitted::new());
                }
                window.is_flashing = true;
                return Ok(SmallVec::from_elem(TrackerEvent::updated(window.view()), 1));
            }
        }
        self.try_add(
            handle,
            AddOptions {
                flashing: true,
                ..AddOptions::default()
            },
        )
    }

    fn on_monitor_changed(&self, handle: WindowHandle) -> Result<Emitted, NormalizeError> {
        if !self.is_tracked(handle) {
            self.scheduler.schedule(
                TimerKey::new(handle, TimerPurpose::MonitorSettle),
                self.settings.monitor_settle,
            );
            return Ok(Emitted::new());
        }

        let classification = self.classify(handle)?;
        let mut registry = self.registry.write();
        let Some(window) = registry.get_mut(handle) else {
            return Ok(Emitted::new());
        };

        let fields_changed = !window.fields.same_except_monitor(&classification.fields);
        window.fields = classification.fields;

        let view = window.view();
        let mut emitted = Emitted::new();
        emitted.push(TrackerEvent::monitor_changed(view.clone()));
        if fields_changed {
            emitted.push(TrackerEvent::updated(view));
        }
        Ok(emitted)
    }

    fn on_cloaked(&self, handle: WindowHandle) -> Result<Emitted, NormalizeError> {
        let host_wrapped = {
            let registry = self.registry.read();
            let Some(window) = registry.get(handle) else {
                return Ok(Emitted::new());
            };
            self.host_wrap.matches(&window.fields)
        };

        if self.settings.keep_cloaked {
            return self.touch(handle);
        }
        if host_wrapped && !self.settings.strict_filtering {
            debug_if_enabled!("Host-wrapped окно {} замаскировано, остаётся на панели", handle);
            return self.touch(handle);
        }
        Ok(self.remove(handle))
    }

    /// Re-reads fields of a tracked window and always reports it as updated.
    fn touch(&self, handle: WindowHandle) -> Result<Emitted, NormalizeError> {
        let classification = self.classify(handle)?;
        let mut registry = self.registry.write();
        let Some(window) = registry.get_mut(handle) else {
            return Ok(Emitted::new());
        };
        window.fields = classification.fields;
        Ok(SmallVec::from_elem(TrackerEvent::updated(window.view()), 1))
    }

    /// Full re-evaluation of a tracked window against the classifier.
    fn refresh(&self, handle: WindowHandle, policy: EmitPolicy) -> Result<Emitted, NormalizeError> {
        let classification = self.classify(handle)?;

        let tolerated = !classification.accepted
            && ((!self.settings.strict_filtering && self.host_wrap.matches(&classification.fields))
                || (self.settings.keep_cloaked && self.classifier.is_cloaked(handle)));

        if !classification.accepted && !tolerated {
            debug_if_enabled!("Окно {} больше не проходит фильтр", handle);
            return Ok(self.remove(handle));
        }

        let mut registry = self.registry.write();
        let Some(window) = registry.get_mut(handle) else {
            return Ok(Emitted::new());
        };

        let changed = window.fields != classification.fields;
        window.fields = classification.fields;

        if changed || tolerated || policy == EmitPolicy::Always {
            Ok(SmallVec::from_elem(TrackerEvent::updated(window.view()), 1))
        } else {
            Ok(Emitted::new())
        }
    }

    fn try_add(&self, handle: WindowHandle, options: AddOptions) -> Result<Emitted, NormalizeError> {
        if self.is_tracked(handle) {
            return Ok(Emitted::new());
        }

        let classification = self.classify(handle)?;
        if !classification.accepted {
            if options.retry_host_wrapped && self.host_wrap.matches(&classification.fields) {
                debug_if_enabled!(
                    "Host-wrapped окно {} ещё не готово, повтор через {}мс",
                    handle,
                    self.settings.host_retry.as_millis()
                );
                self.scheduler.schedule(
                    TimerKey::new(handle, TimerPurpose::HostRetry),
                    self.settings.host_retry,
                );
            }
            return Ok(Emitted::new());
        }

        Ok(self.insert(handle, classification, options))
    }

    fn insert(&self, handle: WindowHandle, classification: Classification, options: AddOptions) -> Emitted {
        let mut registry = self.registry.write();
        let window = TrackedWindow::new(handle, classification.fields).flashing(options.flashing);
        if !registry.insert(window) {
            return Emitted::new();
        }

        let mut emitted = Emitted::new();
        if options.active {
            let changes = registry.set_active(Some(handle));
            let previous: SmallVec<[WindowHandle; 2]> =
                changes.into_iter().filter(|h| *h != handle).collect();
            emitted.extend(Self::updated_views(&registry, &previous));
        }

        if let Some(window) = registry.get(handle) {
            debug_if_enabled!("Окно добавлено: {} {}", handle, window.fields);
            emitted.push(TrackerEvent::added(window.view()));
        }
        emitted
    }

    fn remove(&self, handle: WindowHandle) -> Emitted {
        let removed = self.registry.write().remove(handle);
        self.scheduler.cancel(handle);

        match removed {
            Some(window) => {
                debug_if_enabled!("Окно удалено: {} {}", handle, window.fields);
                SmallVec::from_elem(TrackerEvent::removed(window.view()), 1)
            }
            None => Emitted::new(),
        }
    }

    fn updated_views(registry: &WindowRegistry, handles: &[WindowHandle]) -> Emitted {
        handles
            .iter()
            .filter_map(|h| registry.get(*h))
            .map(|w| TrackerEvent::updated(w.view()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MonitorId, WindowFields};
    use crate::services::platform::SimulatedDesktop;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Планировщик, который только записывает вызовы
    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<(TimerKey, Duration)>>,
        cancelled: Mutex<Vec<WindowHandle>>,
    }

    impl Scheduler for RecordingScheduler {
        fn schedule(&self, key: TimerKey, delay: Duration) {
            self.scheduled.lock().push((key, delay));
        }

        fn cancel(&self, handle: WindowHandle) {
            self.cancelled.lock().push(handle);
        }

        fn cancel_all(&self) {}
    }

    struct Fixture {
        desktop: Arc<SimulatedDesktop>,
        scheduler: Arc<RecordingScheduler>,
        registry: Arc<RwLock<WindowRegistry>>,
        normalizer: EventNormalizer,
    }

    fn fixture(settings: TrackerSettings) -> Fixture {
        let desktop = Arc::new(SimulatedDesktop::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let registry = Arc::new(RwLock::new(WindowRegistry::new()));
        let normalizer = EventNormalizer::new(
            Arc::clone(&registry),
            desktop.clone(),
            desktop.clone(),
            scheduler.clone(),
            settings,
        );
        Fixture {
            desktop,
            scheduler,
            registry,
            normalizer,
        }
    }

    fn ev(kind: WindowEventKind, raw: isize) -> WindowEvent {
        WindowEvent::new(kind, WindowHandle(raw))
    }

    fn kinds(emitted: &Emitted) -> Vec<TrackerEventKind> {
        emitted.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_created_adds_accepted_window_once() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x10), WindowFields::new("Editor"));

        let emitted = f.normalizer.apply(ev(WindowEventKind::Created, 0x10)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added]);

        let again = f.normalizer.apply(ev(WindowEventKind::Created, 0x10)).unwrap();
        assert!(again.is_empty());
        assert_eq!(f.registry.read().len(), 1);
    }

    #[test]
    fn test_host_wrapped_created_retries_once() {
        let f = fixture(TrackerSettings::default());
        let handle = WindowHandle(0x20);
        f.desktop.add_window(handle, WindowFields::new("").with_class("ApplicationFrameWindow"));
        f.desktop.set_accepted(handle, false);

        let emitted = f.normalizer.apply(ev(WindowEventKind::Created, 0x20)).unwrap();
        assert!(emitted.is_empty());
        assert_eq!(
            f.scheduler.scheduled.lock().as_slice(),
            &[(TimerKey::new(handle, TimerPurpose::HostRetry), Duration::from_millis(500))]
        );

        // к моменту повтора у окна появился заголовок
        f.desktop.set_title(handle, "Calculator");
        f.desktop.set_accepted(handle, true);
        let emitted = f
            .normalizer
            .on_deadline(TimerKey::new(handle, TimerPurpose::HostRetry))
            .unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added]);
        assert_eq!(emitted[0].window.title, "Calculator");
        assert_eq!(f.scheduler.scheduled.lock().len(), 1);
    }

    #[test]
    fn test_plain_rejected_created_is_not_retried() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x21), WindowFields::new("tooltip").with_class("tooltips_class32"));
        f.desktop.set_accepted(WindowHandle(0x21), false);

        assert!(f.normalizer.apply(ev(WindowEventKind::Created, 0x21)).unwrap().is_empty());
        assert!(f.scheduler.scheduled.lock().is_empty());
    }

    #[test]
    fn test_activation_keeps_single_active_window() {
        let f = fixture(TrackerSettings::default());
        for raw in [1, 2] {
            f.desktop.add_window(WindowHandle(raw), WindowFields::new(format!("w{}", raw)));
            f.normalizer.apply(ev(WindowEventKind::Created, raw)).unwrap();
        }

        f.normalizer.apply(ev(WindowEventKind::Activated, 1)).unwrap();
        let emitted = f.normalizer.apply(ev(WindowEventKind::Activated, 2)).unwrap();

        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated, TrackerEventKind::Updated]);
        assert_eq!(emitted[0].handle, WindowHandle(1));
        assert!(!emitted[0].window.is_active);
        assert!(emitted[1].window.is_active);
        assert_eq!(f.registry.read().active(), Some(WindowHandle(2)));
    }

    #[test]
    fn test_activated_untracked_window_is_added_as_active() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(1), WindowFields::new("old"));
        f.normalizer.apply(ev(WindowEventKind::Activated, 1)).unwrap();

        f.desktop.add_window(WindowHandle(2), WindowFields::new("new"));
        let emitted = f.normalizer.apply(ev(WindowEventKind::Activated, 2)).unwrap();

        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated, TrackerEventKind::Added]);
        assert!(emitted[1].window.is_active);
        assert_eq!(f.registry.read().active(), Some(WindowHandle(2)));
    }

    #[test]
    fn test_activated_without_handle_uses_foreground() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(7), WindowFields::new("seven"));
        f.normalizer.apply(ev(WindowEventKind::Created, 7)).unwrap();

        f.desktop.set_foreground(None);
        assert!(f.normalizer.apply(WindowEvent::activated(None)).unwrap().is_empty());

        f.desktop.set_foreground(Some(WindowHandle(7)));
        f.normalizer.apply(WindowEvent::activated(None)).unwrap();
        assert_eq!(f.registry.read().active(), Some(WindowHandle(7)));
    }

    #[test]
    fn test_activating_rejected_window_clears_active() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(1), WindowFields::new("a"));
        f.normalizer.apply(ev(WindowEventKind::Activated, 1)).unwrap();

        f.desktop.add_window(WindowHandle(9), WindowFields::new("desktop"));
        f.desktop.set_accepted(WindowHandle(9), false);
        let emitted = f.normalizer.apply(ev(WindowEventKind::Activated, 9)).unwrap();

        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);
        assert_eq!(f.registry.read().active(), None);
    }

    #[test]
    fn test_flash_then_activate_clears_flashing() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(3), WindowFields::new("chat"));
        f.normalizer.apply(ev(WindowEventKind::Created, 3)).unwrap();

        let emitted = f.normalizer.apply(ev(WindowEventKind::Flash, 3)).unwrap();
        assert!(emitted[0].window.is_flashing);
        assert!(f.normalizer.apply(ev(WindowEventKind::Flash, 3)).unwrap().is_empty());

        let emitted = f.normalizer.apply(ev(WindowEventKind::Activated, 3)).unwrap();
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].window.is_active);
        assert!(!emitted[0].window.is_flashing);
    }

    #[test]
    fn test_flash_on_untracked_adds_flashing_window() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(4), WindowFields::new("mail"));

        let emitted = f.normalizer.apply(ev(WindowEventKind::Flash, 4)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added]);
        assert!(emitted[0].window.is_flashing);
    }

    #[test]
    fn test_redraw_on_tracked_window_is_debounced() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(5), WindowFields::new("title 1"));
        f.normalizer.apply(ev(WindowEventKind::Created, 5)).unwrap();
        let calls = f.desktop.classify_calls(WindowHandle(5));

        for _ in 0..3 {
            assert!(f.normalizer.apply(ev(WindowEventKind::Redraw, 5)).unwrap().is_empty());
        }
        assert_eq!(f.desktop.classify_calls(WindowHandle(5)), calls);
        assert_eq!(f.scheduler.scheduled.lock().len(), 3);

        f.desktop.set_title(WindowHandle(5), "title 2");
        let emitted = f
            .normalizer
            .on_deadline(TimerKey::new(WindowHandle(5), TimerPurpose::Refresh))
            .unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);
        assert_eq!(emitted[0].window.title, "title 2");

        // без изменений полей Refresh молчит
        let emitted = f
            .normalizer
            .on_deadline(TimerKey::new(WindowHandle(5), TimerPurpose::Refresh))
            .unwrap();
        assert!(emitted.is_empty());
    }

    #[test]
    fn test_refresh_removes_window_that_stopped_qualifying() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(6), WindowFields::new("dialog"));
        f.normalizer.apply(ev(WindowEventKind::Created, 6)).unwrap();

        f.desktop.set_accepted(WindowHandle(6), false);
        let emitted = f
            .normalizer
            .on_deadline(TimerKey::new(WindowHandle(6), TimerPurpose::Refresh))
            .unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Removed]);
        assert!(f.scheduler.cancelled.lock().contains(&WindowHandle(6)));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(8), WindowFields::new("x"));
        f.normalizer.apply(ev(WindowEventKind::Created, 8)).unwrap();

        let first = f.normalizer.apply(ev(WindowEventKind::Destroyed, 8)).unwrap();
        let second = f.normalizer.apply(ev(WindowEventKind::Destroyed, 8)).unwrap();
        let end_task = f.normalizer.apply(ev(WindowEventKind::EndTask, 8)).unwrap();

        assert_eq!(kinds(&first), vec![TrackerEventKind::Removed]);
        assert!(second.is_empty());
        assert!(end_task.is_empty());
        assert!(f.registry.read().is_empty());
    }

    #[test]
    fn test_cloak_removes_unless_kept() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x30), WindowFields::new("Notepad").with_class("Notepad"));
        f.normalizer.apply(ev(WindowEventKind::Created, 0x30)).unwrap();

        let emitted = f.normalizer.apply(ev(WindowEventKind::Cloaked, 0x30)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Removed]);

        // окно вернулось из другого виртуального рабочего стола
        let emitted = f.normalizer.apply(ev(WindowEventKind::Uncloaked, 0x30)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added]);
    }

    #[test]
    fn test_keep_cloaked_reports_update() {
        let f = fixture(TrackerSettings::default().with_keep_cloaked(true));
        f.desktop.add_window(WindowHandle(0x31), WindowFields::new("Player"));
        f.normalizer.apply(ev(WindowEventKind::Created, 0x31)).unwrap();

        f.desktop.set_cloaked(WindowHandle(0x31), true);
        let emitted = f.normalizer.apply(ev(WindowEventKind::Cloaked, 0x31)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);

        // полная переоценка отвергает окно, но маскировка удерживает его
        f.desktop.set_accepted(WindowHandle(0x31), false);
        let emitted = f
            .normalizer
            .on_deadline(TimerKey::new(WindowHandle(0x31), TimerPurpose::Refresh))
            .unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);
        assert!(f.registry.read().contains(WindowHandle(0x31)));
    }

    #[test]
    fn test_host_wrapped_survives_cloak_unless_strict() {
        let fields = WindowFields::new("Settings")
            .with_class("ApplicationFrameWindow")
            .with_process("ApplicationFrameHost.exe");

        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x40), fields.clone());
        f.normalizer.apply(ev(WindowEventKind::Created, 0x40)).unwrap();
        let emitted = f.normalizer.apply(ev(WindowEventKind::Cloaked, 0x40)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);

        let f = fixture(TrackerSettings::default().with_strict_filtering(true));
        f.desktop.add_window(WindowHandle(0x40), fields);
        f.normalizer.apply(ev(WindowEventKind::Created, 0x40)).unwrap();
        let emitted = f.normalizer.apply(ev(WindowEventKind::Cloaked, 0x40)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Removed]);
    }

    #[test]
    fn test_monitor_change_on_tracked_window() {
        let f = fixture(TrackerSettings::default());
        let handle = WindowHandle(0x50);
        f.desktop.add_window(handle, WindowFields::new("doc").with_monitor(MonitorId(1)));
        f.normalizer.apply(ev(WindowEventKind::Created, 0x50)).unwrap();

        f.desktop.set_monitor(handle, MonitorId(2));
        let emitted = f.normalizer.apply(ev(WindowEventKind::MonitorChanged, 0x50)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::MonitorChanged]);
        assert_eq!(emitted[0].window.monitor, Some(MonitorId(2)));

        f.desktop.set_monitor(handle, MonitorId(1));
        f.desktop.set_title(handle, "doc *");
        let emitted = f.normalizer.apply(ev(WindowEventKind::MonitorChanged, 0x50)).unwrap();
        assert_eq!(
            kinds(&emitted),
            vec![TrackerEventKind::MonitorChanged, TrackerEventKind::Updated]
        );
    }

    #[test]
    fn test_monitor_change_on_untracked_window_settles_first() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x51), WindowFields::new("late"));

        assert!(f.normalizer.apply(ev(WindowEventKind::MonitorChanged, 0x51)).unwrap().is_empty());
        assert_eq!(
            f.scheduler.scheduled.lock()[0],
            (TimerKey::new(WindowHandle(0x51), TimerPurpose::MonitorSettle), Duration::from_millis(50))
        );

        let emitted = f
            .normalizer
            .on_deadline(TimerKey::new(WindowHandle(0x51), TimerPurpose::MonitorSettle))
            .unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added]);
    }

    #[test]
    fn test_replacing_always_reports_update() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x60), WindowFields::new("same"));
        f.normalizer.apply(ev(WindowEventKind::Created, 0x60)).unwrap();

        let emitted = f.normalizer.apply(ev(WindowEventKind::Replacing, 0x60)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);

        let emitted = f.normalizer.apply(ev(WindowEventKind::Replaced, 0x60)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Removed]);
    }

    #[test]
    fn test_show_hide_follow_strict_policy() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x70), WindowFields::new("panel"));
        let emitted = f.normalizer.apply(ev(WindowEventKind::Show, 0x70)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added]);
        let emitted = f.normalizer.apply(ev(WindowEventKind::Hide, 0x70)).unwrap();
        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Removed]);

        let strict = fixture(TrackerSettings::default().with_strict_filtering(true));
        strict.desktop.add_window(WindowHandle(0x70), WindowFields::new("panel"));
        assert_eq!(
            strict.normalizer.apply(ev(WindowEventKind::Show, 0x70)),
            Err(NormalizeError::ChannelDisabled(WindowEventKind::Show))
        );
        assert!(strict.registry.read().is_empty());
    }

    #[test]
    fn test_classifier_failure_leaves_registry_unchanged() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(0x80), WindowFields::new("flaky"));
        f.normalizer.apply(ev(WindowEventKind::Created, 0x80)).unwrap();

        f.desktop.set_classify_failure(WindowHandle(0x80), true);
        f.desktop.set_title(WindowHandle(0x80), "changed");
        let result = f.normalizer.apply(ev(WindowEventKind::Replacing, 0x80));

        assert!(matches!(result, Err(NormalizeError::Classifier { .. })));
        let registry = f.registry.read();
        assert_eq!(registry.get(WindowHandle(0x80)).unwrap().fields.title, "flaky");
    }

    #[test]
    fn test_enumerate_marks_foreground_active() {
        let f = fixture(TrackerSettings::default());
        for raw in [1, 2, 3] {
            f.desktop.add_window(WindowHandle(raw), WindowFields::new(format!("w{}", raw)));
        }
        f.desktop.set_accepted(WindowHandle(3), false);

        let handles = [WindowHandle(1), WindowHandle(2), WindowHandle(3)];
        let emitted = f.normalizer.enumerate(&handles, Some(WindowHandle(2)));

        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Added, TrackerEventKind::Added]);
        let registry = f.registry.read();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active(), Some(WindowHandle(2)));
    }

    #[test]
    fn test_enumerate_reconciles_tracked_windows() {
        let f = fixture(TrackerSettings::default());
        for raw in [1, 2, 3] {
            f.desktop.add_window(WindowHandle(raw), WindowFields::new(format!("w{}", raw)));
        }
        f.normalizer.enumerate(&[WindowHandle(1), WindowHandle(2), WindowHandle(3)], Some(WindowHandle(1)));

        // окно 1 закрыто, окно 3 больше не проходит фильтр, окно 2 стало активным
        f.desktop.remove_window(WindowHandle(1));
        f.desktop.set_accepted(WindowHandle(3), false);
        f.desktop.add_window(WindowHandle(4), WindowFields::new("w4"));
        let handles = [WindowHandle(2), WindowHandle(3), WindowHandle(4)];
        let emitted = f.normalizer.enumerate(&handles, Some(WindowHandle(2)));

        let events: Vec<(TrackerEventKind, WindowHandle)> = emitted.iter().map(|e| (e.kind, e.handle)).collect();
        assert_eq!(
            events,
            vec![
                (TrackerEventKind::Removed, WindowHandle(1)),
                (TrackerEventKind::Removed, WindowHandle(3)),
                (TrackerEventKind::Added, WindowHandle(4)),
                (TrackerEventKind::Updated, WindowHandle(2)),
            ]
        );
        let registry = f.registry.read();
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(WindowHandle(1)));
        assert_eq!(registry.active(), Some(WindowHandle(2)));
        assert!(f.scheduler.cancelled.lock().contains(&WindowHandle(1)));
    }

    #[test]
    fn test_enumerate_clears_active_when_foreground_is_not_tracked() {
        let f = fixture(TrackerSettings::default());
        f.desktop.add_window(WindowHandle(1), WindowFields::new("w1"));
        f.normalizer.enumerate(&[WindowHandle(1)], Some(WindowHandle(1)));

        let emitted = f.normalizer.enumerate(&[WindowHandle(1)], None);

        assert_eq!(kinds(&emitted), vec![TrackerEventKind::Updated]);
        assert!(!emitted[0].window.is_active);
        assert_eq!(f.registry.read().active(), None);
    }
}
