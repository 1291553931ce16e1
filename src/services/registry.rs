use crate::events::{TrackedWindowView, WindowFields, WindowHandle};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Запись об окне, находящемся на панели задач
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedWindow {
    handle: WindowHandle,
    pub fields: WindowFields,
    pub is_active: bool,
    pub is_flashing: bool,
}

impl TrackedWindow {
    pub fn new(handle: WindowHandle, fields: WindowFields) -> Self {
        Self {
            handle,
            fields,
            is_active: false,
            is_flashing: false,
        }
    }

    pub fn flashing(mut self, is_flashing: bool) -> Self {
        self.is_flashing = is_flashing;
        self
    }

    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    pub fn view(&self) -> TrackedWindowView {
        TrackedWindowView {
            handle: self.handle,
            title: self.fields.title.clone(),
            class_name: self.fields.class_name.clone(),
            process_name: self.fields.process_name.clone(),
            monitor: self.fields.monitor,
            is_active: self.is_active,
            is_flashing: self.is_flashing,
        }
    }
}

/// Handles whose `is_active` flag flipped during one activation.
pub type ActivationChanges = SmallVec<[WindowHandle; 2]>;

/// Authoritative `handle -> TrackedWindow` map.
///
/// Mutated only by the normalizer on the owning loop; everyone else gets views.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: HashMap<WindowHandle, TrackedWindow>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.windows.contains_key(&handle)
    }

    pub fn get(&self, handle: WindowHandle) -> Option<&TrackedWindow> {
        self.windows.get(&handle)
    }

    pub fn get_mut(&mut self, handle: WindowHandle) -> Option<&mut TrackedWindow> {
        self.windows.get_mut(&handle)
    }

    /// Вставляет новую запись; существующая запись с тем же дескриптором не перезаписывается
    pub fn insert(&mut self, window: TrackedWindow) -> bool {
        use std::collections::hash_map::Entry;
        match self.windows.entry(window.handle()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(window);
                true
            }
        }
    }

    pub fn remove(&mut self, handle: WindowHandle) -> Option<TrackedWindow> {
        self.windows.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn active(&self) -> Option<WindowHandle> {
        self.windows
            .values()
            .find(|w| w.is_active)
            .map(|w| w.handle())
    }

    /// Makes `target` the only active window; `None` or an untracked target clears everything.
    ///
    /// The previous holder is cleared before the new one is set. Returns every
    /// handle whose flag actually changed, previous holders first.
    pub fn set_active(&mut self, target: Option<WindowHandle>) -> ActivationChanges {
        let mut changed = ActivationChanges::new();

        for window in self.windows.values_mut() {
            if window.is_active && Some(window.handle()) != target {
                window.is_active = false;
                changed.push(window.handle());
            }
        }

        if let Some(window) = target.and_then(|h| self.windows.get_mut(&h)) {
            if !window.is_active {
                window.is_active = true;
                changed.push(window.handle());
            }
        }

        changed
    }

    pub fn handles(&self) -> Vec<WindowHandle> {
        self.windows.keys().copied().collect()
    }

    pub fn snapshot(&self) -> HashMap<WindowHandle, TrackedWindowView> {
        self.windows
            .iter()
            .map(|(handle, window)| (*handle, window.view()))
            .collect()
    }
}
