//! WindowTracker: the public facade.
//!
//! `start` wires the bridge, the scheduler and the owning loop together; `stop`
//! tears them down in reverse. The registry outlives both and stays readable
//! through snapshots at any time.

use crate::config::TrackerSettings;
use crate::debug_if_enabled;
use crate::error::StartError;
use crate::events::{TrackedWindowView, TrackerEvent, WindowEvent, WindowHandle};
use crate::services::bridge::{BridgeGate, EventPoster, NativeEventBridge};
use crate::services::classifier::WindowClassifier;
use crate::services::normalizer::EventNormalizer;
use crate::services::platform::NativePlatform;
use crate::services::registry::WindowRegistry;
use crate::services::scheduler::{DebounceScheduler, Deadline, DeadlineSink, Scheduler};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives tracker events on the owning loop, in emission order.
pub trait WindowListener: Send + Sync {
    fn on_event(&self, event: &TrackerEvent);
}

/// Адаптер для подписки замыканием
pub struct FnListener<F>(pub F);

impl<F> WindowListener for FnListener<F>
where
    F: Fn(&TrackerEvent) + Send + Sync,
{
    fn on_event(&self, event: &TrackerEvent) {
        (self.0)(event)
    }
}

/// Пересылка событий в канал, например в другую задачу tokio
impl WindowListener for mpsc::UnboundedSender<TrackerEvent> {
    fn on_event(&self, event: &TrackerEvent) {
        let _ = self.send(event.clone());
    }
}

pub fn listener_fn<F>(f: F) -> Arc<dyn WindowListener>
where
    F: Fn(&TrackerEvent) + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn WindowListener>)>>,
}

impl Subscribers {
    fn add(&self, listener: Arc<dyn WindowListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners.write().push((id, listener));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Listeners are snapshotted first, so one may (un)subscribe from inside its callback.
    fn fan_out(&self, events: &[TrackerEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn WindowListener>> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();

        for event in events {
            debug_if_enabled!("Событие трекера: {}", event);
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }
}

/// Сообщения для цикла-владельца
#[derive(Debug)]
enum LoopMessage {
    Event(WindowEvent),
    Deadline(Deadline),
    Shutdown,
}

struct Running {
    bridge: NativeEventBridge,
    scheduler: Arc<DebounceScheduler>,
    sender: mpsc::UnboundedSender<LoopMessage>,
    loop_task: JoinHandle<()>,
}

pub struct WindowTracker {
    settings: TrackerSettings,
    platform: Arc<dyn NativePlatform>,
    classifier: Arc<dyn WindowClassifier>,
    registry: Arc<RwLock<WindowRegistry>>,
    subscribers: Arc<Subscribers>,
    running: Mutex<Option<Running>>,
}

impl WindowTracker {
    pub fn new(
        settings: TrackerSettings,
        platform: Arc<dyn NativePlatform>,
        classifier: Arc<dyn WindowClassifier>,
    ) -> Self {
        Self {
            settings,
            platform,
            classifier,
            registry: Arc::new(RwLock::new(WindowRegistry::new())),
            subscribers: Arc::new(Subscribers::default()),
            running: Mutex::new(None),
        }
    }

    /// Subscribes to the native channels, reconciles the registry with the
    /// windows that exist now and starts the owning loop.
    ///
    /// Idempotent while running. Must be called from within a tokio runtime.
    /// On error nothing stays registered. Enumeration events are delivered
    /// before any live event, outside the internal lock, so a listener may
    /// call back into the tracker.
    pub fn start(&self, owner: WindowHandle) -> Result<(), StartError> {
        let (emitted, release) = {
            let mut running = self.running.lock();
            if running.is_some() {
                debug!("Трекер уже запущен");
                return Ok(());
            }
            if owner.is_null() {
                return Err(StartError::InvalidOwner(owner));
            }
            let runtime = Handle::try_current().map_err(|_| StartError::NoRuntime)?;

            let (sender, receiver) = mpsc::unbounded_channel();
            let scheduler = Arc::new(DebounceScheduler::new(runtime.clone(), Self::deadline_sink(&sender)));

            let mut bridge = NativeEventBridge::new(Arc::clone(&self.platform), self.settings.strict_filtering);
            if let Err(e) = bridge.start(owner, Self::event_poster(&sender)) {
                error!("Не удалось запустить трекер: {}", e);
                return Err(e);
            }

            let normalizer = EventNormalizer::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.classifier),
                Arc::clone(&self.platform),
                scheduler.clone() as Arc<dyn Scheduler>,
                self.settings.clone(),
            );

            let existing = self.platform.enumerate_windows();
            let emitted = normalizer.enumerate(&existing, self.platform.foreground_window());

            // цикл ждёт, пока подписчики получат результат перечисления
            let (release, released) = oneshot::channel();
            let loop_task = runtime.spawn(run_owning_loop(
                normalizer,
                Arc::clone(&scheduler),
                bridge.gate(),
                Arc::clone(&self.subscribers),
                released,
                receiver,
            ));

            *running = Some(Running {
                bridge,
                scheduler,
                sender,
                loop_task,
            });
            (emitted, release)
        };

        info!("Трекер окон запущен на окне-владельце {}", owner);
        self.subscribers.fan_out(&emitted);
        let _ = release.send(());
        Ok(())
    }

    /// Unsubscribes from the OS and cancels pending timers. The registry is kept.
    pub fn stop(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };

        running.bridge.stop();
        running.scheduler.cancel_all();
        let _ = running.sender.send(LoopMessage::Shutdown);
        running.loop_task.abort();

        info!("Трекер окон остановлен, в реестре {} окон", self.registry.read().len());
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn subscribe(&self, listener: Arc<dyn WindowListener>) -> SubscriptionId {
        self.subscribers.add(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn snapshot_all(&self) -> HashMap<WindowHandle, TrackedWindowView> {
        self.registry.read().snapshot()
    }

    pub fn get(&self, handle: WindowHandle) -> Option<TrackedWindowView> {
        self.registry.read().get(handle).map(|w| w.view())
    }

    /// Current cloak state straight from the classifier, tracked or not.
    pub fn is_cloaked(&self, handle: WindowHandle) -> bool {
        self.classifier.is_cloaked(handle)
    }

    fn event_poster(sender: &mpsc::UnboundedSender<LoopMessage>) -> EventPoster {
        let sender = sender.clone();
        Arc::new(move |event: WindowEvent| {
            let _ = sender.send(LoopMessage::Event(event));
        })
    }

    fn deadline_sink(sender: &mpsc::UnboundedSender<LoopMessage>) -> DeadlineSink {
        let sender = sender.clone();
        Arc::new(move |deadline: Deadline| {
            let _ = sender.send(LoopMessage::Deadline(deadline));
        })
    }
}

impl Drop for WindowTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The owning loop: the only place the registry is mutated after start.
async fn run_owning_loop(
    normalizer: EventNormalizer,
    scheduler: Arc<DebounceScheduler>,
    gate: BridgeGate,
    subscribers: Arc<Subscribers>,
    released: oneshot::Receiver<()>,
    mut receiver: mpsc::UnboundedReceiver<LoopMessage>,
) {
    if released.await.is_err() {
        return;
    }
    debug!("Цикл событий трекера запущен");

    while let Some(message) = receiver.recv().await {
        let result = match message {
            LoopMessage::Event(event) => {
                if !gate.is_open() {
                    continue;
                }
                normalizer.apply(event)
            }
            LoopMessage::Deadline(deadline) => {
                if !gate.is_open() || !scheduler.claim(deadline) {
                    continue;
                }
                normalizer.on_deadline(deadline.key)
            }
            LoopMessage::Shutdown => break,
        };

        match result {
            Ok(emitted) => subscribers.fan_out(&emitted),
            Err(e) => warn!("Уведомление отброшено: {}", e),
        }
    }

    debug!("Цикл событий трекера завершён");
}
