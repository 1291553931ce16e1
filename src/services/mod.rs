pub mod bridge;
pub mod classifier;
pub mod normalizer;
pub mod platform;
pub mod registry;
pub mod scheduler;
pub mod tracker;

pub use bridge::NativeEventBridge;
pub use classifier::{Classification, HostWrapPolicy, TaskbarFilter, WindowClassifier, WindowProbe};
pub use normalizer::EventNormalizer;
pub use platform::{create_desktop, Desktop, DesktopSession, NativePlatform, SimulatedDesktop};
pub use registry::{TrackedWindow, WindowRegistry};
pub use scheduler::{DebounceScheduler, Scheduler, TimerKey, TimerPurpose};
pub use tracker::{listener_fn, SubscriptionId, WindowListener, WindowTracker};
