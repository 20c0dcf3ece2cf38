mod base;

pub use base::{EventBus, EventKind, LifecycleEvent};
