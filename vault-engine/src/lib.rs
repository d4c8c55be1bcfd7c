//! The cooperative flow engine.
//!
//! Single-threaded by construction: everything runs on one task that
//! suspends only inside [`EventBus::get_events`]. Transports (UI, USB,
//! NFC, host abort) post typed events from wherever they live; the engine
//! dispatches exactly one event at a time to the step on top of the stack.

/// The flow engine: step stack + dispatch loop.
pub mod engine;
/// Event classes, the bus, and P0 semantics.
pub mod events;
/// The bounded cursor list backing the step stack.
pub mod list;

pub use engine::{Engine, EventConfig, HasEventBus, Step, StepOutcome};
pub use events::{
    Event, EventBus, EventClass, EventSenders, NfcEvent, P0Event, UiEvent,
    UsbEvent,
};
