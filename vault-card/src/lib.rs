//! The card-protocol layer: one-card sessions, high-level per-card
//! operations with bounded tap retries, and the multi-card flows composed
//! from them.

/// The card wire protocol: requests, responses, status words.
pub mod apdu;
/// Multi-card flows: create, reconstruct, verify, pair.
pub mod flows;
/// Per-card operations with the retry-and-prompt skeleton.
pub mod ops;
/// Transport contract and the paired, encrypted session.
pub mod session;

/// The in-memory card deck (mock applet) for tests and the simulator.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
