//! Recording session management
//!
//! This module provides the `RecordingSession` state machine that manages:
//! - Capture of successive takes into on-disk artifacts
//! - Merging each new take onto the accumulated recording
//! - Preview playback of the recording so far
//! - Elapsed-time counters for recording and playback
//! - Cancellation (discarding every artifact) and saving (handing over the result)

mod config;
mod elapsed;
mod session;
mod state;
mod stats;

pub use config::RecorderConfig;
pub use session::{Devices, RecordingSession, SessionError, SessionHandle};
pub use state::{transition, Effect, Event, InvalidTransition, SessionState, Transition};
pub use stats::{ElapsedKind, SessionStats, SessionUpdate};
