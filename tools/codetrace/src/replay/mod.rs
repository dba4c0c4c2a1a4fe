//! Session capture and timeline replay.
//!
//! # Overview
//!
//! 1. **recorder** – classifies buffer changes, paste and run signals into
//!    timestamped events, each with a full buffer snapshot.
//! 2. **replayer** – resolves a 0–100 scrubber position to the buffer text
//!    current at that point of the recording.
//! 3. **playback** – the play/pause state machine that walks the scrubber on
//!    an injected clock.
//!
//! Because every event stores the whole buffer, any position is resolved by
//! selecting one event; nothing is re-applied.

pub mod playback;
pub mod recorder;
pub mod replayer;
