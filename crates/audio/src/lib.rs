//! sprechfunk-audio – Audio-Subsystem des Sprechfunk-Clients
//!
//! ## Module
//! - [`codec`] – Frame-Codec-Schnittstellen und Opus-Implementierung
//! - [`device`] – Geraete-Auflistung und -Auswahl via cpal
//! - [`capture`] – Mikrofon-Stream (cpal → Frame-Ring)
//! - [`playback`] – Lautsprecher-Stream (Frame-Ring → cpal)
//! - [`engine`] – AudioEngine: Streams, Arbeiter-Threads, Frame-Callbacks
//! - [`error`] – Fehlertypen des Subsystems

pub mod capture;
pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod playback;

pub use codec::{EncodedFrame, FrameDecoder, FrameEncoder, OpusDecoder, OpusEncoder};
pub use engine::AudioEngine;
pub use error::{AudioError, AudioResult};
