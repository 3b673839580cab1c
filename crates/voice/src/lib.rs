//! sprechfunk-voice – Echtzeit-Pipeline des Sprechfunk-Clients
//!
//! Verdrahtet die Pfade
//! `Mikrofon → Encoder → SRTP → UDP` und
//! `UDP → SRTP → Decoder → Jitter-Buffer → Mixer → Lautsprecher`
//! ueber mehrere Echtzeit-Threads mit begrenzter Latenz.
//!
//! ## Module
//! - [`jitter_buffer`] – Neuordnung pro Kanal mit Verlust-Markern
//! - [`transport`] – UDP-Socket mit dediziertem Empfangs-Thread
//! - [`session`] – VoiceSession: Orchestrierung, Sende-Arbitrierung,
//!   Multi-Kanal-Zustand
//! - [`volume`] – Master- und per-Kanal-Lautstaerke fuers Mixing
//! - [`control`] – Anbindung der Control-Kanal-Nachrichten (Key-Exchange)
//! - [`error`] – Fehlertypen des Subsystems

pub mod control;
pub mod error;
pub mod jitter_buffer;
pub mod session;
pub mod transport;
pub mod volume;

pub use error::{VoiceError, VoiceResult};
pub use jitter_buffer::{JitterBuffer, JitterStatistik};
pub use session::{SessionConfig, SessionStatistik, SessionZustand, VoiceSession};
pub use transport::UdpVoiceTransport;
pub use volume::VolumeController;
