//! sprechfunk-core – Gemeinsame Basistypen des Sprechfunk-Clients
//!
//! Enthaelt die Bausteine, die alle anderen Crates teilen:
//! - [`types`] – ID-Newtypes, Audio-Konfiguration, Audio-Frames
//! - [`error`] – Zentraler Fehler-Enum mit Result-Alias
//! - [`spsc`] – Wait-free Single-Producer/Single-Consumer Queues
//!   fuer den Austausch zwischen Echtzeit- und Arbeiter-Threads

pub mod error;
pub mod spsc;
pub mod types;

pub use error::{Result, SprechfunkError};
pub use types::{AudioConfig, AudioFrame, ChannelId, UserId};
