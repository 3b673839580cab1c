//! sprechfunk-protocol – Draht-Format des Sprechfunk-Clients
//!
//! ## Module
//! - [`voice`] – Binaeres UDP-Paketformat fuer die Audio-Uebertragung
//! - [`codec`] – Opus-Konfigurationstypen und Audio-Presets
//! - [`control`] – JSON-Nachrichten des Control-Kanals (Key-Exchange, Roster)

pub mod codec;
pub mod control;
pub mod voice;

pub use voice::{VoicePacket, VoicePacketHeader, VOICE_PACKET_MAGIC};
