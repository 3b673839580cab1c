//! Control-Kanal-Nachrichten (JSON)
//!
//! Der Control-Kanal (WebSocket/TCP, ausserhalb dieses Crates) liefert dem
//! Voice-Kern zwei Dinge: den Key-Exchange fuer SRTP und informative
//! Kanal-Roster. Die Nachrichten sind serde-JSON mit snake_case `type`-Tag,
//! passend zum Server-Protokoll.

use serde::{Deserialize, Serialize};

use sprechfunk_core::types::{ChannelId, UserId};

/// Nachrichten des Control-Kanals, die den Voice-Kern betreffen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlNachricht {
    /// Server → Client: Beginn des SRTP-Key-Exchange
    KeyExchangeInit {
        /// Ephemerer X25519-Public-Key des Servers
        public_key: [u8; 32],
    },
    /// Client → Server: Antwort mit eigenem Public Key
    KeyExchangeResponse {
        /// Ephemerer X25519-Public-Key des Clients
        public_key: [u8; 32],
    },
    /// Server → Client: Teilnehmerliste eines Kanals (informativ)
    ///
    /// Der Voice-Kern interpretiert Roster nicht; sie werden nur an die
    /// UI durchgereicht.
    RosterUpdate {
        channel_id: ChannelId,
        users: Vec<UserId>,
    },
}
