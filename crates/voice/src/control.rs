//! Anbindung des Control-Kanals an die Voice-Session
//!
//! Der Control-Kanal (WebSocket, ausserhalb dieses Crates) liefert
//! JSON-Nachrichten; hier werden die fuer den Voice-Kern relevanten
//! verarbeitet:
//! - `key_exchange_init` startet den SRTP-Handshake und erzeugt die
//!   `key_exchange_response`
//! - Roster-Updates werden informativ durchgereicht

use tracing::debug;

use sprechfunk_protocol::control::ControlNachricht;

use crate::error::VoiceResult;
use crate::session::VoiceSession;

/// Verarbeitet eine Control-Nachricht fuer die Session
///
/// Gibt die Antwort-Nachricht zurueck, falls eine faellig ist (aktuell
/// nur die `key_exchange_response`).
pub fn control_nachricht_verarbeiten(
    session: &VoiceSession,
    nachricht: ControlNachricht,
) -> VoiceResult<Option<ControlNachricht>> {
    match nachricht {
        ControlNachricht::KeyExchangeInit { public_key } => {
            let eigener = session.srtp_aus_peer_key(&public_key)?;
            debug!("Key-Exchange abgeschlossen, Antwort vorbereitet");
            Ok(Some(ControlNachricht::KeyExchangeResponse {
                public_key: eigener,
            }))
        }
        ControlNachricht::KeyExchangeResponse { .. } => {
            // Kommt nur Client -> Server vor; eingehend ignorieren
            debug!("Unerwartete key_exchange_response ignoriert");
            Ok(None)
        }
        ControlNachricht::RosterUpdate { channel_id, users } => {
            session.bei_roster_update(channel_id, &users);
            Ok(None)
        }
    }
}
