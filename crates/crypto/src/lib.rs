//! sprechfunk-crypto – Kryptografie des Sprechfunk-Clients
//!
//! ## Module
//! - [`key_exchange`] – Ephemerer X25519-Handshake + HKDF-Ableitung des
//!   SRTP-Schluesselmaterials
//! - [`srtp`] – AES-128-GCM Session mit Sequenz-Nonce und Replay-Fenster
//! - [`error`] – Fehlertypen des Subsystems
//!
//! Schluesselmaterial wird niemals geloggt, serialisiert oder via `Debug`
//! ausgegeben; die Container nullen ihren Inhalt beim Drop.

pub mod error;
pub mod key_exchange;
pub mod srtp;

pub use error::{CryptoError, CryptoResult};
pub use key_exchange::{KeyExchange, SrtpSchluesselMaterial};
pub use srtp::SrtpSession;
