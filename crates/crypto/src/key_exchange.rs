//! X25519 Diffie-Hellman Key Exchange fuer SRTP
//!
//! Pro Session wird ein frisches ephemeres X25519-Schluesselpaar erzeugt.
//! Der Server schickt seinen Public Key via `key_exchange_init` ueber den
//! Control-Kanal, der Client antwortet mit `key_exchange_response`.
//! Aus dem DH-Geheimnis leitet HKDF-SHA256 (leeres Salt, feste
//! Info-Strings) den AEAD-Master-Key und das SRTP-Salt ab – bitgenau wie
//! auf Server-Seite.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::error::{CryptoError, CryptoResult};

/// HKDF-Info fuer den AEAD-Master-Key (16 Bytes)
const INFO_MASTER_KEY: &[u8] = b"SRTP master key";
/// HKDF-Info fuer das SRTP-Salt (14 Bytes)
const INFO_MASTER_SALT: &[u8] = b"SRTP master salt";

// ---------------------------------------------------------------------------
// SRTP-Schluesselmaterial
// ---------------------------------------------------------------------------

/// Abgeleitetes SRTP-Schluesselmaterial
///
/// Wird beim Drop genullt und gibt via `Debug` nichts preis.
pub struct SrtpSchluesselMaterial {
    master_key: [u8; 16],
    salt: [u8; 14],
}

impl SrtpSchluesselMaterial {
    /// Gibt den 16-Byte AEAD-Master-Key zurueck
    pub fn master_key(&self) -> &[u8; 16] {
        &self.master_key
    }

    /// Gibt das 14-Byte SRTP-Salt zurueck
    pub fn salt(&self) -> &[u8; 14] {
        &self.salt
    }
}

impl Drop for SrtpSchluesselMaterial {
    fn drop(&mut self) {
        self.master_key.iter_mut().for_each(|b| *b = 0);
        self.salt.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SrtpSchluesselMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SrtpSchluesselMaterial([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// KeyExchange
// ---------------------------------------------------------------------------

/// Client-seitige Key-Exchange-Instanz
///
/// Der private Skalar bleibt im Objekt eingeschlossen, wird beim
/// DH-Austausch konsumiert und niemals serialisiert.
pub struct KeyExchange {
    ephemeral_secret: Option<EphemeralSecret>,
    oeffentlich: [u8; 32],
}

impl KeyExchange {
    /// Erstellt eine neue Instanz mit frischem ephemeren Schluesselpaar
    pub fn neu() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let oeffentlich = X25519PublicKey::from(&secret);
        tracing::debug!("Ephemeres X25519-Schluesselpaar erzeugt");
        Self {
            ephemeral_secret: Some(secret),
            oeffentlich: oeffentlich.to_bytes(),
        }
    }

    /// Gibt den eigenen Public Key zurueck (fuer `key_exchange_response`)
    pub fn oeffentlicher_schluessel(&self) -> [u8; 32] {
        self.oeffentlich
    }

    /// Fuehrt den DH-Austausch durch und leitet das SRTP-Material ab
    ///
    /// Konsumiert den privaten Skalar – ein zweiter Aufruf schlaegt fehl.
    ///
    /// # Fehler
    /// - `KeyExchange` bei bereits verbrauchtem Secret oder ungueltigem
    ///   Peer-Key (Null-Geheimnis durch Small-Order-Punkt)
    /// - `KeyDerivation` bei HKDF-Fehlern
    pub fn schluessel_ableiten(
        &mut self,
        peer_public_key: &[u8; 32],
    ) -> CryptoResult<SrtpSchluesselMaterial> {
        let secret = self
            .ephemeral_secret
            .take()
            .ok_or_else(|| CryptoError::KeyExchange("Secret bereits verwendet".to_string()))?;

        let peer = X25519PublicKey::from(*peer_public_key);
        let dh = secret.diffie_hellman(&peer);

        if dh.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::KeyExchange(
                "Ungueltiger Peer-Schluessel (Null-Geheimnis)".to_string(),
            ));
        }

        // Leeres Salt: HKDF nutzt dann Nullen in Hash-Laenge (RFC 5869),
        // identisch zur Server-Implementierung.
        let hk = Hkdf::<Sha256>::new(None, dh.as_bytes());

        let mut master_key = [0u8; 16];
        hk.expand(INFO_MASTER_KEY, &mut master_key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let mut salt = [0u8; 14];
        hk.expand(INFO_MASTER_SALT, &mut salt)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        tracing::debug!("SRTP-Schluesselmaterial abgeleitet");

        Ok(SrtpSchluesselMaterial { master_key, salt })
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
