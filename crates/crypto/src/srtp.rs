//! SRTP-Session – AEAD-Verschluesselung der Voice-Nutzdaten
//!
//! AES-128-GCM mit 12-Byte-Nonce und 16-Byte-Tag, keine AAD (die Sequenz
//! steckt im Paketrahmen). Das Format auf dem Draht:
//!
//! ```text
//! [ seq_be_u32(4) | ciphertext(N) | auth_tag(16) ]
//! ```
//!
//! ## Nonce-Ableitung (muss bitgenau zum Server passen)
//! ```text
//! nonce[0..12] = salt[0..12]
//! nonce[8..12] ^= big_endian(sequence mod 2^32)
//! ```
//! Die Nonce nutzt nur die unteren 32 Bit der Sequenz (Draht-
//! Kompatibilitaet); das Replay-Fenster arbeitet auf der vollen Sequenz
//! wie sie aus dem 4-Byte-Feld rekonstruiert wird.
//!
//! ## Replay-Schutz
//! Gleitendes 64-Bit-Fenster (`max_seq` + Bitmap). Die Pruefung laeuft
//! VOR der Entschluesselung, der Fenster-Commit erst NACH erfolgreicher
//! Tag-Verifikation – ein Angreifer kann das Fenster nicht mit
//! gefaelschten Paketen verschieben.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Key, Nonce,
};

use crate::error::{CryptoError, CryptoResult};
use crate::key_exchange::SrtpSchluesselMaterial;

/// Breite des Replay-Fensters in Sequenznummern
const REPLAY_FENSTER_BREITE: u64 = 64;

/// Laenge des AEAD-Auth-Tags
const TAG_LAENGE: usize = 16;

/// Minimale Laenge eines SRTP-Pakets: Sequenz (4) + Tag (16)
const MIN_PAKET_LAENGE: usize = 4 + TAG_LAENGE;

// ---------------------------------------------------------------------------
// Replay-Fenster
// ---------------------------------------------------------------------------

/// Gleitendes Bitmap-Fenster ueber die letzten 64 Sequenznummern
#[derive(Debug, Default)]
struct ReplayFenster {
    /// Hoechste akzeptierte Sequenznummer
    max_seq: u64,
    /// Bit i gesetzt = Sequenz `max_seq - i` bereits gesehen
    bitmap: u64,
}

impl ReplayFenster {
    /// Prueft ob die Sequenz akzeptierbar waere (ohne Zustandsaenderung)
    fn pruefen(&self, seq: u64) -> bool {
        if seq > self.max_seq {
            return true;
        }
        let diff = self.max_seq - seq;
        if diff >= REPLAY_FENSTER_BREITE {
            return false; // Zu alt
        }
        self.bitmap & (1u64 << diff) == 0 // Gesetzt = Duplikat
    }

    /// Markiert die Sequenz als gesehen (nur nach Tag-Verifikation rufen)
    fn markieren(&mut self, seq: u64) {
        if seq > self.max_seq {
            let diff = seq - self.max_seq;
            if diff >= REPLAY_FENSTER_BREITE {
                self.bitmap = 1;
            } else {
                self.bitmap = (self.bitmap << diff) | 1;
            }
            self.max_seq = seq;
        } else {
            self.bitmap |= 1u64 << (self.max_seq - seq);
        }
    }
}

// ---------------------------------------------------------------------------
// SrtpSession
// ---------------------------------------------------------------------------

/// SRTP-Session fuer eine Voice-Verbindung
///
/// Lebt vom Key-Exchange bis zum Session-Shutdown. Das Schluesselmaterial
/// verlaesst die Session nie; `Debug` gibt nichts preis.
pub struct SrtpSession {
    cipher: Aes128Gcm,
    salt: [u8; 14],
    replay: ReplayFenster,
}

impl std::fmt::Debug for SrtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpSession")
            .field("max_seq", &self.replay.max_seq)
            .finish_non_exhaustive()
    }
}

impl SrtpSession {
    /// Erstellt eine Session aus rohem Schluesselmaterial
    pub fn neu(master_key: &[u8; 16], salt: [u8; 14]) -> Self {
        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(master_key));
        tracing::debug!("SRTP-Session erstellt");
        Self {
            cipher,
            salt,
            replay: ReplayFenster::default(),
        }
    }

    /// Erstellt eine Session aus dem Ergebnis des Key-Exchange
    pub fn aus_material(material: &SrtpSchluesselMaterial) -> Self {
        Self::neu(material.master_key(), *material.salt())
    }

    /// Verschluesselt einen Klartext unter der gegebenen Sequenznummer
    ///
    /// Gibt das fertige Paket `[seq_be(4) | ciphertext | tag(16)]` zurueck.
    pub fn verschluesseln(&self, klartext: &[u8], sequenz: u64) -> CryptoResult<Vec<u8>> {
        let seq32 = sequenz as u32;
        let nonce_bytes = self.nonce_ableiten(seq32);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm haengt den 16-Byte-Tag an den Ciphertext an
        let ciphertext = self
            .cipher
            .encrypt(nonce, klartext)
            .map_err(|_| CryptoError::Verschluesselung("AEAD-Encrypt".to_string()))?;

        let mut paket = Vec::with_capacity(4 + ciphertext.len());
        paket.extend_from_slice(&seq32.to_be_bytes());
        paket.extend_from_slice(&ciphertext);
        Ok(paket)
    }

    /// Entschluesselt ein SRTP-Paket und verifiziert den Auth-Tag
    ///
    /// # Fehler
    /// - [`CryptoError::PaketZuKurz`] bei weniger als 20 Bytes
    /// - [`CryptoError::Replay`] bei Duplikat oder zu alter Sequenz
    /// - [`CryptoError::AuthFehlgeschlagen`] bei ungueltigem Tag
    pub fn entschluesseln(&mut self, paket: &[u8]) -> CryptoResult<Vec<u8>> {
        if paket.len() < MIN_PAKET_LAENGE {
            return Err(CryptoError::PaketZuKurz {
                laenge: paket.len(),
                minimum: MIN_PAKET_LAENGE,
            });
        }

        let seq32 = u32::from_be_bytes([paket[0], paket[1], paket[2], paket[3]]);
        let sequenz = u64::from(seq32);

        if !self.replay.pruefen(sequenz) {
            tracing::trace!(sequenz, "SRTP-Replay verworfen");
            return Err(CryptoError::Replay { sequenz });
        }

        let nonce_bytes = self.nonce_ableiten(seq32);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let klartext = self
            .cipher
            .decrypt(nonce, &paket[4..])
            .map_err(|_| CryptoError::AuthFehlgeschlagen)?;

        // Fenster-Commit erst nach erfolgreicher Tag-Verifikation
        self.replay.markieren(sequenz);

        Ok(klartext)
    }

    /// Leitet die 12-Byte-Nonce aus Salt und Sequenznummer ab
    fn nonce_ableiten(&self, sequenz: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.salt[0..12]);

        let seq_be = sequenz.to_be_bytes();
        nonce[8] ^= seq_be[0];
        nonce[9] ^= seq_be[1];
        nonce[10] ^= seq_be[2];
        nonce[11] ^= seq_be[3];

        nonce
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
