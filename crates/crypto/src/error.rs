//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key-Exchange fehlgeschlagen: {0}")]
    KeyExchange(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("SRTP-Paket zu kurz: {laenge} Bytes (Minimum {minimum})")]
    PaketZuKurz { laenge: usize, minimum: usize },

    #[error("Replay erkannt: Sequenz {sequenz}")]
    Replay { sequenz: u64 },

    #[error("AEAD-Tag-Verifikation fehlgeschlagen")]
    AuthFehlgeschlagen,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

impl CryptoError {
    /// Prueft ob der Fehler ein abgelehntes Empfangspaket bezeichnet
    ///
    /// Solche Fehler verwerfen genau ein Paket und sind kein Grund die
    /// Session zu beenden.
    pub fn ist_paket_abgelehnt(&self) -> bool {
        matches!(
            self,
            Self::PaketZuKurz { .. } | Self::Replay { .. } | Self::AuthFehlgeschlagen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paket_abgelehnt_erkennung() {
        assert!(CryptoError::Replay { sequenz: 1 }.ist_paket_abgelehnt());
        assert!(CryptoError::AuthFehlgeschlagen.ist_paket_abgelehnt());
        assert!(!CryptoError::KeyExchange("test".into()).ist_paket_abgelehnt());
    }

    #[test]
    fn fehler_anzeige() {
        let e = CryptoError::PaketZuKurz {
            laenge: 5,
            minimum: 20,
        };
        assert!(e.to_string().contains("5 Bytes"));
        assert!(e.to_string().contains("Minimum 20"));
    }
}
