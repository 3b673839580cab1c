//! Fehlertypen fuer die Voice-Pipeline

use thiserror::Error;

use sprechfunk_audio::error::AudioError;
use sprechfunk_crypto::error::CryptoError;

/// Fehler der Voice-Pipeline
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Senden fehlgeschlagen: {0}")]
    Senden(String),

    #[error("Ungueltiger Zustand: {0}")]
    UngueltigerZustand(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Audio: {0}")]
    Audio(#[from] AudioError),

    #[error("Krypto: {0}")]
    Krypto(#[from] CryptoError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type VoiceResult<T> = Result<T, VoiceError>;
