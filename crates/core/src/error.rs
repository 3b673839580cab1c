//! Fehlertypen fuer Sprechfunk
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`
//! oder mappen auf die passende Variante.

use thiserror::Error;

/// Globaler Result-Alias fuer Sprechfunk
pub type Result<T> = std::result::Result<T, SprechfunkError>;

/// Alle moeglichen Fehler im Sprechfunk-Client
#[derive(Debug, Error)]
pub enum SprechfunkError {
    // --- Audio ---
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Audio-Initialisierung fehlgeschlagen: {0}")]
    AudioInit(String),

    #[error("Audio-Stream-Fehler: {0}")]
    AudioStream(String),

    #[error("Encoding fehlgeschlagen: {0}")]
    Encode(String),

    #[error("Decoding fehlgeschlagen: {0}")]
    Decode(String),

    // --- Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Senden fehlgeschlagen: {0}")]
    Senden(String),

    #[error("Empfang fehlgeschlagen: {0}")]
    Empfang(String),

    #[error("Ungueltiges Paket: {0}")]
    UngueltigesPaket(String),

    // --- Puffer ---
    #[error("Puffer voll")]
    PufferVoll,

    #[error("Puffer leer")]
    PufferLeer,

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Kryptografie ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    #[error("Key-Exchange fehlgeschlagen: {0}")]
    KeyExchange(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("AEAD-Tag-Verifikation fehlgeschlagen")]
    AuthTag,

    #[error("Replay erkannt: Sequenz {0}")]
    Replay(u64),

    // --- Zustand ---
    #[error("Ungueltiger Zustand: {0}")]
    UngueltigerZustand(String),

    #[error("Unbekannter Fehler: {0}")]
    Unbekannt(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SprechfunkError {
    /// Erstellt einen unbekannten Fehler aus einer beliebigen Nachricht
    pub fn unbekannt(msg: impl Into<String>) -> Self {
        Self::Unbekannt(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Senden(_) | Self::Empfang(_)
        )
    }

    /// Gibt true zurueck wenn der Fehler einen einzelnen Frame betrifft
    ///
    /// Solche Fehler werden im Echtzeit-Pfad gezaehlt statt propagiert.
    pub fn ist_frame_fehler(&self) -> bool {
        matches!(
            self,
            Self::Encode(_)
                | Self::Decode(_)
                | Self::Verschluesselung(_)
                | Self::AuthTag
                | Self::Replay(_)
        )
    }
}
