//! Gemeinsame Identifikations- und Audio-Typen fuer Sprechfunk
//!
//! Die IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Auf dem
//! UDP-Draht sind beide IDs rohe u32-Werte (Big-Endian).

use serde::{Deserialize, Serialize};

/// Eindeutige Benutzer-ID (Draht-Format: u32, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u32);

impl UserId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Eindeutige Kanal-ID (Draht-Format: u32, big-endian)
///
/// Der Wert 0 ist reserviert und bedeutet "kein Kanal" (z.B. Hot-Mic aus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Reservierter Wert fuer "kein Kanal"
    pub const KEINER: ChannelId = ChannelId(0);

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }

    /// Prueft ob dies der reservierte "kein Kanal"-Wert ist
    pub fn ist_keiner(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kanal:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Audio-Konfiguration
// ---------------------------------------------------------------------------

/// Unveraenderliche Audio-Konfiguration einer Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (1 = Mono, 2 = Stereo)
    pub channels: u16,
    /// Samples pro Frame (960 = 20ms bei 48kHz)
    pub frame_size: u32,
    /// Ziel-Fuellstand des Jitter-Buffers in Frames vor der ersten Ausgabe
    pub jitter_ziel_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_size: 960,
            jitter_ziel_frames: 5,
        }
    }
}

impl AudioConfig {
    /// Frame-Dauer in Millisekunden (abgeleitet)
    pub fn frame_dauer_ms(&self) -> u32 {
        self.frame_size * 1000 / self.sample_rate
    }

    /// Frame-Dauer in Mikrosekunden (fuer Jitter-Messung)
    pub fn frame_dauer_us(&self) -> u64 {
        u64::from(self.frame_size) * 1_000_000 / u64::from(self.sample_rate)
    }

    /// Validiert die Konfiguration
    ///
    /// Die Frame-Dauer muss ganzzahlig in Millisekunden sein, sonst
    /// driften Zeitstempel und Jitter-Messung auseinander.
    pub fn validieren(&self) -> std::result::Result<(), String> {
        if self.sample_rate == 0 {
            return Err("Abtastrate darf nicht 0 sein".to_string());
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(format!(
                "Kanalanzahl muss 1 oder 2 sein (war: {})",
                self.channels
            ));
        }
        if self.frame_size == 0 {
            return Err("Frame-Groesse darf nicht 0 sein".to_string());
        }
        if self.frame_size * 1000 % self.sample_rate != 0 {
            return Err(format!(
                "Frame-Dauer nicht ganzzahlig: {} Samples bei {} Hz",
                self.frame_size, self.sample_rate
            ));
        }
        if self.jitter_ziel_frames == 0 {
            return Err("Jitter-Ziel muss mindestens 1 Frame sein".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audio-Frame
// ---------------------------------------------------------------------------

/// Dekodierter Audio-Frame (PCM) nach dem Empfangspfad
///
/// Ein leerer `samples`-Vektor markiert einen Verlust-Platzhalter:
/// der Jitter-Buffer hat eine Luecke erkannt und der Mixer muss fuer
/// diesen Frame Stille (oder Codec-Verdeckung) ausgeben.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    /// Sequenznummer des Absenders
    pub sequence: u64,
    /// Sende-Zeitstempel in Mikrosekunden (Absender-Epoche)
    pub timestamp_us: u64,
    /// PCM-Samples, normalisiert auf [-1.0, 1.0]; leer = Verlust-Marker
    pub samples: Vec<f32>,
    /// Nominale Frame-Groesse in Samples
    pub frame_size: u32,
}

impl AudioFrame {
    /// Prueft ob dieser Frame ein Verlust-Platzhalter ist
    pub fn ist_verdeckung(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_keiner() {
        assert!(ChannelId::KEINER.ist_keiner());
        assert!(!ChannelId(7).ist_keiner());
    }

    #[test]
    fn id_anzeige() {
        assert_eq!(UserId(42).to_string(), "user:42");
        assert_eq!(ChannelId(3).to_string(), "kanal:3");
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let uid = UserId(99);
        let json = serde_json::to_string(&uid).unwrap();
        let uid2: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(uid, uid2);
    }

    #[test]
    fn audio_config_standard_gueltig() {
        let config = AudioConfig::default();
        assert!(config.validieren().is_ok());
        assert_eq!(config.frame_dauer_ms(), 20);
        assert_eq!(config.frame_dauer_us(), 20_000);
    }

    #[test]
    fn audio_config_ungerade_frame_dauer() {
        let config = AudioConfig {
            sample_rate: 48000,
            frame_size: 1000, // 20.833ms – nicht ganzzahlig
            ..Default::default()
        };
        assert!(config.validieren().is_err());
    }

    #[test]
    fn audio_config_ungueltige_kanalzahl() {
        let config = AudioConfig {
            channels: 3,
            ..Default::default()
        };
        assert!(config.validieren().is_err());
    }

    #[test]
    fn audio_config_10ms_frames() {
        let config = AudioConfig {
            frame_size: 480,
            ..Default::default()
        };
        assert!(config.validieren().is_ok());
        assert_eq!(config.frame_dauer_ms(), 10);
    }

    #[test]
    fn verdeckungs_marker() {
        let marker = AudioFrame {
            sequence: 5,
            timestamp_us: 0,
            samples: Vec::new(),
            frame_size: 960,
        };
        assert!(marker.ist_verdeckung());

        let voll = AudioFrame {
            samples: vec![0.0; 960],
            ..marker
        };
        assert!(!voll.ist_verdeckung());
    }
}
