//! Codec-Konfiguration fuer die Audio-Uebertragung
//!
//! Definiert Opus-Konfigurationstypen und vordefinierte Audio-Presets.
//! Der eigentliche Encoder/Decoder lebt in sprechfunk-audio; hier liegen
//! nur die serialisierbaren Konfigurationsdaten.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Abtastrate fuer Opus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    /// 8 kHz – Schmalband (Telefon-Qualitaet)
    Hz8000 = 8000,
    /// 12 kHz – Mittelband
    Hz12000 = 12000,
    /// 16 kHz – Breitband (gute Sprach-Qualitaet)
    Hz16000 = 16000,
    /// 24 kHz – Superbreitband
    Hz24000 = 24000,
    /// 48 kHz – Vollband (Standard)
    #[default]
    Hz48000 = 48000,
}

/// Anzahl der Audio-Kanaele
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCount {
    /// Mono (1 Kanal) – fuer Sprache empfohlen
    #[default]
    Mono = 1,
    /// Stereo (2 Kanaele)
    Stereo = 2,
}

/// Opus-Anwendungsmodus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Optimiert fuer Sprachverstaendlichkeit (VOIP)
    #[default]
    Voip,
    /// Optimiert fuer allgemeine Audio-Qualitaet
    Audio,
    /// Minimale Verarbeitungsverzoegerung
    RestrictedLowdelay,
}

/// Frame-Groesse in Millisekunden
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSizeMs {
    /// 10 ms – guter Kompromiss fuer Sprache
    Ms10 = 10,
    /// 20 ms – Standard (bester Qualitaets-/Latenz-Kompromiss)
    #[default]
    Ms20 = 20,
    /// 40 ms – hohe Kompression, mehr Latenz
    Ms40 = 40,
}

impl FrameSizeMs {
    /// Berechnet die Anzahl der Samples pro Frame bei gegebener Abtastrate
    pub fn samples_per_frame(&self, sample_rate: SampleRate) -> u32 {
        (*self as u32) * (sample_rate as u32) / 1000
    }
}

/// Vollstaendige Opus-Codec-Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpusConfig {
    /// Ziel-Bitrate in kbps (6–510)
    pub bitrate_kbps: u16,
    /// Abtastrate
    pub sample_rate: SampleRate,
    /// Anzahl der Kanaele
    pub channels: ChannelCount,
    /// Frame-Groesse
    pub frame_size: FrameSizeMs,
    /// Anwendungsmodus
    pub application: OpusApplication,
    /// Forward Error Correction aktivieren
    pub fec_enabled: bool,
    /// Discontinuous Transmission (Silence-Suppression) aktivieren
    pub dtx_enabled: bool,
    /// Komplexitaet (0–10, hoeher = bessere Qualitaet, mehr CPU)
    pub complexity: u8,
    /// Variable Bitrate aktivieren
    pub vbr_enabled: bool,
    /// Erwarteter Paketverlust in Prozent (0–100, steuert die FEC-Staerke)
    pub expected_packet_loss: u8,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 32,
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Mono,
            frame_size: FrameSizeMs::Ms20,
            application: OpusApplication::Voip,
            fec_enabled: true,
            dtx_enabled: false,
            complexity: 10,
            vbr_enabled: true,
            expected_packet_loss: 5,
        }
    }
}

impl OpusConfig {
    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.bitrate_kbps < 6 || self.bitrate_kbps > 510 {
            return Err(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {})",
                self.bitrate_kbps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        if self.expected_packet_loss > 100 {
            return Err(format!(
                "Erwarteter Paketverlust muss <= 100% sein (war: {})",
                self.expected_packet_loss
            ));
        }
        Ok(())
    }

    /// Samples pro Frame fuer diese Konfiguration
    pub fn samples_pro_frame(&self) -> u32 {
        self.frame_size.samples_per_frame(self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Audio-Presets
// ---------------------------------------------------------------------------

/// Vordefinierte Audio-Konfigurationen fuer haeufige Anwendungsfaelle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPreset {
    /// Optimiert fuer Sprache (Standard-Bitrate, FEC aktiv)
    Speech,
    /// Ausgewogener Kompromiss zwischen Qualitaet und Bandbreite
    Balanced,
    /// Minimale Bandbreite (niedrige Bitrate, DTX aktiv)
    LowBandwidth,
}

impl AudioPreset {
    /// Gibt die Opus-Konfiguration fuer dieses Preset zurueck
    pub fn config(&self) -> OpusConfig {
        match self {
            Self::Speech => OpusConfig::default(),
            Self::Balanced => OpusConfig {
                bitrate_kbps: 64,
                complexity: 8,
                ..OpusConfig::default()
            },
            Self::LowBandwidth => OpusConfig {
                bitrate_kbps: 16,
                sample_rate: SampleRate::Hz16000,
                dtx_enabled: true,
                complexity: 5,
                expected_packet_loss: 10,
                ..OpusConfig::default()
            },
        }
    }
}
