//! Frame-Codec – Schnittstellen und Opus-Implementierung
//!
//! Der Voice-Kern konsumiert den Codec ueber die Traits [`FrameEncoder`]
//! und [`FrameDecoder`]; die konkrete Implementierung (Opus via audiopus)
//! wird bei der Konstruktion gewaehlt.
//!
//! Codec-Instanzen sind NICHT thread-safe: ein Encoder pro Sende-Strom,
//! ein Decoder pro Empfangs-Strom. Die Session garantiert die
//! single-threaded Nutzung pro Instanz.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use sprechfunk_protocol::codec::{
    ChannelCount, OpusApplication, OpusConfig, SampleRate as ProtocolSampleRate,
};

/// Maximale Groesse eines Opus-Frames in Bytes
const MAX_OPUS_FRAME_BYTES: usize = 4000;

/// DTX-Marker: Frames bis zu dieser Laenge gelten als Stille-Marker
pub const DTX_MARKER_MAX_BYTES: usize = 3;

// ---------------------------------------------------------------------------
// Schnittstellen
// ---------------------------------------------------------------------------

/// Kodierter Frame mit Metadaten
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Komprimierte Frame-Bytes
    pub daten: Vec<u8>,
    /// Urspruengliche Frame-Groesse in Samples
    pub frame_groesse: u32,
    /// Discontinuous-Transmission-Marker (Stille, Frame <= 3 Bytes)
    pub ist_stille: bool,
}

/// Kodiert PCM-Frames zu komprimierten Frames
pub trait FrameEncoder: Send {
    /// Kodiert einen PCM-Frame (f32, normalisiert auf [-1.0, 1.0])
    ///
    /// Die Eingabe muss exakt `frame_groesse() * channels` Samples lang sein.
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<EncodedFrame>;

    /// Erwartete Frame-Groesse in Samples pro Kanal
    fn frame_groesse(&self) -> usize;
}

/// Dekodiert komprimierte Frames zu PCM
pub trait FrameDecoder: Send {
    /// Dekodiert Frame-Bytes in den Ziel-Puffer
    ///
    /// Gibt die Anzahl geschriebener Samples zurueck.
    fn decode(&mut self, daten: &[u8], ziel: &mut [f32]) -> AudioResult<usize>;

    /// Synthetisiert einen Verdeckungs-Frame fuer ein verlorenes Paket
    ///
    /// Muss nach jedem vorherigen erfolgreichen Decode desselben Stroms
    /// aufrufbar sein.
    fn decode_verdeckung(&mut self, ziel: &mut [f32]) -> AudioResult<usize>;

    /// Erwartete Frame-Groesse in Samples pro Kanal
    fn frame_groesse(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Opus-Encoder
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert f32-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    frame_groesse: usize,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn neu(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let sample_rate = protocol_rate_zu_audiopus(config.sample_rate);
        let channels = protocol_channels_zu_audiopus(config.channels);
        let application = protocol_app_zu_audiopus(config.application);

        let mut encoder = Encoder::new(sample_rate, channels, application)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(
                (config.bitrate_kbps as i32) * 1000,
            ))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_complexity(config.complexity)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_vbr(config.vbr_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_inband_fec(config.fec_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        if config.dtx_enabled {
            // OPUS_SET_DTX_REQUEST = 4016 (audiopus 0.2 hat kein set_dtx)
            let _ = encoder.set_encoder_ctl_request(4016, 1);
        }

        if config.expected_packet_loss > 0 {
            // OPUS_SET_PACKET_LOSS_PERC_REQUEST = 4014: steuert wie viel
            // FEC-Redundanz der Encoder einbettet
            let _ = encoder
                .set_encoder_ctl_request(4014, i32::from(config.expected_packet_loss));
        }

        let frame_groesse = config.samples_pro_frame() as usize;

        debug!(
            bitrate_kbps = config.bitrate_kbps,
            frame_groesse, "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            config,
            frame_groesse,
        })
    }

    /// Gibt die aktuelle Konfiguration zurueck
    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<EncodedFrame> {
        let erwartet = self.frame_groesse * self.config.channels as usize;
        if pcm.len() != erwartet {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                erwartet,
                pcm.len()
            )));
        }

        let mut ausgabe = vec![0u8; MAX_OPUS_FRAME_BYTES];
        let geschrieben = self
            .encoder
            .encode_float(pcm, &mut ausgabe)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        ausgabe.truncate(geschrieben);
        Ok(EncodedFrame {
            ist_stille: geschrieben <= DTX_MARKER_MAX_BYTES,
            daten: ausgabe,
            frame_groesse: self.frame_groesse as u32,
        })
    }

    fn frame_groesse(&self) -> usize {
        self.frame_groesse
    }
}

// ---------------------------------------------------------------------------
// Opus-Decoder
// ---------------------------------------------------------------------------

/// Opus-Decoder: dekodiert Opus-Bytes zu f32-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    channels: ChannelCount,
    frame_groesse: usize,
}

impl OpusDecoder {
    /// Erstellt einen neuen Decoder
    pub fn neu(sample_rate: ProtocolSampleRate, channels: ChannelCount) -> AudioResult<Self> {
        let sr = protocol_rate_zu_audiopus(sample_rate);
        let ch = protocol_channels_zu_audiopus(channels);

        let decoder = Decoder::new(sr, ch).map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let frame_groesse =
            sprechfunk_protocol::codec::FrameSizeMs::Ms20.samples_per_frame(sample_rate) as usize;

        debug!(?sample_rate, frame_groesse, "OpusDecoder erstellt");

        Ok(Self {
            decoder,
            channels,
            frame_groesse,
        })
    }

    /// Erstellt einen Decoder aus einer OpusConfig
    pub fn aus_config(config: &OpusConfig) -> AudioResult<Self> {
        let mut dec = Self::neu(config.sample_rate, config.channels)?;
        dec.frame_groesse = config.samples_pro_frame() as usize;
        Ok(dec)
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, daten: &[u8], ziel: &mut [f32]) -> AudioResult<usize> {
        let dekodiert = self
            .decoder
            .decode_float(Some(daten), ziel, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(dekodiert * self.channels as usize)
    }

    fn decode_verdeckung(&mut self, ziel: &mut [f32]) -> AudioResult<usize> {
        let dekodiert = self
            .decoder
            .decode_float(None::<&[u8]>, ziel, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(dekodiert * self.channels as usize)
    }

    fn frame_groesse(&self) -> usize {
        self.frame_groesse
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn protocol_rate_zu_audiopus(rate: ProtocolSampleRate) -> SampleRate {
    match rate {
        ProtocolSampleRate::Hz8000 => SampleRate::Hz8000,
        ProtocolSampleRate::Hz12000 => SampleRate::Hz12000,
        ProtocolSampleRate::Hz16000 => SampleRate::Hz16000,
        ProtocolSampleRate::Hz24000 => SampleRate::Hz24000,
        ProtocolSampleRate::Hz48000 => SampleRate::Hz48000,
    }
}

fn protocol_channels_zu_audiopus(ch: ChannelCount) -> Channels {
    match ch {
        ChannelCount::Mono => Channels::Mono,
        ChannelCount::Stereo => Channels::Stereo,
    }
}

fn protocol_app_zu_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::RestrictedLowdelay => Application::LowDelay,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
