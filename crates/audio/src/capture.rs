//! Mikrofon-Capture via cpal
//!
//! Oeffnet einen cpal InputStream und setzt im Echtzeit-Callback Frames
//! fester Laenge zusammen, die in einen wait-free [`AudioFrameQueue`]
//! geschoben werden. Der Konsument (Capture-Arbeiter der Engine) entnimmt
//! ganze Frames.
//!
//! Der cpal-Callback allokiert im f32-Pfad nicht und blockiert nie; bei
//! vollem Ring wird der Frame verworfen.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, error, warn};

use sprechfunk_core::spsc::AudioFrameQueue;
use sprechfunk_core::types::AudioConfig;

use crate::error::{AudioError, AudioResult};

/// Audio-Capture-Stream
///
/// Haelt den cpal-Stream am Leben. Wird der CaptureStream gedroppt,
/// stoppt die Aufnahme automatisch.
pub struct CaptureStream {
    _stream: Stream,
}

/// Oeffnet einen Capture-Stream auf dem gegebenen Geraet.
///
/// Vollstaendige Frames zu `config.frame_size * config.channels` Samples
/// landen im uebergebenen Ring. Der Produzent ist der cpal-Callback-Thread.
pub fn open_capture_stream(
    device: &Device,
    config: &AudioConfig,
    ring: Arc<AudioFrameQueue>,
) -> AudioResult<CaptureStream> {
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_laenge = config.frame_size as usize * config.channels as usize;
    let err_fn = |err| error!("Capture-Fehler: {}", err);

    // Unterstuetzte Sample-Formate pruefen
    let unterstuetzt = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && c.channels() >= config.channels
        });

    let sample_format = unterstuetzt
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    // Frame-Zusammenbau im Callback: Samples sammeln, volle Frames pushen
    let mut stufe = vec![0.0f32; frame_laenge];
    let mut gefuellt = 0usize;
    let mut frame_verarbeiten = move |samples: &[f32]| {
        for &s in samples {
            stufe[gefuellt] = s;
            gefuellt += 1;
            if gefuellt == frame_laenge {
                if !ring.try_push(&stufe) {
                    warn!("Capture-Ring voll, Frame verworfen");
                }
                gefuellt = 0;
            }
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| frame_verarbeiten(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    frame_verarbeiten(&floats);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::U8 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u8], _| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect();
                    frame_verarbeiten(&floats);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        _ => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        "Capture-Stream geoeffnet: {}Hz {}ch frame={}",
        config.sample_rate, config.channels, config.frame_size
    );

    Ok(CaptureStream { _stream: stream })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::eingabe_geraet_suchen;

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn capture_stream_oeffnen() {
        let geraet = eingabe_geraet_suchen(None).expect("Standard-Eingabegeraet");
        let config = AudioConfig::default();
        let ring = Arc::new(AudioFrameQueue::neu(16, config.frame_size as usize));
        let result = open_capture_stream(&geraet, &config, ring);
        assert!(result.is_ok(), "Capture-Stream sollte oeffenbar sein");
    }
}
