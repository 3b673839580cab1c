//! Audio-Playback via cpal
//!
//! Oeffnet einen cpal OutputStream und entnimmt im Echtzeit-Callback ganze
//! Frames aus einem wait-free [`AudioFrameQueue`]. Der Produzent ist der
//! Playback-Arbeiter der Engine; ein Rest-Frame ueberbrueckt beliebige
//! cpal-Puffergroessen. Bei leerem Ring wird Stille ausgegeben.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, error};

use sprechfunk_core::spsc::AudioFrameQueue;
use sprechfunk_core::types::AudioConfig;

use crate::error::{AudioError, AudioResult};

/// Audio-Playback-Stream
pub struct PlaybackStream {
    _stream: Stream,
}

/// Oeffnet einen Playback-Stream auf dem gegebenen Geraet.
///
/// Der cpal-Callback konsumiert Frames aus dem uebergebenen Ring.
pub fn open_playback_stream(
    device: &Device,
    config: &AudioConfig,
    ring: Arc<AudioFrameQueue>,
) -> AudioResult<PlaybackStream> {
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_laenge = config.frame_size as usize * config.channels as usize;
    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let unterstuetzt = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && c.channels() >= config.channels
        });

    let sample_format = unterstuetzt
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    // Rest-Frame: cpal fordert beliebige Puffergroessen an, der Ring
    // liefert aber nur ganze Frames. rest_pos == frame_laenge heisst leer.
    let mut rest = vec![0.0f32; frame_laenge];
    let mut rest_pos = frame_laenge;
    let mut ausgabe_fuellen = move |data: &mut [f32]| {
        let mut i = 0;
        while i < data.len() {
            if rest_pos == frame_laenge {
                if ring.try_pop(&mut rest) {
                    rest_pos = 0;
                } else {
                    // Underrun: Stille fuer den Rest des Puffers
                    data[i..].fill(0.0);
                    return;
                }
            }
            let n = (data.len() - i).min(frame_laenge - rest_pos);
            data[i..i + n].copy_from_slice(&rest[rest_pos..rest_pos + n]);
            i += n;
            rest_pos += n;
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| ausgabe_fuellen(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    let mut float_puffer = vec![0.0f32; data.len()];
                    ausgabe_fuellen(&mut float_puffer);
                    for (ziel, s) in data.iter_mut().zip(float_puffer.iter()) {
                        *ziel = (*s * i16::MAX as f32)
                            .clamp(i16::MIN as f32, i16::MAX as f32)
                            as i16;
                    }
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
        "Playback-Stream geoeffnet: {}Hz {}ch frame={}",
        config.sample_rate, config.channels, config.frame_size
    );

    Ok(PlaybackStream { _stream: stream })
}
