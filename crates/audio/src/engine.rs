//! AudioEngine – Geraete-Host des Voice-Kerns
//!
//! Besitzt Capture- und Playback-Stream und je einen dedizierten
//! Arbeiter-Thread pro Richtung:
//!
//! ```text
//! cpal-Input-Callback ──► AudioFrameQueue ──► Capture-Arbeiter ──► capture_cb(pcm, frames)
//! playback_cb(pcm, frames) ──► Playback-Arbeiter ──► AudioFrameQueue ──► cpal-Output-Callback
//! ```
//!
//! Die Frame-Callbacks werden mit exakt `frame_size * channels` Samples
//! aufgerufen – der Voice-Kern spawnt selbst keine Audio-Threads.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sprechfunk_core::spsc::AudioFrameQueue;
use sprechfunk_core::types::AudioConfig;

use crate::capture::{open_capture_stream, CaptureStream};
use crate::device::{ausgabe_geraet_suchen, eingabe_geraet_suchen};
use crate::error::{AudioError, AudioResult};
use crate::playback::{open_playback_stream, PlaybackStream};

/// Ring-Kapazitaet Richtung Capture (Frames); grosszuegig, Verwerfen ist teuer
const CAPTURE_RING_FRAMES: usize = 16;

/// Ring-Kapazitaet Richtung Playback (Frames); klein, begrenzt die Latenz
const PLAYBACK_RING_FRAMES: usize = 3;

/// Callback fuer aufgenommene Frames (laeuft auf dem Capture-Arbeiter)
pub type CaptureCallback = Box<dyn FnMut(&[f32], usize) + Send>;

/// Callback zum Fuellen von Wiedergabe-Frames (laeuft auf dem Playback-Arbeiter)
pub type PlaybackCallback = Box<dyn FnMut(&mut [f32], usize) + Send>;

// ---------------------------------------------------------------------------
// Laufende Streams
// ---------------------------------------------------------------------------

struct CaptureLauf {
    _stream: CaptureStream,
    stop: Arc<AtomicBool>,
    arbeiter: Option<JoinHandle<()>>,
}

struct PlaybackLauf {
    _stream: PlaybackStream,
    stop: Arc<AtomicBool>,
    arbeiter: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// AudioEngine
// ---------------------------------------------------------------------------

/// Audio-Engine: Capture/Playback-Streams plus Frame-Arbeiter
///
/// Die Engine ist kein async-Typ; Steuerung erfolgt synchron vom
/// Control-Thread, die Callbacks laufen auf den Arbeiter-Threads.
pub struct AudioEngine {
    config: AudioConfig,
    eingabe_geraet: Option<String>,
    ausgabe_geraet: Option<String>,
    capture_cb: Arc<Mutex<Option<CaptureCallback>>>,
    playback_cb: Arc<Mutex<Option<PlaybackCallback>>>,
    capture_lauf: Option<CaptureLauf>,
    playback_lauf: Option<PlaybackLauf>,
    /// RMS-Pegel als f32-Bits (atomar lesbar fuer VU-Meter)
    eingangs_pegel: Arc<AtomicU32>,
    ausgangs_pegel: Arc<AtomicU32>,
}

impl AudioEngine {
    /// Erstellt eine neue Engine (beruehrt noch keine Hardware)
    pub fn neu(config: AudioConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;
        info!(
            sample_rate = config.sample_rate,
            frame_size = config.frame_size,
            "AudioEngine initialisiert"
        );
        Ok(Self {
            config,
            eingabe_geraet: None,
            ausgabe_geraet: None,
            capture_cb: Arc::new(Mutex::new(None)),
            playback_cb: Arc::new(Mutex::new(None)),
            capture_lauf: None,
            playback_lauf: None,
            eingangs_pegel: Arc::new(AtomicU32::new(0)),
            ausgangs_pegel: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Registriert den Capture-Callback
    pub fn set_capture_callback(&self, cb: CaptureCallback) {
        *self.capture_cb.lock() = Some(cb);
    }

    /// Registriert den Playback-Callback
    pub fn set_playback_callback(&self, cb: PlaybackCallback) {
        *self.playback_cb.lock() = Some(cb);
    }

    /// Startet die Mikrofon-Aufnahme (idempotent)
    pub fn start_capture(&mut self) -> AudioResult<()> {
        if self.capture_lauf.is_some() {
            return Ok(());
        }

        let geraet = eingabe_geraet_suchen(self.eingabe_geraet.as_deref())?;
        let frame_laenge = self.config.frame_size as usize * self.config.channels as usize;
        let ring = Arc::new(AudioFrameQueue::neu(CAPTURE_RING_FRAMES, frame_laenge));
        let stream = open_capture_stream(&geraet, &self.config, Arc::clone(&ring))?;

        let stop = Arc::new(AtomicBool::new(false));
        let arbeiter = {
            let stop = Arc::clone(&stop);
            let cb = Arc::clone(&self.capture_cb);
            let pegel = Arc::clone(&self.eingangs_pegel);
            let frame_size = self.config.frame_size as usize;
            std::thread::Builder::new()
                .name("sprechfunk-capture".to_string())
                .spawn(move || {
                    let mut frame = vec![0.0f32; frame_laenge];
                    while !stop.load(Ordering::Acquire) {
                        if ring.try_pop(&mut frame) {
                            pegel.store(pegel_rms(&frame).to_bits(), Ordering::Relaxed);
                            if let Some(cb) = cb.lock().as_mut() {
                                cb(&frame, frame_size);
                            }
                        } else {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                    }
                    debug!("Capture-Arbeiter beendet");
                })
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        };

        self.capture_lauf = Some(CaptureLauf {
            _stream: stream,
            stop,
            arbeiter: Some(arbeiter),
        });
        info!("Capture gestartet");
        Ok(())
    }

    /// Stoppt die Mikrofon-Aufnahme (idempotent)
    pub fn stop_capture(&mut self) {
        if let Some(mut lauf) = self.capture_lauf.take() {
            lauf.stop.store(true, Ordering::Release);
            if let Some(arbeiter) = lauf.arbeiter.take() {
                if arbeiter.join().is_err() {
                    warn!("Capture-Arbeiter ist abgestuerzt");
                }
            }
            self.eingangs_pegel.store(0, Ordering::Relaxed);
            info!("Capture gestoppt");
        }
    }

    /// Startet den Lautsprecher-Output (idempotent)
    pub fn start_playback(&mut self) -> AudioResult<()> {
        if self.playback_lauf.is_some() {
            return Ok(());
        }

        let geraet = ausgabe_geraet_suchen(self.ausgabe_geraet.as_deref())?;
        let frame_laenge = self.config.frame_size as usize * self.config.channels as usize;
        let ring = Arc::new(AudioFrameQueue::neu(PLAYBACK_RING_FRAMES, frame_laenge));
        let stream = open_playback_stream(&geraet, &self.config, Arc::clone(&ring))?;

        let stop = Arc::new(AtomicBool::new(false));
        let arbeiter = {
            let stop = Arc::clone(&stop);
            let cb = Arc::clone(&self.playback_cb);
            let pegel = Arc::clone(&self.ausgangs_pegel);
            let frame_size = self.config.frame_size as usize;
            std::thread::Builder::new()
                .name("sprechfunk-playback".to_string())
                .spawn(move || {
                    let mut frame = vec![0.0f32; frame_laenge];
                    while !stop.load(Ordering::Acquire) {
                        // Ring gefuellt halten; der cpal-Callback entleert ihn
                        while !ring.ist_voll() && !stop.load(Ordering::Acquire) {
                            frame.fill(0.0);
                            if let Some(cb) = cb.lock().as_mut() {
                                cb(&mut frame, frame_size);
                            }
                            pegel.store(pegel_rms(&frame).to_bits(), Ordering::Relaxed);
                            if !ring.try_push(&frame) {
                                break;
                            }
                        }
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    debug!("Playback-Arbeiter beendet");
                })
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        };

        self.playback_lauf = Some(PlaybackLauf {
            _stream: stream,
            stop,
            arbeiter: Some(arbeiter),
        });
        info!("Playback gestartet");
        Ok(())
    }

    /// Stoppt den Lautsprecher-Output (idempotent)
    pub fn stop_playback(&mut self) {
        if let Some(mut lauf) = self.playback_lauf.take() {
            lauf.stop.store(true, Ordering::Release);
            if let Some(arbeiter) = lauf.arbeiter.take() {
                if arbeiter.join().is_err() {
                    warn!("Playback-Arbeiter ist abgestuerzt");
                }
            }
            self.ausgangs_pegel.store(0, Ordering::Relaxed);
            info!("Playback gestoppt");
        }
    }

    /// Stoppt beide Richtungen und gibt die Streams frei
    pub fn shutdown(&mut self) {
        self.stop_capture();
        self.stop_playback();
        debug!("AudioEngine heruntergefahren");
    }

    /// Wechselt das Eingabegeraet; laufendes Capture wird neu gestartet
    pub fn set_eingabe_geraet(&mut self, name: Option<String>) -> AudioResult<()> {
        self.eingabe_geraet = name;
        if self.capture_lauf.is_some() {
            self.stop_capture();
            self.start_capture()?;
        }
        Ok(())
    }

    /// Wechselt das Ausgabegeraet; laufendes Playback wird neu gestartet
    pub fn set_ausgabe_geraet(&mut self, name: Option<String>) -> AudioResult<()> {
        self.ausgabe_geraet = name;
        if self.playback_lauf.is_some() {
            self.stop_playback();
            self.start_playback()?;
        }
        Ok(())
    }

    /// Aktueller Eingangspegel (RMS, [0, 1])
    pub fn eingangs_pegel(&self) -> f32 {
        f32::from_bits(self.eingangs_pegel.load(Ordering::Relaxed))
    }

    /// Aktueller Ausgangspegel (RMS, [0, 1])
    pub fn ausgangs_pegel(&self) -> f32 {
        f32::from_bits(self.ausgangs_pegel.load(Ordering::Relaxed))
    }

    /// Gibt zurueck ob Capture aktiv ist
    pub fn ist_capture_aktiv(&self) -> bool {
        self.capture_lauf.is_some()
    }

    /// Gibt zurueck ob Playback aktiv ist
    pub fn ist_playback_aktiv(&self) -> bool {
        self.playback_lauf.is_some()
    }

    /// Gibt die Konfiguration zurueck
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// RMS-Pegel eines Frames, auf [0, 1] begrenzt
fn pegel_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let quadratsumme: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    let rms = (quadratsumme / samples.len() as f64).sqrt() as f32;
    rms.min(1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
