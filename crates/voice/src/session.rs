//! VoiceSession – Orchestrator der Voice-Pipeline
//!
//! Verdrahtet alle Komponenten:
//! - Capture → Encoder → SRTP → UDP-Send (pro Sende-Ziel-Kanal)
//! - UDP-Recv → SRTP → Decoder → Jitter-Buffer pro Kanal
//! - Jitter-Buffer → additiver Mixer → Playback
//!
//! ## Threads
//! Die Callbacks laufen auf fremden Threads (Capture-/Playback-Arbeiter
//! der Engine, Empfangs-Thread des Transports) und greifen nur ueber den
//! geteilten [`SessionKern`] zu: kurze Locks zum Snapshotten der kleinen
//! Kanal-Tabellen, Atomics fuer Flags und Zaehler, nie ein Lock ueber
//! I/O- oder Codec-Aufrufe hinweg gehalten.
//!
//! ## Sende-Arbitrierung
//! Pro Capture-Frame neu berechnet, ohne Einrasten: aktive PTT-Kanaele
//! gewinnen; sonst der Hot-Mic-Kanal (0 = aus); sonst wird nichts
//! gesendet.
//!
//! ## Entwicklungsmodus
//! Solange keine SRTP-Session installiert ist, laufen Nutzdaten roh ueber
//! den Draht (fest eingebaut, kein Laufzeit-Schalter).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use sprechfunk_audio::codec::{FrameDecoder, FrameEncoder, OpusDecoder, OpusEncoder};
use sprechfunk_audio::engine::AudioEngine;
use sprechfunk_core::types::{AudioConfig, AudioFrame, ChannelId, UserId};
use sprechfunk_crypto::key_exchange::KeyExchange;
use sprechfunk_crypto::srtp::SrtpSession;
use sprechfunk_protocol::codec::OpusConfig;
use sprechfunk_protocol::voice::VoicePacket;

use crate::error::{VoiceError, VoiceResult};
use crate::jitter_buffer::JitterBuffer;
use crate::transport::{SendeGriff, UdpVoiceTransport};
use crate::volume::VolumeController;

/// Wartezeit beim Stoppen, damit letzte Pakete den Socket verlassen
const SENDE_AUSLAUF: Duration = Duration::from_millis(100);

/// Callback fuer Praesenz-Signale (z.B. fuers UI oder den Control-Kanal)
pub type PraesenzCallback = Box<dyn Fn(ChannelId) + Send>;

// ---------------------------------------------------------------------------
// Konfiguration und Zustand
// ---------------------------------------------------------------------------

/// Konfiguration einer Voice-Session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Audio-Parameter (Frame-Groesse, Abtastrate, Jitter-Ziel)
    pub audio: AudioConfig,
    /// Opus-Parameter (Bitrate, FEC, DTX)
    pub opus: OpusConfig,
    /// Voice-Endpunkt des Servers, z.B. "127.0.0.1:9001"
    pub server_adresse: String,
    /// Authentifizierte Benutzer-ID
    pub user_id: UserId,
}

impl SessionConfig {
    /// Validiert die Konfiguration auf innere Konsistenz
    pub fn validieren(&self) -> Result<(), String> {
        self.audio.validieren()?;
        self.opus.validieren()?;
        if self.audio.sample_rate != self.opus.sample_rate as u32 {
            return Err(format!(
                "Abtastraten inkonsistent: Audio {} Hz, Opus {} Hz",
                self.audio.sample_rate, self.opus.sample_rate as u32
            ));
        }
        if self.audio.frame_size != self.opus.samples_pro_frame() {
            return Err(format!(
                "Frame-Groessen inkonsistent: Audio {}, Opus {}",
                self.audio.frame_size,
                self.opus.samples_pro_frame()
            ));
        }
        Ok(())
    }
}

/// Lebenszyklus-Zustand der Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionZustand {
    /// Keine Komponenten angelegt
    Uninitialisiert,
    /// Codec, Engine und Transport stehen; Streams laufen nicht
    Initialisiert,
    /// Capture und Playback laufen
    Laufend,
    /// Streams gestoppt; `starten` ist wieder moeglich
    Gestoppt,
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Zaehler des Session-Kerns (atomar, Relaxed reicht fuer Monotonie)
#[derive(Debug, Default)]
struct SessionZaehler {
    frames_aufgenommen: AtomicU64,
    frames_abgespielt: AtomicU64,
    frames_kodiert: AtomicU64,
    encode_fehler: AtomicU64,
    frames_dekodiert: AtomicU64,
    decode_fehler: AtomicU64,
    plc_frames: AtomicU64,
}

/// Snapshot der Session-Statistiken
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatistik {
    pub frames_aufgenommen: u64,
    pub frames_abgespielt: u64,
    pub frames_kodiert: u64,
    pub encode_fehler: u64,
    pub frames_dekodiert: u64,
    pub decode_fehler: u64,
    pub plc_frames: u64,
    pub pakete_gesendet: u64,
    pub pakete_empfangen: u64,
    pub netzwerk_fehler: u64,
    pub jitter_underruns: u64,
    /// Schlechtester (groesster) Jitter aller gehoerten Kanaele
    pub jitter_ms: f32,
    /// Grobe Schaetzung: Capture + Jitter-Buffer + Playback
    pub geschaetzte_latenz_ms: f32,
}

// ---------------------------------------------------------------------------
// SessionKern
// ---------------------------------------------------------------------------

/// Kanal-Tabellen: gehoerte Kanaele, per-Kanal-Mute, Jitter-Buffer
///
/// Invariante: ein Kanal hat genau dann einen Buffer wenn er in `hoeren`
/// steht.
#[derive(Default)]
struct KanalTabelle {
    hoeren: BTreeSet<ChannelId>,
    stummgeschaltet: BTreeMap<ChannelId, bool>,
    puffer: BTreeMap<ChannelId, Arc<JitterBuffer>>,
}

/// Geteilter Kern der Session
///
/// Wird per `Arc` an die Echtzeit-Callbacks gereicht; die Lebensdauer
/// uebersteigt die der Streams (der Orchestrator haelt die letzte Referenz).
pub(crate) struct SessionKern {
    audio_config: AudioConfig,
    user_id: AtomicU32,
    aktiv: AtomicBool,
    stumm: AtomicBool,
    taub: AtomicBool,
    naechste_sende_seq: AtomicU64,
    hot_mic_kanal: AtomicU32,
    ptt_kanaele: Mutex<BTreeSet<ChannelId>>,
    kanaele: Mutex<KanalTabelle>,
    srtp: Mutex<Option<SrtpSession>>,
    encoder: Mutex<Option<Box<dyn FrameEncoder>>>,
    decoder: Mutex<Option<Box<dyn FrameDecoder>>>,
    sender: Mutex<Option<SendeGriff>>,
    praesenz_cb: Mutex<Option<PraesenzCallback>>,
    volumen: Mutex<VolumeController>,
    start_zeit: Instant,
    zaehler: SessionZaehler,
}

impl SessionKern {
    pub(crate) fn neu(audio_config: AudioConfig, user_id: UserId) -> Self {
        Self {
            audio_config,
            user_id: AtomicU32::new(user_id.inner()),
            aktiv: AtomicBool::new(false),
            stumm: AtomicBool::new(false),
            taub: AtomicBool::new(false),
            naechste_sende_seq: AtomicU64::new(0),
            hot_mic_kanal: AtomicU32::new(0),
            ptt_kanaele: Mutex::new(BTreeSet::new()),
            kanaele: Mutex::new(KanalTabelle::default()),
            srtp: Mutex::new(None),
            encoder: Mutex::new(None),
            decoder: Mutex::new(None),
            sender: Mutex::new(None),
            praesenz_cb: Mutex::new(None),
            volumen: Mutex::new(VolumeController::neu()),
            start_zeit: Instant::now(),
            zaehler: SessionZaehler::default(),
        }
    }

    /// Monotone Mikrosekunden seit Session-Epoche
    fn zeitstempel_us(&self) -> u64 {
        self.start_zeit.elapsed().as_micros() as u64
    }

    // -----------------------------------------------------------------------
    // Echtzeit-Callbacks
    // -----------------------------------------------------------------------

    /// Capture-Callback (Capture-Arbeiter der Engine)
    ///
    /// Kodiert den Frame, bestimmt die Sende-Ziele und verschickt pro
    /// Ziel-Kanal ein Paket. Fehler werden gezaehlt, nie propagiert.
    pub(crate) fn bei_aufnahme(&self, pcm: &[f32], frames: usize) {
        if !self.aktiv.load(Ordering::Acquire)
            || frames != self.audio_config.frame_size as usize
        {
            return;
        }
        if self.stumm.load(Ordering::Acquire) {
            return;
        }

        self.zaehler
            .frames_aufgenommen
            .fetch_add(1, Ordering::Relaxed);

        // Encoder exklusiv fuer den Capture-Pfad; Lock nur fuer den
        // Codec-Aufruf selbst
        let kodiert = {
            let mut encoder = self.encoder.lock();
            let Some(encoder) = encoder.as_mut() else {
                return;
            };
            match encoder.encode(pcm) {
                Ok(frame) => frame,
                Err(e) => {
                    self.zaehler.encode_fehler.fetch_add(1, Ordering::Relaxed);
                    trace!(fehler = %e, "Encode fehlgeschlagen, Frame verworfen");
                    return;
                }
            }
        };
        self.zaehler.frames_kodiert.fetch_add(1, Ordering::Relaxed);

        let ziele = self.sende_ziele();
        if ziele.is_empty() {
            return;
        }

        let Some(sender) = self.sender.lock().clone() else {
            return;
        };
        let user_id = UserId(self.user_id.load(Ordering::Relaxed));

        for kanal in ziele {
            let sequenz = self.naechste_sende_seq.fetch_add(1, Ordering::Relaxed);

            let nutzdaten = {
                let srtp = self.srtp.lock();
                match srtp.as_ref() {
                    Some(session) => match session.verschluesseln(&kodiert.daten, sequenz) {
                        Ok(verschluesselt) => verschluesselt,
                        Err(e) => {
                            warn!(fehler = %e, "SRTP-Verschluesselung fehlgeschlagen, Frame verworfen");
                            continue;
                        }
                    },
                    // Entwicklungsmodus: roh senden
                    None => kodiert.daten.clone(),
                }
            };

            let paket =
                VoicePacket::neu(sequenz, self.zeitstempel_us(), kanal, user_id, nutzdaten);
            if let Err(e) = sender.paket_senden(&paket) {
                trace!(fehler = %e, kanal = %kanal, "Voice-Paket nicht gesendet");
            }
        }
    }

    /// Paket-Callback (Empfangs-Thread des Transports)
    ///
    /// Prueft Kanal-Zugehoerigkeit, entschluesselt, dekodiert und legt den
    /// Frame in den Jitter-Buffer des Kanals.
    pub(crate) fn bei_paket(&self, paket: VoicePacket) {
        if !self.aktiv.load(Ordering::Acquire) {
            return;
        }

        let kanal = paket.header.channel_id;

        // Kurzer Lock: Zugehoerigkeit pruefen und Buffer-Referenz ziehen
        let puffer = {
            let tabelle = self.kanaele.lock();
            if !tabelle.hoeren.contains(&kanal) {
                return;
            }
            if tabelle.stummgeschaltet.get(&kanal).copied().unwrap_or(false) {
                return;
            }
            match tabelle.puffer.get(&kanal) {
                Some(puffer) => Arc::clone(puffer),
                None => return,
            }
        };

        let opus_daten = {
            let mut srtp = self.srtp.lock();
            match srtp.as_mut() {
                Some(session) => match session.entschluesseln(&paket.payload) {
                    Ok(klartext) => klartext,
                    Err(e) => {
                        // Zu kurz, Replay oder Tag-Fehler: Paket still verwerfen
                        self.zaehler.decode_fehler.fetch_add(1, Ordering::Relaxed);
                        trace!(
                            fehler = %e,
                            sequence = paket.header.sequence,
                            "SRTP-Entschluesselung fehlgeschlagen"
                        );
                        return;
                    }
                },
                // Entwicklungsmodus: Nutzdaten sind rohe Opus-Bytes
                None => paket.payload,
            }
        };

        let frame_laenge =
            self.audio_config.frame_size as usize * self.audio_config.channels as usize;
        let mut samples = vec![0.0f32; frame_laenge];
        let geschrieben = {
            let mut decoder = self.decoder.lock();
            let Some(decoder) = decoder.as_mut() else {
                return;
            };
            match decoder.decode(&opus_daten, &mut samples) {
                Ok(n) => n,
                Err(e) => {
                    self.zaehler.decode_fehler.fetch_add(1, Ordering::Relaxed);
                    trace!(fehler = %e, sequence = paket.header.sequence, "Decode fehlgeschlagen");
                    return;
                }
            }
        };
        samples.truncate(geschrieben);
        self.zaehler.frames_dekodiert.fetch_add(1, Ordering::Relaxed);

        let frame = AudioFrame {
            sequence: paket.header.sequence,
            timestamp_us: paket.header.timestamp_us,
            samples,
            frame_size: self.audio_config.frame_size,
        };

        // Voller Buffer ist kein fataler Fehler
        if !puffer.push(frame) {
            trace!(kanal = %kanal, "Jitter-Buffer hat Frame abgelehnt");
        }
    }

    /// Playback-Callback (Playback-Arbeiter der Engine)
    ///
    /// Mischt pro gehoertem, nicht stummgeschaltetem Kanal einen Frame
    /// additiv in die Ausgabe (mit Begrenzung auf [-1, 1]).
    pub(crate) fn bei_wiedergabe(&self, ziel: &mut [f32], _frames: usize) {
        if !self.aktiv.load(Ordering::Acquire) || self.taub.load(Ordering::Acquire) {
            ziel.fill(0.0);
            return;
        }

        self.zaehler
            .frames_abgespielt
            .fetch_add(1, Ordering::Relaxed);

        ziel.fill(0.0);

        // Snapshot unter kurzem Lock; die Pops laufen ohne Kanal-Lock
        let zu_mischen: Vec<(ChannelId, Arc<JitterBuffer>)> = {
            let tabelle = self.kanaele.lock();
            tabelle
                .hoeren
                .iter()
                .filter(|kanal| {
                    !tabelle
                        .stummgeschaltet
                        .get(*kanal)
                        .copied()
                        .unwrap_or(false)
                })
                .filter_map(|kanal| {
                    tabelle
                        .puffer
                        .get(kanal)
                        .map(|puffer| (*kanal, Arc::clone(puffer)))
                })
                .collect()
        };

        for (kanal, puffer) in zu_mischen {
            let Some(mut frame) = puffer.pop() else {
                continue;
            };

            if frame.ist_verdeckung() {
                // Verlust-Marker: dieser Kanal bleibt diesen Frame still
                self.zaehler.plc_frames.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.volumen.lock().anwenden(kanal, &mut frame.samples);

            let n = ziel.len().min(frame.samples.len());
            for i in 0..n {
                ziel[i] = (ziel[i] + frame.samples[i]).clamp(-1.0, 1.0);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sende-Arbitrierung und Praesenz
    // -----------------------------------------------------------------------

    /// Bestimmt die Sende-Ziel-Kanaele dieses Frames
    ///
    /// Reine Funktion von (PTT-Kanaele, Hot-Mic): nicht-leere PTT-Menge
    /// gewinnt; sonst Hot-Mic falls gesetzt; sonst leer.
    pub(crate) fn sende_ziele(&self) -> BTreeSet<ChannelId> {
        let ptt = self.ptt_kanaele.lock().clone();
        if !ptt.is_empty() {
            return ptt;
        }

        let hot = ChannelId(self.hot_mic_kanal.load(Ordering::Acquire));
        let mut ziele = BTreeSet::new();
        if !hot.ist_keiner() {
            ziele.insert(hot);
        }
        ziele
    }

    /// Sendet ein Praesenz-Datagramm fuer den Kanal
    ///
    /// Registriert die UDP-Quelladresse beim Server bevor Voice fliesst.
    pub(crate) fn praesenz_senden(&self, kanal: ChannelId) {
        if !self.aktiv.load(Ordering::Acquire) {
            debug!(kanal = %kanal, "Praesenz uebersprungen: Session inaktiv");
            return;
        }
        let Some(sender) = self.sender.lock().clone() else {
            debug!(kanal = %kanal, "Praesenz uebersprungen: kein Transport");
            return;
        };

        let sequenz = self.naechste_sende_seq.fetch_add(1, Ordering::Relaxed);
        let paket = VoicePacket::neu_praesenz(
            sequenz,
            self.zeitstempel_us(),
            kanal,
            UserId(self.user_id.load(Ordering::Relaxed)),
        );

        match sender.paket_senden(&paket) {
            Ok(()) => debug!(kanal = %kanal, "Praesenz-Datagramm gesendet"),
            Err(e) => warn!(kanal = %kanal, fehler = %e, "Praesenz-Datagramm fehlgeschlagen"),
        }

        if let Some(cb) = self.praesenz_cb.lock().as_ref() {
            cb(kanal);
        }
    }

    // -----------------------------------------------------------------------
    // Multi-Kanal-Steuerung
    // -----------------------------------------------------------------------

    /// Tritt einem Kanal zum Hoeren bei (idempotent)
    pub(crate) fn kanal_beitreten(&self, kanal: ChannelId) {
        {
            let mut tabelle = self.kanaele.lock();
            if tabelle.hoeren.insert(kanal) {
                tabelle.stummgeschaltet.insert(kanal, false);
                tabelle.puffer.insert(
                    kanal,
                    Arc::new(JitterBuffer::neu(
                        self.audio_config.jitter_ziel_frames,
                        self.audio_config.frame_size,
                        self.audio_config.frame_dauer_us(),
                    )),
                );
                info!(kanal = %kanal, "Kanal beigetreten");
            }
        }

        // Praesenz noch vor dem ersten Voice-Paket
        self.praesenz_senden(kanal);
    }

    /// Verlaesst einen Kanal; Buffer, Mute- und Volume-Eintrag werden entfernt
    pub(crate) fn kanal_verlassen(&self, kanal: ChannelId) {
        {
            let mut tabelle = self.kanaele.lock();
            tabelle.hoeren.remove(&kanal);
            tabelle.stummgeschaltet.remove(&kanal);
            tabelle.puffer.remove(&kanal);
        }
        self.volumen.lock().kanal_entfernen(kanal);
        info!(kanal = %kanal, "Kanal verlassen");
    }

    /// Schaltet einen gehoerten Kanal stumm (bleibt beigetreten)
    pub(crate) fn set_kanal_stumm(&self, kanal: ChannelId, stumm: bool) {
        let mut tabelle = self.kanaele.lock();
        if tabelle.hoeren.contains(&kanal) {
            tabelle.stummgeschaltet.insert(kanal, stumm);
            info!(kanal = %kanal, stumm, "Kanal-Mute geaendert");
        }
    }

    pub(crate) fn ist_kanal_stumm(&self, kanal: ChannelId) -> bool {
        self.kanaele
            .lock()
            .stummgeschaltet
            .get(&kanal)
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn beigetretene_kanaele(&self) -> BTreeSet<ChannelId> {
        self.kanaele.lock().hoeren.clone()
    }

    /// Setzt den Hot-Mic-Kanal (0 = aus)
    pub(crate) fn set_hot_mic(&self, kanal: ChannelId) {
        self.hot_mic_kanal.store(kanal.inner(), Ordering::Release);
        if kanal.ist_keiner() {
            info!("Hot-Mic deaktiviert");
        } else {
            info!(kanal = %kanal, "Hot-Mic gesetzt");
        }
    }

    pub(crate) fn hot_mic(&self) -> ChannelId {
        ChannelId(self.hot_mic_kanal.load(Ordering::Acquire))
    }

    /// Startet PTT fuer einen Kanal und registriert die UDP-Adresse
    pub(crate) fn ptt_starten(&self, kanal: ChannelId) {
        self.ptt_kanaele.lock().insert(kanal);
        info!(kanal = %kanal, "PTT gestartet");

        // Der Kanal muss nicht beigetreten sein: Adresse trotzdem
        // registrieren, sonst verwirft der Server die ersten Pakete
        self.praesenz_senden(kanal);
    }

    pub(crate) fn ptt_stoppen(&self, kanal: ChannelId) {
        self.ptt_kanaele.lock().remove(&kanal);
        info!(kanal = %kanal, "PTT gestoppt");
    }

    pub(crate) fn aktive_ptt_kanaele(&self) -> BTreeSet<ChannelId> {
        self.ptt_kanaele.lock().clone()
    }

    /// Raeumt den Multi-Kanal- und Krypto-Zustand ab
    pub(crate) fn leeren(&self) {
        {
            let mut tabelle = self.kanaele.lock();
            tabelle.hoeren.clear();
            tabelle.stummgeschaltet.clear();
            tabelle.puffer.clear();
        }
        self.ptt_kanaele.lock().clear();
        *self.srtp.lock() = None;
        *self.encoder.lock() = None;
        *self.decoder.lock() = None;
        *self.sender.lock() = None;
        self.volumen.lock().kanaele_leeren();
        self.hot_mic_kanal.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Voice-Session des Clients
///
/// Besitzt Engine, Codec, Transport und den geteilten Kern exklusiv.
/// Lebenszyklus: Uninitialisiert → Initialisiert → Laufend ⇄ Gestoppt →
/// (herunterfahren) Uninitialisiert; danach ist eine Neu-Initialisierung
/// erlaubt.
pub struct VoiceSession {
    kern: Arc<SessionKern>,
    engine: Option<AudioEngine>,
    transport: Option<UdpVoiceTransport>,
    zustand: SessionZustand,
}

impl VoiceSession {
    /// Erstellt eine uninitialisierte Session
    pub fn neu() -> Self {
        Self {
            kern: Arc::new(SessionKern::neu(AudioConfig::default(), UserId(0))),
            engine: None,
            transport: None,
            zustand: SessionZustand::Uninitialisiert,
        }
    }

    /// Initialisiert Codec, Engine und Transport
    ///
    /// Laesst die Session bei Fehlern im Zustand Uninitialisiert zurueck.
    pub fn initialisieren(&mut self, config: SessionConfig) -> VoiceResult<()> {
        if self.zustand != SessionZustand::Uninitialisiert {
            return Err(VoiceError::UngueltigerZustand(format!(
                "initialisieren im Zustand {:?}",
                self.zustand
            )));
        }
        config.validieren().map_err(VoiceError::Konfiguration)?;

        // Alle fallibelen Schritte zuerst; erst danach wird der Kern
        // bestueckt
        let engine = AudioEngine::neu(config.audio.clone())?;
        let encoder = OpusEncoder::neu(config.opus.clone())?;
        let decoder = OpusDecoder::aus_config(&config.opus)?;

        let kern = Arc::new(SessionKern::neu(config.audio.clone(), config.user_id));

        let mut transport = UdpVoiceTransport::neu();
        {
            let kern = Arc::clone(&kern);
            transport.set_paket_callback(Box::new(move |paket| kern.bei_paket(paket)));
        }
        transport.verbinden(&config.server_adresse)?;

        *kern.encoder.lock() = Some(Box::new(encoder));
        *kern.decoder.lock() = Some(Box::new(decoder));
        *kern.sender.lock() = Some(transport.sende_griff()?);

        self.kern = kern;
        self.engine = Some(engine);
        self.transport = Some(transport);
        self.zustand = SessionZustand::Initialisiert;

        info!(
            server = %config.server_adresse,
            user = %config.user_id,
            sample_rate = config.audio.sample_rate,
            frame_size = config.audio.frame_size,
            "VoiceSession initialisiert"
        );
        Ok(())
    }

    /// Startet Capture- und Playback-Streams
    ///
    /// Ein Fehler laesst den vorherigen Zustand unveraendert.
    pub fn starten(&mut self) -> VoiceResult<()> {
        if !matches!(
            self.zustand,
            SessionZustand::Initialisiert | SessionZustand::Gestoppt
        ) {
            return Err(VoiceError::UngueltigerZustand(format!(
                "starten im Zustand {:?}",
                self.zustand
            )));
        }
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| VoiceError::UngueltigerZustand("Keine Engine".to_string()))?;

        {
            let kern = Arc::clone(&self.kern);
            engine.set_capture_callback(Box::new(move |pcm, frames| {
                kern.bei_aufnahme(pcm, frames)
            }));
        }
        {
            let kern = Arc::clone(&self.kern);
            engine.set_playback_callback(Box::new(move |pcm, frames| {
                kern.bei_wiedergabe(pcm, frames)
            }));
        }

        engine.start_capture()?;
        if let Err(e) = engine.start_playback() {
            engine.stop_capture();
            return Err(e.into());
        }

        self.kern.aktiv.store(true, Ordering::Release);
        self.zustand = SessionZustand::Laufend;
        info!("VoiceSession gestartet");
        Ok(())
    }

    /// Stoppt die Streams (Reihenfolge: Capture, Auslauf, Playback)
    pub fn stoppen(&mut self) {
        if self.zustand != SessionZustand::Laufend {
            return;
        }

        // Sofort inaktiv markieren: keine neuen Pakete mehr
        self.kern.aktiv.store(false, Ordering::Release);

        if let Some(engine) = self.engine.as_mut() {
            engine.stop_capture();
        }

        // Letzten Paketen Zeit geben den Socket zu verlassen
        std::thread::sleep(SENDE_AUSLAUF);

        if let Some(engine) = self.engine.as_mut() {
            engine.stop_playback();
        }

        self.zustand = SessionZustand::Gestoppt;
        info!("VoiceSession gestoppt");
    }

    /// Faehrt die Session komplett herunter (idempotent)
    ///
    /// Reihenfolge: stoppen, Transport trennen (joint den
    /// Empfangs-Thread), Engine und Codec freigeben, Kanal-Zustand leeren.
    pub fn herunterfahren(&mut self) {
        self.stoppen();

        if let Some(mut transport) = self.transport.take() {
            transport.trennen();
        }

        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }

        self.kern.leeren();
        self.zustand = SessionZustand::Uninitialisiert;
        info!("VoiceSession heruntergefahren");
    }

    /// Aktueller Lebenszyklus-Zustand
    pub fn zustand(&self) -> SessionZustand {
        self.zustand
    }

    /// Gibt zurueck ob die Pipeline laeuft
    pub fn ist_aktiv(&self) -> bool {
        self.kern.aktiv.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Steuerung (Control-Threads)
    // -----------------------------------------------------------------------

    /// Mikrofon stumm schalten (Capture laeuft weiter, sendet aber nicht)
    pub fn set_stumm(&self, stumm: bool) {
        self.kern.stumm.store(stumm, Ordering::Release);
    }

    pub fn ist_stumm(&self) -> bool {
        self.kern.stumm.load(Ordering::Acquire)
    }

    /// Lautsprecher taub schalten (Empfang laeuft weiter, Ausgabe ist still)
    pub fn set_taub(&self, taub: bool) {
        self.kern.taub.store(taub, Ordering::Release);
    }

    pub fn ist_taub(&self) -> bool {
        self.kern.taub.load(Ordering::Acquire)
    }

    /// Setzt die Benutzer-ID (nach der Authentifizierung)
    pub fn set_user_id(&self, user_id: UserId) {
        self.kern.user_id.store(user_id.inner(), Ordering::Relaxed);
        debug!(user = %user_id, "Benutzer-ID aktualisiert");
    }

    /// Installiert die SRTP-Session; ab jetzt ist alles verschluesselt
    pub fn set_srtp_session(&self, session: SrtpSession) {
        *self.kern.srtp.lock() = Some(session);
        info!("SRTP-Session installiert, Voice-Verschluesselung aktiv");
    }

    /// Fuehrt den Key-Exchange mit dem Server-Public-Key durch und
    /// installiert die abgeleitete SRTP-Session
    ///
    /// Gibt den eigenen Public Key fuer die `key_exchange_response`
    /// zurueck.
    pub fn srtp_aus_peer_key(&self, peer_public_key: &[u8; 32]) -> VoiceResult<[u8; 32]> {
        let mut key_exchange = KeyExchange::neu();
        let material = key_exchange.schluessel_ableiten(peer_public_key)?;
        let eigener = key_exchange.oeffentlicher_schluessel();
        self.set_srtp_session(SrtpSession::aus_material(&material));
        Ok(eigener)
    }

    /// Nimmt ein Kanal-Roster entgegen
    ///
    /// Der Voice-Kern interpretiert Roster nicht; sie werden nur fuer die
    /// Diagnose geloggt und ans UI durchgereicht.
    pub fn bei_roster_update(&self, kanal: ChannelId, users: &[UserId]) {
        debug!(kanal = %kanal, teilnehmer = users.len(), "Roster aktualisiert");
    }

    /// Registriert einen Beobachter fuer Praesenz-Signale
    pub fn set_praesenz_callback(&self, cb: PraesenzCallback) {
        *self.kern.praesenz_cb.lock() = Some(cb);
    }

    /// Tritt einem Kanal zum Hoeren bei (idempotent)
    pub fn kanal_beitreten(&self, kanal: ChannelId) {
        self.kern.kanal_beitreten(kanal);
    }

    /// Verlaesst einen Kanal
    pub fn kanal_verlassen(&self, kanal: ChannelId) {
        self.kern.kanal_verlassen(kanal);
    }

    /// Schaltet einen gehoerten Kanal stumm/laut
    pub fn set_kanal_stumm(&self, kanal: ChannelId, stumm: bool) {
        self.kern.set_kanal_stumm(kanal, stumm);
    }

    pub fn ist_kanal_stumm(&self, kanal: ChannelId) -> bool {
        self.kern.ist_kanal_stumm(kanal)
    }

    pub fn beigetretene_kanaele(&self) -> BTreeSet<ChannelId> {
        self.kern.beigetretene_kanaele()
    }

    /// Setzt den Hot-Mic-Kanal (0 = aus)
    pub fn set_hot_mic(&self, kanal: ChannelId) {
        self.kern.set_hot_mic(kanal);
    }

    pub fn hot_mic(&self) -> ChannelId {
        self.kern.hot_mic()
    }

    /// Startet PTT fuer einen Kanal
    pub fn ptt_starten(&self, kanal: ChannelId) {
        self.kern.ptt_starten(kanal);
    }

    /// Stoppt PTT fuer einen Kanal
    pub fn ptt_stoppen(&self, kanal: ChannelId) {
        self.kern.ptt_stoppen(kanal);
    }

    pub fn aktive_ptt_kanaele(&self) -> BTreeSet<ChannelId> {
        self.kern.aktive_ptt_kanaele()
    }

    /// Setzt die Master-Wiedergabe-Lautstaerke (0.0..2.0)
    pub fn set_master_volume(&self, volume: f32) {
        self.kern.volumen.lock().set_master_volume(volume);
    }

    /// Setzt die Wiedergabe-Lautstaerke eines Kanals (0.0..2.0)
    pub fn set_kanal_volume(&self, kanal: ChannelId, volume: f32) {
        self.kern.volumen.lock().set_kanal_volume(kanal, volume);
    }

    /// Aktueller Mikrofon-Pegel (RMS, [0, 1])
    pub fn eingangs_pegel(&self) -> f32 {
        self.engine
            .as_ref()
            .map(|e| e.eingangs_pegel())
            .unwrap_or(0.0)
    }

    /// Aktueller Lautsprecher-Pegel (RMS, [0, 1])
    pub fn ausgangs_pegel(&self) -> f32 {
        self.engine
            .as_ref()
            .map(|e| e.ausgangs_pegel())
            .unwrap_or(0.0)
    }

    /// Snapshot der Session-Statistiken
    pub fn statistik(&self) -> SessionStatistik {
        let z = &self.kern.zaehler;
        let mut s = SessionStatistik {
            frames_aufgenommen: z.frames_aufgenommen.load(Ordering::Relaxed),
            frames_abgespielt: z.frames_abgespielt.load(Ordering::Relaxed),
            frames_kodiert: z.frames_kodiert.load(Ordering::Relaxed),
            encode_fehler: z.encode_fehler.load(Ordering::Relaxed),
            frames_dekodiert: z.frames_dekodiert.load(Ordering::Relaxed),
            decode_fehler: z.decode_fehler.load(Ordering::Relaxed),
            plc_frames: z.plc_frames.load(Ordering::Relaxed),
            ..Default::default()
        };

        if let Some(transport) = &self.transport {
            let t = transport.statistik();
            s.pakete_gesendet = t.pakete_gesendet;
            s.pakete_empfangen = t.pakete_empfangen;
            s.netzwerk_fehler = t.sende_fehler + t.empfangs_fehler;
        }

        {
            let tabelle = self.kern.kanaele.lock();
            for puffer in tabelle.puffer.values() {
                let j = puffer.statistik();
                s.jitter_underruns += j.underruns;
                s.jitter_ms = s.jitter_ms.max(j.jitter_ms);
            }
        }

        // Grobe Schaetzung: 20ms Capture + Jitter-Anteil + 20ms Playback
        s.geschaetzte_latenz_ms = 40.0 + s.jitter_ms * 2.0;
        s
    }
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::neu()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.herunterfahren();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_audio::codec::EncodedFrame;
    use sprechfunk_audio::error::{AudioError, AudioResult};
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicUsize;

    const FRAME: usize = 960;

    /// Deterministischer Test-Codec: "kodiert" zu festen Bytes,
    /// "dekodiert" zu konstanten Samples
    struct TestEncoder;
    impl FrameEncoder for TestEncoder {
        fn encode(&mut self, pcm: &[f32]) -> AudioResult<EncodedFrame> {
            assert_eq!(pcm.len(), FRAME);
            Ok(EncodedFrame {
                daten: vec![0x42; 24],
                frame_groesse: FRAME as u32,
                ist_stille: false,
            })
        }
        fn frame_groesse(&self) -> usize {
            FRAME
        }
    }

    struct TestDecoder {
        wert: f32,
    }
    impl FrameDecoder for TestDecoder {
        fn decode(&mut self, _daten: &[u8], ziel: &mut [f32]) -> AudioResult<usize> {
            ziel.fill(self.wert);
            Ok(ziel.len())
        }
        fn decode_verdeckung(&mut self, ziel: &mut [f32]) -> AudioResult<usize> {
            ziel.fill(0.0);
            Ok(ziel.len())
        }
        fn frame_groesse(&self) -> usize {
            FRAME
        }
    }

    struct FehlerDecoder;
    impl FrameDecoder for FehlerDecoder {
        fn decode(&mut self, _daten: &[u8], _ziel: &mut [f32]) -> AudioResult<usize> {
            Err(AudioError::CodecFehler("kaputt".to_string()))
        }
        fn decode_verdeckung(&mut self, _ziel: &mut [f32]) -> AudioResult<usize> {
            Err(AudioError::CodecFehler("kaputt".to_string()))
        }
        fn frame_groesse(&self) -> usize {
            FRAME
        }
    }

    fn test_audio_config(jitter_ziel: u32) -> AudioConfig {
        AudioConfig {
            jitter_ziel_frames: jitter_ziel,
            ..Default::default()
        }
    }

    fn test_kern(jitter_ziel: u32) -> SessionKern {
        let kern = SessionKern::neu(test_audio_config(jitter_ziel), UserId(42));
        kern.aktiv.store(true, Ordering::Release);
        kern
    }

    /// Verbindet einen Kern via Transport mit einem Loopback-"Server"
    fn kern_mit_loopback(kern: &SessionKern) -> (UdpSocket, UdpVoiceTransport) {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut transport = UdpVoiceTransport::neu();
        transport
            .verbinden(&server.local_addr().unwrap().to_string())
            .unwrap();
        *kern.sender.lock() = Some(transport.sende_griff().unwrap());
        (server, transport)
    }

    fn empfange_paket(server: &UdpSocket) -> VoicePacket {
        let mut puffer = [0u8; 2048];
        let (laenge, _) = server.recv_from(&mut puffer).expect("Paket erwartet");
        VoicePacket::decode(&puffer[..laenge]).expect("Dekodierbar")
    }

    fn test_paket(seq: u64, kanal: ChannelId, payload: Vec<u8>) -> VoicePacket {
        VoicePacket::neu(seq, seq * 20_000, kanal, UserId(7), payload)
    }

    // --- Sende-Arbitrierung ---

    #[test]
    fn arbitrierung_ptt_dominiert_hot_mic() {
        let kern = test_kern(3);

        kern.set_hot_mic(ChannelId(3));
        assert_eq!(kern.sende_ziele(), BTreeSet::from([ChannelId(3)]));

        kern.ptt_starten(ChannelId(5));
        assert_eq!(kern.sende_ziele(), BTreeSet::from([ChannelId(5)]));

        kern.ptt_starten(ChannelId(7));
        assert_eq!(
            kern.sende_ziele(),
            BTreeSet::from([ChannelId(5), ChannelId(7)])
        );

        kern.ptt_stoppen(ChannelId(5));
        kern.ptt_stoppen(ChannelId(7));
        assert_eq!(kern.sende_ziele(), BTreeSet::from([ChannelId(3)]));

        kern.set_hot_mic(ChannelId::KEINER);
        assert!(kern.sende_ziele().is_empty());
    }

    #[test]
    fn arbitrierung_ohne_alles_leer() {
        let kern = test_kern(3);
        assert!(kern.sende_ziele().is_empty());
    }

    // --- Capture-Pfad ---

    #[test]
    fn aufnahme_sendet_pro_ziel_kanal() {
        let kern = test_kern(3);
        *kern.encoder.lock() = Some(Box::new(TestEncoder));
        let (server, _transport) = kern_mit_loopback(&kern);

        kern.ptt_starten(ChannelId(4));
        let _ = empfange_paket(&server); // Praesenz von ptt_starten

        let pcm = vec![0.1f32; FRAME];
        kern.bei_aufnahme(&pcm, FRAME);

        let paket = empfange_paket(&server);
        assert_eq!(paket.header.channel_id, ChannelId(4));
        assert_eq!(paket.header.user_id, UserId(42));
        assert_eq!(paket.payload, vec![0x42; 24], "Roh im Entwicklungsmodus");

        // Sequenz steigt monoton ueber Frames
        kern.bei_aufnahme(&pcm, FRAME);
        let zweites = empfange_paket(&server);
        assert_eq!(zweites.header.sequence, paket.header.sequence + 1);
    }

    #[test]
    fn aufnahme_mehrere_ptt_kanaele() {
        let kern = test_kern(3);
        *kern.encoder.lock() = Some(Box::new(TestEncoder));
        let (server, _transport) = kern_mit_loopback(&kern);

        kern.ptt_starten(ChannelId(1));
        kern.ptt_starten(ChannelId(2));
        let _ = empfange_paket(&server);
        let _ = empfange_paket(&server); // Zwei Praesenz-Datagramme

        kern.bei_aufnahme(&vec![0.1f32; FRAME], FRAME);

        let a = empfange_paket(&server);
        let b = empfange_paket(&server);
        let kanaele = BTreeSet::from([a.header.channel_id, b.header.channel_id]);
        assert_eq!(kanaele, BTreeSet::from([ChannelId(1), ChannelId(2)]));
        assert_ne!(a.header.sequence, b.header.sequence);
    }

    #[test]
    fn aufnahme_stumm_sendet_nichts() {
        let kern = test_kern(3);
        *kern.encoder.lock() = Some(Box::new(TestEncoder));
        let (server, _transport) = kern_mit_loopback(&kern);
        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        kern.set_hot_mic(ChannelId(3));
        kern.stumm.store(true, Ordering::Release);
        kern.bei_aufnahme(&vec![0.1f32; FRAME], FRAME);

        let mut puffer = [0u8; 2048];
        assert!(server.recv_from(&mut puffer).is_err(), "Stumm: kein Paket");
        assert_eq!(
            kern.zaehler.frames_aufgenommen.load(Ordering::Relaxed),
            0,
            "Stumme Frames zaehlen nicht als aufgenommen"
        );
    }

    #[test]
    fn aufnahme_inaktiv_oder_falsche_laenge() {
        let kern = test_kern(3);
        *kern.encoder.lock() = Some(Box::new(TestEncoder));
        kern.set_hot_mic(ChannelId(3));

        kern.bei_aufnahme(&vec![0.1f32; FRAME / 2], FRAME / 2);
        assert_eq!(kern.zaehler.frames_kodiert.load(Ordering::Relaxed), 0);

        kern.aktiv.store(false, Ordering::Release);
        kern.bei_aufnahme(&vec![0.1f32; FRAME], FRAME);
        assert_eq!(kern.zaehler.frames_kodiert.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn aufnahme_mit_srtp_verschluesselt() {
        let kern = test_kern(3);
        *kern.encoder.lock() = Some(Box::new(TestEncoder));
        *kern.srtp.lock() = Some(SrtpSession::neu(&[3u8; 16], [9u8; 14]));
        let (server, _transport) = kern_mit_loopback(&kern);

        kern.ptt_starten(ChannelId(4));
        let praesenz = empfange_paket(&server);
        assert_eq!(
            praesenz.payload,
            vec![0u8],
            "Praesenz bleibt unverschluesselt"
        );

        kern.bei_aufnahme(&vec![0.1f32; FRAME], FRAME);
        let paket = empfange_paket(&server);

        // SRTP-Rahmen: seq(4) + ciphertext(24) + tag(16)
        assert_eq!(paket.payload.len(), 4 + 24 + 16);
        let mut gegenstelle = SrtpSession::neu(&[3u8; 16], [9u8; 14]);
        let klartext = gegenstelle.entschluesseln(&paket.payload).unwrap();
        assert_eq!(klartext, vec![0x42; 24]);
    }

    // --- Empfangs-Pfad ---

    #[test]
    fn paket_landet_im_kanal_buffer() {
        let kern = test_kern(1);
        *kern.decoder.lock() = Some(Box::new(TestDecoder { wert: 0.5 }));
        kern.kanal_beitreten(ChannelId(2));

        kern.bei_paket(test_paket(0, ChannelId(2), vec![1, 2, 3]));

        let tabelle = kern.kanaele.lock();
        let puffer = tabelle.puffer.get(&ChannelId(2)).unwrap();
        assert_eq!(puffer.fuellstand(), 1);
        assert_eq!(kern.zaehler.frames_dekodiert.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn paket_fuer_nicht_gehoerten_kanal_verworfen() {
        let kern = test_kern(1);
        *kern.decoder.lock() = Some(Box::new(TestDecoder { wert: 0.5 }));
        kern.kanal_beitreten(ChannelId(2));

        kern.bei_paket(test_paket(0, ChannelId(9), vec![1, 2, 3]));

        assert_eq!(kern.zaehler.frames_dekodiert.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn paket_fuer_stummen_kanal_verworfen() {
        let kern = test_kern(1);
        *kern.decoder.lock() = Some(Box::new(TestDecoder { wert: 0.5 }));
        kern.kanal_beitreten(ChannelId(2));
        kern.set_kanal_stumm(ChannelId(2), true);

        kern.bei_paket(test_paket(0, ChannelId(2), vec![1, 2, 3]));

        let tabelle = kern.kanaele.lock();
        assert_eq!(tabelle.puffer.get(&ChannelId(2)).unwrap().fuellstand(), 0);
    }

    #[test]
    fn srtp_fehler_zaehlt_decode_fehler() {
        let kern = test_kern(1);
        *kern.decoder.lock() = Some(Box::new(TestDecoder { wert: 0.5 }));
        *kern.srtp.lock() = Some(SrtpSession::neu(&[0u8; 16], [0u8; 14]));
        kern.kanal_beitreten(ChannelId(2));

        // 25 Bytes Muell: Laenge ok, Tag-Verifikation muss scheitern
        kern.bei_paket(test_paket(0, ChannelId(2), vec![0xFF; 25]));

        assert_eq!(kern.zaehler.decode_fehler.load(Ordering::Relaxed), 1);
        let tabelle = kern.kanaele.lock();
        assert_eq!(tabelle.puffer.get(&ChannelId(2)).unwrap().fuellstand(), 0);
    }

    #[test]
    fn replay_paket_verworfen() {
        let kern = test_kern(1);
        *kern.decoder.lock() = Some(Box::new(TestDecoder { wert: 0.5 }));
        let sender_srtp = SrtpSession::neu(&[0u8; 16], [0u8; 14]);
        *kern.srtp.lock() = Some(SrtpSession::neu(&[0u8; 16], [0u8; 14]));
        kern.kanal_beitreten(ChannelId(2));

        let payload = sender_srtp.verschluesseln(&[0x42; 24], 1).unwrap();
        kern.bei_paket(test_paket(1, ChannelId(2), payload.clone()));
        kern.bei_paket(test_paket(1, ChannelId(2), payload));

        assert_eq!(kern.zaehler.frames_dekodiert.load(Ordering::Relaxed), 1);
        assert_eq!(kern.zaehler.decode_fehler.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn decode_fehler_verwirft_frame() {
        let kern = test_kern(1);
        *kern.decoder.lock() = Some(Box::new(FehlerDecoder));
        kern.kanal_beitreten(ChannelId(2));

        kern.bei_paket(test_paket(0, ChannelId(2), vec![1, 2, 3]));

        assert_eq!(kern.zaehler.decode_fehler.load(Ordering::Relaxed), 1);
        let tabelle = kern.kanaele.lock();
        assert_eq!(tabelle.puffer.get(&ChannelId(2)).unwrap().fuellstand(), 0);
    }

    // --- Wiedergabe-Pfad ---

    #[test]
    fn wiedergabe_mischt_kanaele_additiv() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));
        kern.kanal_beitreten(ChannelId(2));

        // Frames direkt in die Buffer legen
        {
            let tabelle = kern.kanaele.lock();
            for (kanal, wert) in [(ChannelId(1), 0.4f32), (ChannelId(2), 0.5f32)] {
                tabelle.puffer.get(&kanal).unwrap().push(AudioFrame {
                    sequence: 0,
                    timestamp_us: 0,
                    samples: vec![wert; FRAME],
                    frame_size: FRAME as u32,
                });
            }
        }

        let mut ziel = vec![0.0f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);

        assert!((ziel[0] - 0.9).abs() < 1e-6, "0.4 + 0.5 = 0.9");
        assert_eq!(kern.zaehler.frames_abgespielt.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn wiedergabe_begrenzt_auf_eins() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));
        kern.kanal_beitreten(ChannelId(2));

        {
            let tabelle = kern.kanaele.lock();
            for kanal in [ChannelId(1), ChannelId(2)] {
                tabelle.puffer.get(&kanal).unwrap().push(AudioFrame {
                    sequence: 0,
                    timestamp_us: 0,
                    samples: vec![0.8; FRAME],
                    frame_size: FRAME as u32,
                });
            }
        }

        let mut ziel = vec![0.0f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);
        assert_eq!(ziel[0], 1.0, "0.8 + 0.8 muss auf 1.0 begrenzt werden");
    }

    #[test]
    fn wiedergabe_taub_liefert_stille() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));
        kern.taub.store(true, Ordering::Release);

        let mut ziel = vec![0.7f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);
        assert!(ziel.iter().all(|&s| s == 0.0));
        assert_eq!(
            kern.zaehler.frames_abgespielt.load(Ordering::Relaxed),
            0,
            "Taub zaehlt nicht als abgespielt"
        );
    }

    #[test]
    fn wiedergabe_inaktiv_liefert_stille() {
        let kern = test_kern(1);
        kern.aktiv.store(false, Ordering::Release);

        let mut ziel = vec![0.7f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);
        assert!(ziel.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn wiedergabe_verlust_marker_zaehlt_plc() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));

        {
            let tabelle = kern.kanaele.lock();
            let puffer = tabelle.puffer.get(&ChannelId(1)).unwrap();
            // Sequenz 0 fehlt, 1 liegt vor: der erste Pop liefert einen Marker
            puffer.push(AudioFrame {
                sequence: 0,
                timestamp_us: 0,
                samples: vec![0.5; FRAME],
                frame_size: FRAME as u32,
            });
            puffer.pop();
            puffer.push(AudioFrame {
                sequence: 2,
                timestamp_us: 0,
                samples: vec![0.5; FRAME],
                frame_size: FRAME as u32,
            });
        }

        let mut ziel = vec![0.0f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);

        assert_eq!(kern.zaehler.plc_frames.load(Ordering::Relaxed), 1);
        assert!(ziel.iter().all(|&s| s == 0.0), "Marker ergibt Stille");
    }

    #[test]
    fn wiedergabe_kanal_volume_skaliert() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));
        kern.volumen.lock().set_kanal_volume(ChannelId(1), 0.5);
        // Glaettung einschwingen lassen
        {
            let mut leer: [f32; 0] = [];
            let mut volumen = kern.volumen.lock();
            for _ in 0..200 {
                volumen.anwenden(ChannelId(1), &mut leer);
            }
        }

        {
            let tabelle = kern.kanaele.lock();
            tabelle.puffer.get(&ChannelId(1)).unwrap().push(AudioFrame {
                sequence: 0,
                timestamp_us: 0,
                samples: vec![0.8; FRAME],
                frame_size: FRAME as u32,
            });
        }

        let mut ziel = vec![0.0f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);
        assert!(
            (ziel[0] - 0.4).abs() < 0.02,
            "0.8 * Volume 0.5 = 0.4, war {}",
            ziel[0]
        );
    }

    #[test]
    fn wiedergabe_stummer_kanal_nicht_gemischt() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));
        kern.set_kanal_stumm(ChannelId(1), true);

        {
            let tabelle = kern.kanaele.lock();
            tabelle.puffer.get(&ChannelId(1)).unwrap().push(AudioFrame {
                sequence: 0,
                timestamp_us: 0,
                samples: vec![0.9; FRAME],
                frame_size: FRAME as u32,
            });
        }

        let mut ziel = vec![0.0f32; FRAME];
        kern.bei_wiedergabe(&mut ziel, FRAME);
        assert!(ziel.iter().all(|&s| s == 0.0));
    }

    // --- Multi-Kanal-Steuerung ---

    #[test]
    fn kanal_beitreten_idempotent() {
        let kern = test_kern(2);
        *kern.decoder.lock() = Some(Box::new(TestDecoder { wert: 0.5 }));
        kern.kanal_beitreten(ChannelId(1));

        kern.bei_paket(test_paket(0, ChannelId(1), vec![1]));
        kern.kanal_beitreten(ChannelId(1)); // Zweiter Beitritt

        // Der Buffer darf nicht ersetzt worden sein
        let tabelle = kern.kanaele.lock();
        assert_eq!(tabelle.puffer.get(&ChannelId(1)).unwrap().fuellstand(), 1);
        assert_eq!(tabelle.hoeren.len(), 1);
    }

    #[test]
    fn kanal_verlassen_raeumt_auf() {
        let kern = test_kern(2);
        kern.kanal_beitreten(ChannelId(1));
        kern.set_kanal_stumm(ChannelId(1), true);

        kern.kanal_verlassen(ChannelId(1));

        let tabelle = kern.kanaele.lock();
        assert!(tabelle.hoeren.is_empty());
        assert!(tabelle.stummgeschaltet.is_empty());
        assert!(tabelle.puffer.is_empty());
    }

    #[test]
    fn buffer_existiert_genau_fuer_gehoerte_kanaele() {
        let kern = test_kern(2);
        kern.kanal_beitreten(ChannelId(1));
        kern.kanal_beitreten(ChannelId(2));
        kern.kanal_verlassen(ChannelId(1));

        let tabelle = kern.kanaele.lock();
        assert_eq!(
            tabelle.hoeren.iter().collect::<Vec<_>>(),
            tabelle.puffer.keys().collect::<Vec<_>>(),
            "hoeren und puffer muessen dieselben Kanaele enthalten"
        );
    }

    #[test]
    fn mute_nur_fuer_gehoerte_kanaele() {
        let kern = test_kern(2);
        kern.set_kanal_stumm(ChannelId(5), true);
        assert!(!kern.ist_kanal_stumm(ChannelId(5)));

        kern.kanal_beitreten(ChannelId(5));
        kern.set_kanal_stumm(ChannelId(5), true);
        assert!(kern.ist_kanal_stumm(ChannelId(5)));
    }

    // --- Praesenz ---

    #[test]
    fn beitritt_sendet_praesenz_wenn_aktiv() {
        let kern = test_kern(2);
        let (server, _transport) = kern_mit_loopback(&kern);

        kern.kanal_beitreten(ChannelId(8));

        let paket = empfange_paket(&server);
        assert_eq!(paket.header.channel_id, ChannelId(8));
        assert_eq!(paket.payload, vec![0u8]);
    }

    #[test]
    fn beitritt_inaktiv_sendet_keine_praesenz() {
        let kern = test_kern(2);
        kern.aktiv.store(false, Ordering::Release);
        let (server, _transport) = kern_mit_loopback(&kern);
        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        kern.kanal_beitreten(ChannelId(8));

        let mut puffer = [0u8; 2048];
        assert!(server.recv_from(&mut puffer).is_err());
    }

    #[test]
    fn praesenz_callback_wird_gerufen() {
        let kern = test_kern(2);
        let (server, _transport) = kern_mit_loopback(&kern);

        let zaehler = Arc::new(AtomicUsize::new(0));
        {
            let zaehler = Arc::clone(&zaehler);
            *kern.praesenz_cb.lock() = Some(Box::new(move |kanal| {
                assert_eq!(kanal, ChannelId(6));
                zaehler.fetch_add(1, Ordering::Relaxed);
            }));
        }

        kern.ptt_starten(ChannelId(6));
        let _ = empfange_paket(&server);
        assert_eq!(zaehler.load(Ordering::Relaxed), 1);
    }

    // --- Lebenszyklus ---

    #[test]
    fn zustandsmaschine_initialisieren_und_herunterfahren() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let adresse = server.local_addr().unwrap().to_string();

        let mut session = VoiceSession::neu();
        assert_eq!(session.zustand(), SessionZustand::Uninitialisiert);

        let config = SessionConfig {
            audio: AudioConfig::default(),
            opus: OpusConfig::default(),
            server_adresse: adresse.clone(),
            user_id: UserId(42),
        };
        session.initialisieren(config.clone()).unwrap();
        assert_eq!(session.zustand(), SessionZustand::Initialisiert);
        assert!(!session.ist_aktiv());

        // Doppelte Initialisierung ist ein Zustandsfehler
        assert!(session.initialisieren(config.clone()).is_err());

        session.herunterfahren();
        assert_eq!(session.zustand(), SessionZustand::Uninitialisiert);

        // Neu-Initialisierung nach Shutdown ist erlaubt
        session.initialisieren(config).unwrap();
        assert_eq!(session.zustand(), SessionZustand::Initialisiert);
    }

    #[test]
    fn initialisieren_mit_inkonsistenter_config() {
        let mut session = VoiceSession::neu();
        let config = SessionConfig {
            audio: AudioConfig {
                frame_size: 480, // 10ms
                ..Default::default()
            },
            opus: OpusConfig::default(), // 20ms
            server_adresse: "127.0.0.1:9001".to_string(),
            user_id: UserId(1),
        };
        assert!(session.initialisieren(config).is_err());
        assert_eq!(session.zustand(), SessionZustand::Uninitialisiert);
    }

    #[test]
    fn starten_ohne_initialisierung_fehler() {
        let mut session = VoiceSession::neu();
        assert!(session.starten().is_err());
        assert_eq!(session.zustand(), SessionZustand::Uninitialisiert);
    }

    #[test]
    fn herunterfahren_ist_idempotent() {
        let mut session = VoiceSession::neu();
        session.herunterfahren();
        session.herunterfahren();
        assert_eq!(session.zustand(), SessionZustand::Uninitialisiert);
    }

    #[test]
    fn herunterfahren_leert_kanal_zustand() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let adresse = server.local_addr().unwrap().to_string();

        let mut session = VoiceSession::neu();
        session
            .initialisieren(SessionConfig {
                audio: AudioConfig::default(),
                opus: OpusConfig::default(),
                server_adresse: adresse,
                user_id: UserId(42),
            })
            .unwrap();

        session.kanal_beitreten(ChannelId(1));
        session.ptt_starten(ChannelId(2));
        session.set_hot_mic(ChannelId(3));

        session.herunterfahren();

        assert!(session.beigetretene_kanaele().is_empty());
        assert!(session.aktive_ptt_kanaele().is_empty());
        assert!(session.hot_mic().ist_keiner());
    }

    #[test]
    fn statistik_sammelt_jitter_underruns() {
        let kern = test_kern(1);
        kern.kanal_beitreten(ChannelId(1));

        {
            let tabelle = kern.kanaele.lock();
            let puffer = tabelle.puffer.get(&ChannelId(1)).unwrap();
            puffer.push(AudioFrame {
                sequence: 0,
                timestamp_us: 0,
                samples: vec![0.5; FRAME],
                frame_size: FRAME as u32,
            });
            puffer.pop();
            puffer.pop(); // Underrun
        }

        let session = VoiceSession {
            kern: Arc::new(kern),
            engine: None,
            transport: None,
            zustand: SessionZustand::Uninitialisiert,
        };

        let statistik = session.statistik();
        assert_eq!(statistik.jitter_underruns, 1);
        assert!(statistik.geschaetzte_latenz_ms >= 40.0);
    }

    #[test]
    fn key_exchange_installiert_srtp() {
        let session = VoiceSession::neu();
        assert!(session.kern.srtp.lock().is_none());

        // "Server"-Seite des Handshakes
        let mut server_kx = KeyExchange::neu();
        let client_pub = session
            .srtp_aus_peer_key(&server_kx.oeffentlicher_schluessel())
            .unwrap();
        assert!(session.kern.srtp.lock().is_some());

        // Beide Seiten muessen kompatible Sessions ableiten
        let material = server_kx.schluessel_ableiten(&client_pub).unwrap();
        let server_srtp = SrtpSession::aus_material(&material);
        let paket = server_srtp.verschluesseln(b"gegenprobe", 1).unwrap();

        let mut srtp = session.kern.srtp.lock();
        let klartext = srtp.as_mut().unwrap().entschluesseln(&paket).unwrap();
        assert_eq!(klartext, b"gegenprobe");
    }

    #[test]
    fn stumm_und_taub_schalter() {
        let session = VoiceSession::neu();
        assert!(!session.ist_stumm());
        assert!(!session.ist_taub());

        session.set_stumm(true);
        session.set_taub(true);
        assert!(session.ist_stumm());
        assert!(session.ist_taub());

        session.set_stumm(false);
        assert!(!session.ist_stumm());
        assert!(session.ist_taub());
    }
}
