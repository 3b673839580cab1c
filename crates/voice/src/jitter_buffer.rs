//! Jitter-Buffer fuer Voice-Frames
//!
//! Ordnet eingehende Frames pro Kanal nach Sequenznummer und puffert sie,
//! um Netzwerk-Jitter auszugleichen. Fehlt der erwartete Frame beim Pop,
//! wird ein Verlust-Marker (leere Samples) emittiert statt zu stocken –
//! der Mixer gibt dafuer Stille oder Codec-Verdeckung aus.
//!
//! ## Verhalten
//! - Vorpufferung: bis der Buffer einmal den Ziel-Fuellstand erreicht hat,
//!   liefert `pop` nichts (und zaehlt keinen Underrun)
//! - Danach: Luecken werden als Marker emittiert, Leerlauf als Underrun
//!   gezaehlt
//! - `naechste_seq` faellt nie zurueck: einmal uebersprungene Sequenzen
//!   werden nie mehr ausgegeben
//!
//! Alle Methoden synchronisieren ueber genau eine interne Mutex pro
//! Instanz; der Orchestrator haelt beim Zugriff keine weiteren Locks.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use sprechfunk_core::types::AudioFrame;

/// Fenstergroesse der Jitter-Messung (letzte N in-order Pops)
const JITTER_FENSTER: usize = 100;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter-Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitterStatistik {
    /// Angenommene Frames gesamt
    pub empfangen: u64,
    /// Regulaer ausgegebene Frames
    pub abgespielt: u64,
    /// Verworfene Duplikate (inkl. zu spaet angekommener Frames)
    pub duplikate: u64,
    /// Zu weit in der Zukunft liegende Frames plus emittierte Verlust-Marker
    pub verspaetet: u64,
    /// Wegen Ueberlauf verworfene aelteste Frames
    pub verworfen: u64,
    /// Leerlauf nach der Vorpufferung
    pub underruns: u64,
    /// Hoechster beobachteter Fuellstand
    pub max_fuellstand: u32,
    /// Aktueller Fuellstand
    pub fuellstand: u32,
    /// Mittlere Abweichung vom Frame-Raster in Millisekunden
    pub jitter_ms: f32,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

struct JitterKern {
    eintraege: VecDeque<AudioFrame>,
    naechste_seq: u64,
    initialisiert: bool,
    /// Einmal Ziel-Fuellstand erreicht – ab dann liefert pop auch unterhalb
    bereit: bool,
    letzter_pop: Option<Instant>,
    jitter_fenster: VecDeque<f32>,
    statistik: JitterStatistik,
}

/// Jitter-Buffer einer (Kanal, Absender)-Kombination
pub struct JitterBuffer {
    ziel_fuellung: usize,
    max_fuellung: usize,
    frame_groesse: u32,
    frame_dauer_us: u64,
    kern: Mutex<JitterKern>,
}

impl JitterBuffer {
    /// Erstellt einen leeren Buffer
    ///
    /// `ziel_fuellung` Frames muessen vorliegen bevor die Ausgabe beginnt;
    /// das Maximum ist das Doppelte davon.
    pub fn neu(ziel_fuellung: u32, frame_groesse: u32, frame_dauer_us: u64) -> Self {
        let ziel = ziel_fuellung.max(1) as usize;
        Self {
            ziel_fuellung: ziel,
            max_fuellung: ziel * 2,
            frame_groesse,
            frame_dauer_us,
            kern: Mutex::new(JitterKern {
                eintraege: VecDeque::with_capacity(ziel * 2),
                naechste_seq: 0,
                initialisiert: false,
                bereit: false,
                letzter_pop: None,
                jitter_fenster: VecDeque::with_capacity(JITTER_FENSTER),
                statistik: JitterStatistik::default(),
            }),
        }
    }

    /// Fuegt einen Frame ein
    ///
    /// Gibt `false` zurueck wenn der Frame verworfen wurde (Duplikat,
    /// zu weit in der Zukunft).
    pub fn push(&self, frame: AudioFrame) -> bool {
        let mut k = self.kern.lock();
        k.statistik.empfangen += 1;

        // Erster Frame legt die Start-Sequenz fest
        if !k.initialisiert {
            k.naechste_seq = frame.sequence;
            k.initialisiert = true;
        }

        // Bereits ausgegeben oder uebersprungen
        if frame.sequence < k.naechste_seq {
            k.statistik.duplikate += 1;
            tracing::trace!(sequence = frame.sequence, "Jitter: Duplikat verworfen");
            return false;
        }

        // Zu weit in der Zukunft
        if frame.sequence >= k.naechste_seq + self.max_fuellung as u64 {
            k.statistik.verspaetet += 1;
            tracing::debug!(
                sequence = frame.sequence,
                erwartet = k.naechste_seq,
                "Jitter: Frame zu weit in der Zukunft"
            );
            return false;
        }

        // Ueberlauf: aeltesten Frame verdraengen
        if k.eintraege.len() >= self.max_fuellung {
            k.eintraege.pop_front();
            k.statistik.verworfen += 1;
            tracing::debug!("Jitter: Ueberlauf, aeltester Frame verworfen");
        }

        // Einfuegeposition binaer suchen (aufsteigende Sequenz)
        let pos = k
            .eintraege
            .partition_point(|e| e.sequence < frame.sequence);

        // Duplikat im Buffer selbst
        if k.eintraege
            .get(pos)
            .is_some_and(|e| e.sequence == frame.sequence)
        {
            k.statistik.duplikate += 1;
            return false;
        }

        k.eintraege.insert(pos, frame);

        let fuellstand = k.eintraege.len() as u32;
        k.statistik.max_fuellstand = k.statistik.max_fuellstand.max(fuellstand);
        k.statistik.fuellstand = fuellstand;
        true
    }

    /// Entnimmt den naechsten Frame in Sequenz-Reihenfolge
    ///
    /// - `None` waehrend der Vorpufferung oder bei Leerlauf
    /// - Verlust-Marker (leere Samples) wenn der erwartete Frame fehlt,
    ///   aber ein spaeterer vorliegt; der Buffer wird dabei nicht
    ///   konsumiert
    pub fn pop(&self) -> Option<AudioFrame> {
        let mut k = self.kern.lock();

        // Vorpufferung: erst liefern wenn der Ziel-Fuellstand einmal
        // erreicht wurde
        if !k.bereit {
            if k.eintraege.len() >= self.ziel_fuellung {
                k.bereit = true;
            } else {
                return None;
            }
        }

        if k.eintraege.is_empty() {
            if k.initialisiert {
                k.statistik.underruns += 1;
            }
            return None;
        }

        let front_seq = k.eintraege.front().map(|e| e.sequence)?;

        if front_seq == k.naechste_seq {
            // Erwarteter Frame liegt vor
            let frame = k.eintraege.pop_front()?;
            k.naechste_seq += 1;
            k.statistik.abgespielt += 1;
            k.statistik.fuellstand = k.eintraege.len() as u32;
            self.jitter_messen(&mut k);
            return Some(frame);
        }

        // front_seq > naechste_seq: Luecke – Verlust-Marker emittieren,
        // den gepufferten Frame fuer den naechsten Pop liegen lassen
        let marker = AudioFrame {
            sequence: k.naechste_seq,
            timestamp_us: 0,
            samples: Vec::new(),
            frame_size: self.frame_groesse,
        };
        k.naechste_seq += 1;
        k.statistik.verspaetet += 1;
        tracing::trace!(sequence = marker.sequence, "Jitter: Verlust-Marker");
        Some(marker)
    }

    /// Setzt den Buffer auf den Ausgangszustand zurueck
    pub fn reset(&self) {
        let mut k = self.kern.lock();
        k.eintraege.clear();
        k.naechste_seq = 0;
        k.initialisiert = false;
        k.bereit = false;
        k.letzter_pop = None;
        k.jitter_fenster.clear();
        k.statistik = JitterStatistik::default();
    }

    /// Aktueller Fuellstand in Frames
    pub fn fuellstand(&self) -> usize {
        self.kern.lock().eintraege.len()
    }

    /// Gibt zurueck ob die Vorpufferung abgeschlossen ist
    pub fn ist_bereit(&self) -> bool {
        let k = self.kern.lock();
        k.bereit || k.eintraege.len() >= self.ziel_fuellung
    }

    /// Snapshot der Statistiken
    pub fn statistik(&self) -> JitterStatistik {
        let k = self.kern.lock();
        let mut s = k.statistik.clone();
        s.fuellstand = k.eintraege.len() as u32;
        s
    }

    /// Misst die Abweichung vom Frame-Raster bei in-order Pops
    fn jitter_messen(&self, k: &mut JitterKern) {
        let jetzt = Instant::now();
        if let Some(letzter) = k.letzter_pop {
            let delta_us = jetzt.duration_since(letzter).as_micros() as i64;
            let abweichung_us = (delta_us - self.frame_dauer_us as i64).unsigned_abs();

            if k.jitter_fenster.len() >= JITTER_FENSTER {
                k.jitter_fenster.pop_front();
            }
            k.jitter_fenster.push_back(abweichung_us as f32);

            let summe: f32 = k.jitter_fenster.iter().sum();
            k.statistik.jitter_ms = summe / (k.jitter_fenster.len() as f32 * 1000.0);
        }
        k.letzter_pop = Some(jetzt);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
