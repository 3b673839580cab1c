//! Lautstaerke-Kontrolle fuer das Playback-Mixing
//!
//! Verwaltet Master-Lautstaerke und per-Kanal-Lautstaerke mit sanften
//! Uebergaengen (keine Klicks beim Regeln). Die Verstaerkung wird pro
//! Kanal VOR der additiven Mischung angewendet; die harte Begrenzung auf
//! [-1, 1] passiert erst beim Mischen selbst.

use std::collections::BTreeMap;

use sprechfunk_core::types::ChannelId;

/// Glaettungskoeffizient fuer Lautstaerke-Uebergaenge (pro Frame)
const GLAETTUNG: f32 = 0.9;

/// Maximale Verstaerkung (2.0 = +6 dB)
const MAX_VERSTAERKUNG: f32 = 2.0;

/// Lautstaerke-Kontroller fuer das Playback-Mixing
///
/// Nicht thread-safe; die Session kapselt ihn in ihrer eigenen Mutex.
pub struct VolumeController {
    /// Aktuelle Master-Lautstaerke (0.0..2.0, 1.0 = normal)
    master: f32,
    /// Ziel-Master-Lautstaerke (sanfter Uebergang)
    master_ziel: f32,
    /// Aktuelle per-Kanal-Lautstaerke
    kanal_pegel: BTreeMap<ChannelId, f32>,
    /// Ziel-Lautstaerke pro Kanal
    kanal_ziele: BTreeMap<ChannelId, f32>,
}

impl VolumeController {
    /// Erstellt einen Kontroller mit Normal-Lautstaerke ueberall
    pub fn neu() -> Self {
        Self {
            master: 1.0,
            master_ziel: 1.0,
            kanal_pegel: BTreeMap::new(),
            kanal_ziele: BTreeMap::new(),
        }
    }

    /// Setzt die Master-Lautstaerke (sanfter Uebergang)
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_ziel = volume.clamp(0.0, MAX_VERSTAERKUNG);
    }

    /// Gibt die aktuelle Master-Lautstaerke zurueck
    pub fn master_volume(&self) -> f32 {
        self.master
    }

    /// Setzt die Lautstaerke eines Kanals (sanfter Uebergang)
    pub fn set_kanal_volume(&mut self, kanal: ChannelId, volume: f32) {
        let v = volume.clamp(0.0, MAX_VERSTAERKUNG);
        self.kanal_ziele.insert(kanal, v);
        // Erster Eintrag: direkt setzen, damit es beim ersten Frame
        // keinen Sprung von 1.0 aus gibt
        self.kanal_pegel.entry(kanal).or_insert(v);
    }

    /// Gibt die aktuelle Lautstaerke eines Kanals zurueck (1.0 wenn unbekannt)
    pub fn kanal_volume(&self, kanal: ChannelId) -> f32 {
        self.kanal_pegel.get(&kanal).copied().unwrap_or(1.0)
    }

    /// Entfernt einen Kanal (beim Verlassen)
    pub fn kanal_entfernen(&mut self, kanal: ChannelId) {
        self.kanal_pegel.remove(&kanal);
        self.kanal_ziele.remove(&kanal);
    }

    /// Entfernt alle Kanal-Eintraege; die Master-Lautstaerke bleibt
    pub fn kanaele_leeren(&mut self) {
        self.kanal_pegel.clear();
        self.kanal_ziele.clear();
    }

    /// Wendet Master- und Kanal-Verstaerkung auf einen Frame an
    ///
    /// Glaettet dabei die Uebergaenge Richtung Zielwert.
    pub fn anwenden(&mut self, kanal: ChannelId, samples: &mut [f32]) {
        self.master = GLAETTUNG * self.master + (1.0 - GLAETTUNG) * self.master_ziel;

        let ziel = self.kanal_ziele.get(&kanal).copied().unwrap_or(1.0);
        let pegel = self.kanal_pegel.entry(kanal).or_insert(ziel);
        *pegel = GLAETTUNG * *pegel + (1.0 - GLAETTUNG) * ziel;

        let verstaerkung = self.master * *pegel;
        if (verstaerkung - 1.0).abs() < 1e-3 {
            return; // Neutral: nichts zu tun
        }
        for s in samples.iter_mut() {
            *s *= verstaerkung;
        }
    }
}

impl Default for VolumeController {
    fn default() -> Self {
        Self::neu()
    }
}
