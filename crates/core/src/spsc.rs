//! Wait-free Single-Producer/Single-Consumer Queues
//!
//! Zwei Varianten fuer den Austausch zwischen Echtzeit- und
//! Arbeiter-Threads:
//! - [`SpscQueue`] – generischer Ring fuer beliebige `T`
//! - [`AudioFrameQueue`] – Ring fuer Audio-Frames fester Laenge
//!   (ohne Allokation pro Frame)
//!
//! ## Vertrag
//! Genau EIN Produzenten-Thread und EIN Konsumenten-Thread. Wird der
//! Vertrag verletzt, gelten die Memory-Order-Garantien nicht mehr.
//!
//! ## Implementierung
//! Ring mit N+1 Slots; ein Sentinel-Slot unterscheidet voll von leer.
//! Der Produzent publiziert mit Release auf dem Tail-Index, der
//! Konsument liest mit Acquire – damit ist der Slot-Inhalt sichtbar
//! bevor der Index-Fortschritt beobachtet wird. Kopf- und Tail-Index
//! liegen via `CachePadded` auf getrennten Cache-Lines (kein False
//! Sharing). Nach der Konstruktion: keine Allokation, keine Syscalls.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

// ---------------------------------------------------------------------------
// SpscQueue – generische Variante
// ---------------------------------------------------------------------------

/// Wait-free SPSC-Ring fuer beliebige Elemente
pub struct SpscQueue<T> {
    /// Anzahl Slots inkl. Sentinel
    slots: usize,
    puffer: Box<[UnsafeCell<T>]>,
    kopf: CachePadded<AtomicUsize>,
    schwanz: CachePadded<AtomicUsize>,
}

// Sicherheit: Produzent und Konsument greifen nie auf denselben Slot zu
// (Index-Protokoll), daher reicht T: Send.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T: Default> SpscQueue<T> {
    /// Erstellt eine Queue mit Platz fuer `kapazitaet` Elemente
    ///
    /// Allokiert einmalig `kapazitaet + 1` Slots (Sentinel).
    pub fn neu(kapazitaet: usize) -> Self {
        let slots = kapazitaet + 1;
        let puffer = (0..slots)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            puffer,
            kopf: CachePadded::new(AtomicUsize::new(0)),
            schwanz: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Legt ein Element ein (Produzenten-Seite)
    ///
    /// Gibt das Element zurueck wenn die Queue voll ist – ohne
    /// Seiteneffekt. Wait-free, keine Allokation.
    pub fn try_push(&self, wert: T) -> std::result::Result<(), T> {
        let schwanz = self.schwanz.load(Ordering::Relaxed);
        let naechster = self.naechster(schwanz);

        if naechster == self.kopf.load(Ordering::Acquire) {
            return Err(wert); // Queue voll
        }

        // Sicherheit: Nur der Produzent schreibt Slot `schwanz`; der
        // Konsument liest ihn erst nach dem Release-Store unten.
        unsafe {
            *self.puffer[schwanz].get() = wert;
        }
        self.schwanz.store(naechster, Ordering::Release);
        Ok(())
    }

    /// Entnimmt ein Element (Konsumenten-Seite)
    ///
    /// Gibt `None` zurueck wenn die Queue leer ist. Wait-free.
    pub fn try_pop(&self) -> Option<T> {
        let kopf = self.kopf.load(Ordering::Relaxed);

        if kopf == self.schwanz.load(Ordering::Acquire) {
            return None; // Queue leer
        }

        // Sicherheit: Nur der Konsument liest Slot `kopf`; der Produzent
        // schreibt ihn erst wieder nachdem der Kopf-Index weitergerueckt ist.
        let wert = unsafe { std::mem::take(&mut *self.puffer[kopf].get()) };
        self.kopf.store(self.naechster(kopf), Ordering::Release);
        Some(wert)
    }

    /// Prueft ob die Queue leer ist
    pub fn ist_leer(&self) -> bool {
        self.kopf.load(Ordering::Acquire) == self.schwanz.load(Ordering::Acquire)
    }

    /// Prueft ob die Queue voll ist
    pub fn ist_voll(&self) -> bool {
        let naechster = self.naechster(self.schwanz.load(Ordering::Acquire));
        naechster == self.kopf.load(Ordering::Acquire)
    }

    /// Ungefaehre Anzahl enthaltener Elemente (kann veraltet sein)
    pub fn laenge(&self) -> usize {
        let kopf = self.kopf.load(Ordering::Acquire);
        let schwanz = self.schwanz.load(Ordering::Acquire);
        if schwanz >= kopf {
            schwanz - kopf
        } else {
            self.slots - kopf + schwanz
        }
    }

    /// Nutzbare Kapazitaet (ohne Sentinel-Slot)
    pub fn kapazitaet(&self) -> usize {
        self.slots - 1
    }

    fn naechster(&self, idx: usize) -> usize {
        (idx + 1) % self.slots
    }
}

// ---------------------------------------------------------------------------
// AudioFrameQueue – Frames fester Laenge
// ---------------------------------------------------------------------------

/// Wait-free SPSC-Ring fuer Audio-Frames fester Laenge
///
/// Die Samples liegen in einem flachen, vorallokierten Block; push und
/// pop kopieren genau einen Frame. Ideal zwischen cpal-Callback und
/// Frame-Arbeiter.
pub struct AudioFrameQueue {
    frame_groesse: usize,
    /// Anzahl Slots inkl. Sentinel
    slots: usize,
    daten: UnsafeCell<Box<[f32]>>,
    kopf: CachePadded<AtomicUsize>,
    schwanz: CachePadded<AtomicUsize>,
}

// Sicherheit: Produzent schreibt nur Slot `schwanz`, Konsument liest nur
// Slot `kopf` – die Slot-Bereiche ueberlappen nie (Index-Protokoll).
unsafe impl Send for AudioFrameQueue {}
unsafe impl Sync for AudioFrameQueue {}

impl AudioFrameQueue {
    /// Erstellt eine Queue fuer `kapazitaet` Frames zu je `frame_groesse` Samples
    pub fn neu(kapazitaet: usize, frame_groesse: usize) -> Self {
        let slots = kapazitaet + 1;
        Self {
            frame_groesse,
            slots,
            daten: UnsafeCell::new(vec![0.0f32; slots * frame_groesse].into_boxed_slice()),
            kopf: CachePadded::new(AtomicUsize::new(0)),
            schwanz: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Legt einen Frame ein (Produzenten-Seite)
    ///
    /// Gibt `false` zurueck bei voller Queue oder falscher Frame-Laenge.
    pub fn try_push(&self, frame: &[f32]) -> bool {
        if frame.len() != self.frame_groesse {
            return false;
        }

        let schwanz = self.schwanz.load(Ordering::Relaxed);
        let naechster = (schwanz + 1) % self.slots;

        if naechster == self.kopf.load(Ordering::Acquire) {
            return false; // Queue voll
        }

        let basis = schwanz * self.frame_groesse;
        // Sicherheit: Slot `schwanz` gehoert exklusiv dem Produzenten
        // bis zum Release-Store.
        unsafe {
            let daten = &mut *self.daten.get();
            daten[basis..basis + self.frame_groesse].copy_from_slice(frame);
        }
        self.schwanz.store(naechster, Ordering::Release);
        true
    }

    /// Entnimmt einen Frame (Konsumenten-Seite)
    ///
    /// Gibt `false` zurueck bei leerer Queue oder falscher Ziel-Laenge.
    pub fn try_pop(&self, ziel: &mut [f32]) -> bool {
        if ziel.len() != self.frame_groesse {
            return false;
        }

        let kopf = self.kopf.load(Ordering::Relaxed);

        if kopf == self.schwanz.load(Ordering::Acquire) {
            return false; // Queue leer
        }

        let basis = kopf * self.frame_groesse;
        // Sicherheit: Slot `kopf` gehoert exklusiv dem Konsumenten
        // bis zum Release-Store.
        unsafe {
            let daten = &*self.daten.get();
            ziel.copy_from_slice(&daten[basis..basis + self.frame_groesse]);
        }
        self.kopf.store((kopf + 1) % self.slots, Ordering::Release);
        true
    }

    /// Prueft ob die Queue leer ist
    pub fn ist_leer(&self) -> bool {
        self.kopf.load(Ordering::Acquire) == self.schwanz.load(Ordering::Acquire)
    }

    /// Prueft ob die Queue voll ist
    pub fn ist_voll(&self) -> bool {
        let naechster = (self.schwanz.load(Ordering::Acquire) + 1) % self.slots;
        naechster == self.kopf.load(Ordering::Acquire)
    }

    /// Ungefaehre Anzahl enthaltener Frames
    pub fn laenge(&self) -> usize {
        let kopf = self.kopf.load(Ordering::Acquire);
        let schwanz = self.schwanz.load(Ordering::Acquire);
        if schwanz >= kopf {
            schwanz - kopf
        } else {
            self.slots - kopf + schwanz
        }
    }

    /// Samples pro Frame
    pub fn frame_groesse(&self) -> usize {
        self.frame_groesse
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
