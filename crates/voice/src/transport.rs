//! UDP-Transport fuer Voice-Pakete
//!
//! Ein nicht-persistenter Datagramm-Socket, per `connect` an genau einen
//! Server-Endpunkt gebunden. Senden blockiert nicht nennenswert und wird
//! auf dieser Ebene nicht wiederholt (Voice ist verlusttolerant).
//!
//! Der Empfang laeuft auf einem dedizierten Thread mit kurzem
//! Socket-Timeout (~100 ms), damit `trennen` das Shutdown-Signal
//! beobachten und den Thread begrenzt joinen kann. WouldBlock/TimedOut/
//! ConnectionReset gelten als harmlos und zaehlen keinen Fehler.

use std::io::ErrorKind;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use sprechfunk_protocol::voice::VoicePacket;

use crate::error::{VoiceError, VoiceResult};

/// Empfangspuffer (maximale UDP-Paketgroesse fuer Voice)
const UDP_PUFFER_GROESSE: usize = 2048;

/// Socket-Timeout der Empfangs-Schleife
const EMPFANGS_TIMEOUT: Duration = Duration::from_millis(100);

/// Callback fuer dekodierte Voice-Pakete (laeuft auf dem Empfangs-Thread)
pub type PaketCallback = Box<dyn Fn(VoicePacket) + Send + Sync>;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Transport-Zaehler (atomar, von mehreren Threads beschrieben)
#[derive(Debug, Default)]
struct TransportZaehler {
    pakete_gesendet: AtomicU64,
    pakete_empfangen: AtomicU64,
    sende_fehler: AtomicU64,
    empfangs_fehler: AtomicU64,
    bytes_gesendet: AtomicU64,
    bytes_empfangen: AtomicU64,
}

/// Snapshot der Transport-Statistiken
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStatistik {
    pub pakete_gesendet: u64,
    pub pakete_empfangen: u64,
    pub sende_fehler: u64,
    pub empfangs_fehler: u64,
    pub bytes_gesendet: u64,
    pub bytes_empfangen: u64,
}

// ---------------------------------------------------------------------------
// SendeGriff
// ---------------------------------------------------------------------------

/// Leichtgewichtiger Sende-Handle fuer den Capture-Pfad
///
/// Kann in den Session-Kern geklont werden waehrend der Transport selbst
/// beim Orchestrator bleibt (fuer `trennen`).
#[derive(Clone)]
pub struct SendeGriff {
    socket: Arc<UdpSocket>,
    zaehler: Arc<TransportZaehler>,
}

impl SendeGriff {
    /// Serialisiert und sendet ein Paket; kein Retry auf dieser Ebene
    pub fn paket_senden(&self, paket: &VoicePacket) -> VoiceResult<()> {
        let daten = paket.encode();
        match self.socket.send(&daten) {
            Ok(n) => {
                self.zaehler.pakete_gesendet.fetch_add(1, Ordering::Relaxed);
                self.zaehler
                    .bytes_gesendet
                    .fetch_add(n as u64, Ordering::Relaxed);
                trace!(
                    sequence = paket.header.sequence,
                    bytes = n,
                    "Voice-Paket gesendet"
                );
                Ok(())
            }
            Err(e) => {
                self.zaehler.sende_fehler.fetch_add(1, Ordering::Relaxed);
                Err(VoiceError::Senden(e.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UdpVoiceTransport
// ---------------------------------------------------------------------------

/// UDP-Transport mit dediziertem Empfangs-Thread
pub struct UdpVoiceTransport {
    socket: Option<Arc<UdpSocket>>,
    laeuft: Arc<AtomicBool>,
    empfangs_thread: Option<JoinHandle<()>>,
    callback: Arc<parking_lot::Mutex<Option<PaketCallback>>>,
    zaehler: Arc<TransportZaehler>,
}

impl UdpVoiceTransport {
    /// Erstellt einen unverbundenen Transport
    pub fn neu() -> Self {
        Self {
            socket: None,
            laeuft: Arc::new(AtomicBool::new(false)),
            empfangs_thread: None,
            callback: Arc::new(parking_lot::Mutex::new(None)),
            zaehler: Arc::new(TransportZaehler::default()),
        }
    }

    /// Registriert den Paket-Callback (vor `verbinden` aufrufen)
    pub fn set_paket_callback(&self, callback: PaketCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Verbindet mit dem Server und startet den Empfangs-Thread
    pub fn verbinden(&mut self, server_adresse: &str) -> VoiceResult<()> {
        if self.socket.is_some() {
            return Err(VoiceError::Verbindung("Bereits verbunden".to_string()));
        }

        let ziel = server_adresse
            .to_socket_addrs()
            .map_err(|e| VoiceError::Verbindung(format!("{}: {}", server_adresse, e)))?
            .next()
            .ok_or_else(|| {
                VoiceError::Verbindung(format!("Adresse nicht aufloesbar: {}", server_adresse))
            })?;

        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| VoiceError::Verbindung(e.to_string()))?;
        socket
            .connect(ziel)
            .map_err(|e| VoiceError::Verbindung(e.to_string()))?;
        socket
            .set_read_timeout(Some(EMPFANGS_TIMEOUT))
            .map_err(|e| VoiceError::Verbindung(e.to_string()))?;

        let socket = Arc::new(socket);
        self.laeuft.store(true, Ordering::Release);

        let thread = {
            let socket = Arc::clone(&socket);
            let laeuft = Arc::clone(&self.laeuft);
            let callback = Arc::clone(&self.callback);
            let zaehler = Arc::clone(&self.zaehler);
            std::thread::Builder::new()
                .name("sprechfunk-empfang".to_string())
                .spawn(move || empfangs_schleife(socket, laeuft, callback, zaehler))
                .map_err(|e| VoiceError::Verbindung(e.to_string()))?
        };

        self.socket = Some(socket);
        self.empfangs_thread = Some(thread);
        info!(server = %ziel, "UDP-Voice-Transport verbunden");
        Ok(())
    }

    /// Gibt einen klonbaren Sende-Handle zurueck
    pub fn sende_griff(&self) -> VoiceResult<SendeGriff> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| VoiceError::UngueltigerZustand("Nicht verbunden".to_string()))?;
        Ok(SendeGriff {
            socket: Arc::clone(socket),
            zaehler: Arc::clone(&self.zaehler),
        })
    }

    /// Serialisiert und sendet ein Paket
    pub fn paket_senden(&self, paket: &VoicePacket) -> VoiceResult<()> {
        self.sende_griff()?.paket_senden(paket)
    }

    /// Gibt zurueck ob der Transport verbunden ist
    pub fn ist_verbunden(&self) -> bool {
        self.socket.is_some()
    }

    /// Trennt die Verbindung und joint den Empfangs-Thread (idempotent)
    ///
    /// Kehrt durch das Socket-Timeout innerhalb von ~100 ms zurueck.
    pub fn trennen(&mut self) {
        if self.socket.is_none() {
            return;
        }

        debug!("UDP-Voice-Transport wird getrennt");
        self.laeuft.store(false, Ordering::Release);

        if let Some(thread) = self.empfangs_thread.take() {
            if thread.join().is_err() {
                warn!("Empfangs-Thread ist abgestuerzt");
            }
        }

        self.socket = None;
        info!("UDP-Voice-Transport getrennt");
    }

    /// Snapshot der Transport-Statistiken
    pub fn statistik(&self) -> TransportStatistik {
        TransportStatistik {
            pakete_gesendet: self.zaehler.pakete_gesendet.load(Ordering::Relaxed),
            pakete_empfangen: self.zaehler.pakete_empfangen.load(Ordering::Relaxed),
            sende_fehler: self.zaehler.sende_fehler.load(Ordering::Relaxed),
            empfangs_fehler: self.zaehler.empfangs_fehler.load(Ordering::Relaxed),
            bytes_gesendet: self.zaehler.bytes_gesendet.load(Ordering::Relaxed),
            bytes_empfangen: self.zaehler.bytes_empfangen.load(Ordering::Relaxed),
        }
    }
}

impl Default for UdpVoiceTransport {
    fn default() -> Self {
        Self::neu()
    }
}

impl Drop for UdpVoiceTransport {
    fn drop(&mut self) {
        self.trennen();
    }
}

// ---------------------------------------------------------------------------
// Empfangs-Schleife
// ---------------------------------------------------------------------------

fn empfangs_schleife(
    socket: Arc<UdpSocket>,
    laeuft: Arc<AtomicBool>,
    callback: Arc<parking_lot::Mutex<Option<PaketCallback>>>,
    zaehler: Arc<TransportZaehler>,
) {
    // Stack-Puffer, wird fuer jedes Datagramm wiederverwendet
    let mut puffer = [0u8; UDP_PUFFER_GROESSE];

    debug!("Voice-Empfangs-Schleife gestartet");

    while laeuft.load(Ordering::Acquire) {
        match socket.recv(&mut puffer) {
            Ok(laenge) => {
                zaehler.pakete_empfangen.fetch_add(1, Ordering::Relaxed);
                zaehler
                    .bytes_empfangen
                    .fetch_add(laenge as u64, Ordering::Relaxed);

                match VoicePacket::decode(&puffer[..laenge]) {
                    Ok(paket) => {
                        trace!(
                            sequence = paket.header.sequence,
                            kanal = %paket.header.channel_id,
                            bytes = laenge,
                            "Voice-Paket empfangen"
                        );
                        if let Some(cb) = callback.lock().as_ref() {
                            cb(paket);
                        }
                    }
                    Err(e) => {
                        // Pakete mit falschem Magic o.ae. kommentarlos verwerfen
                        zaehler.empfangs_fehler.fetch_add(1, Ordering::Relaxed);
                        trace!(fehler = %e, "Ungueltiges Voice-Paket verworfen");
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ConnectionReset
                ) =>
            {
                // Timeout/Reset sind im Betrieb und beim Shutdown normal
            }
            Err(e) => {
                if laeuft.load(Ordering::Acquire) {
                    zaehler.empfangs_fehler.fetch_add(1, Ordering::Relaxed);
                    warn!(fehler = %e, "UDP-Empfangsfehler");
                }
            }
        }
    }

    debug!("Voice-Empfangs-Schleife beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_core::types::{ChannelId, UserId};
    use std::sync::mpsc;

    fn test_paket(seq: u64) -> VoicePacket {
        VoicePacket::neu(seq, seq * 20_000, ChannelId(1), UserId(42), vec![0xAB; 60])
    }

    #[test]
    fn senden_erreicht_server() {
        // "Server": einfacher UDP-Socket auf Loopback
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = UdpVoiceTransport::neu();
        transport.verbinden(&server_addr.to_string()).unwrap();

        let paket = test_paket(7);
        transport.paket_senden(&paket).unwrap();

        let mut puffer = [0u8; 2048];
        let (laenge, _) = server.recv_from(&mut puffer).expect("Paket muss ankommen");
        let empfangen = VoicePacket::decode(&puffer[..laenge]).unwrap();
        assert_eq!(empfangen.header.sequence, 7);
        assert_eq!(empfangen.payload, paket.payload);

        assert_eq!(transport.statistik().pakete_gesendet, 1);
        transport.trennen();
    }

    #[test]
    fn empfang_liefert_callback() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = UdpVoiceTransport::neu();
        let (tx, rx) = mpsc::channel();
        transport.set_paket_callback(Box::new(move |paket| {
            let _ = tx.send(paket);
        }));
        transport.verbinden(&server_addr.to_string()).unwrap();

        // Server antwortet an die Client-Adresse: erst ein Paket vom
        // Client abwarten um die Adresse zu lernen
        transport.paket_senden(&test_paket(1)).unwrap();
        let mut puffer = [0u8; 2048];
        let (_, client_addr) = server.recv_from(&mut puffer).unwrap();

        let antwort = test_paket(99);
        server.send_to(&antwort.encode(), client_addr).unwrap();

        let empfangen = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("Callback muss feuern");
        assert_eq!(empfangen.header.sequence, 99);
        assert_eq!(transport.statistik().pakete_empfangen, 1);

        transport.trennen();
    }

    #[test]
    fn ungueltige_pakete_zaehlen_fehler() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = UdpVoiceTransport::neu();
        transport.verbinden(&server_addr.to_string()).unwrap();

        transport.paket_senden(&test_paket(1)).unwrap();
        let mut puffer = [0u8; 2048];
        let (_, client_addr) = server.recv_from(&mut puffer).unwrap();

        // Muell mit falschem Magic
        server.send_to(&[0xFFu8; 40], client_addr).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(transport.statistik().empfangs_fehler, 1);
        transport.trennen();
    }

    #[test]
    fn trennen_ist_begrenzt_und_idempotent() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = UdpVoiceTransport::neu();
        transport.verbinden(&server_addr.to_string()).unwrap();

        let start = std::time::Instant::now();
        transport.trennen();
        assert!(
            start.elapsed() < Duration::from_millis(500),
            "Trennen muss durch das Socket-Timeout begrenzt sein"
        );

        assert!(!transport.ist_verbunden());
        transport.trennen(); // Zweiter Aufruf ist harmlos
    }

    #[test]
    fn doppeltes_verbinden_fehler() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = UdpVoiceTransport::neu();
        transport.verbinden(&server_addr.to_string()).unwrap();
        assert!(transport.verbinden(&server_addr.to_string()).is_err());
        transport.trennen();
    }

    #[test]
    fn sende_griff_ueberlebt_unabhaengig() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = UdpVoiceTransport::neu();
        transport.verbinden(&server_addr.to_string()).unwrap();
        let griff = transport.sende_griff().unwrap();

        griff.paket_senden(&test_paket(3)).unwrap();
        let mut puffer = [0u8; 2048];
        assert!(server.recv_from(&mut puffer).is_ok());

        transport.trennen();
    }

    #[test]
    fn unaufloesbare_adresse_fehler() {
        let mut transport = UdpVoiceTransport::neu();
        assert!(transport
            .verbinden("definitiv.kein.host.sprechfunk:9001")
            .is_err());
        assert!(!transport.ist_verbunden());
    }
}
