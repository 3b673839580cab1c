//! Loopback-Demo: Mikrofon -> Opus -> SRTP -> UDP -> zurueck -> Lautsprecher
//!
//! Startet einen minimalen Echo-"Server" auf Loopback, der jedes
//! Voice-Paket an den Absender zurueckschickt, und eine komplette
//! VoiceSession dagegen. Man hoert sich selbst mit der vollen
//! Pipeline-Latenz (Encode, Verschluesselung, Jitter-Buffer).
//!
//! Benoetigt Audio-Hardware. Beenden mit Ctrl-C.

use std::net::UdpSocket;
use std::time::Duration;

use sprechfunk_core::types::{AudioConfig, ChannelId, UserId};
use sprechfunk_crypto::key_exchange::KeyExchange;
use sprechfunk_protocol::codec::OpusConfig;
use sprechfunk_voice::session::{SessionConfig, VoiceSession};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    // Echo-Server: schickt jedes Datagramm an den Absender zurueck
    let server = UdpSocket::bind("127.0.0.1:0")?;
    let server_adresse = server.local_addr()?.to_string();
    std::thread::Builder::new()
        .name("loopback-echo".to_string())
        .spawn(move || {
            let mut puffer = [0u8; 2048];
            loop {
                if let Ok((laenge, absender)) = server.recv_from(&mut puffer) {
                    let _ = server.send_to(&puffer[..laenge], absender);
                }
            }
        })?;

    println!("Echo-Server auf {}", server_adresse);

    let mut session = VoiceSession::neu();
    session.initialisieren(SessionConfig {
        audio: AudioConfig::default(),
        opus: OpusConfig::default(),
        server_adresse,
        user_id: UserId(1),
    })?;

    // SRTP installieren; der Echo-Server reflektiert den Ciphertext
    // unveraendert, die eigene Session kann ihn wieder entschluesseln
    let gegenseite = KeyExchange::neu();
    session.srtp_aus_peer_key(&gegenseite.oeffentlicher_schluessel())?;

    session.starten()?;
    session.kanal_beitreten(ChannelId(1));
    session.set_hot_mic(ChannelId(1));

    println!("Laufend – sprechen Sie ins Mikrofon (Ctrl-C beendet)");

    loop {
        std::thread::sleep(Duration::from_secs(2));
        let s = session.statistik();
        println!(
            "gesendet={} empfangen={} dekodiert={} plc={} jitter={:.1}ms latenz~{:.0}ms",
            s.pakete_gesendet,
            s.pakete_empfangen,
            s.frames_dekodiert,
            s.plc_frames,
            s.jitter_ms,
            s.geschaetzte_latenz_ms
        );
    }
}
