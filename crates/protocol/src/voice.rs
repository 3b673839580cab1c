//! Voice-Protokoll (UDP)
//!
//! Definiert die binaere Paketstruktur fuer die Audio-Uebertragung via UDP.
//! Das Opus-Encoding erfolgt im Client; der Server leitet Pakete nur weiter.
//!
//! ## Paketformat (Header = 28 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   Magic = 0x564F4950 ('VOIP', big-endian)
//!  4       8   SequenzNummer (big-endian, monoton pro Absender)
//! 12       8   Zeitstempel in Mikrosekunden (big-endian, Absender-Epoche)
//! 20       4   Kanal-ID (big-endian)
//! 24       4   Benutzer-ID (big-endian)
//! 28+      N   Nutzdaten (SRTP-verschluesselt oder rohe Opus-Bytes)
//! ```
//!
//! Pakete mit falschem Magic werden kommentarlos verworfen.

use std::io;

use sprechfunk_core::types::{ChannelId, UserId};

/// Protokoll-Kennung 'VOIP' (big-endian)
pub const VOICE_PACKET_MAGIC: u32 = 0x564F_4950;

/// Maximale Nutzdaten-Laenge: Opus-MTU (1280) + SRTP-Rahmen (4 + 16)
pub const MAX_NUTZDATEN_LAENGE: usize = 1300;

// ---------------------------------------------------------------------------
// VoicePacketHeader
// ---------------------------------------------------------------------------

/// 28-Byte Header eines Voice-UDP-Pakets
///
/// Direkte Byte-Serialisierung, kein serde (Performance-kritisch, und das
/// Layout muss bitgenau zum Server passen).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePacketHeader {
    /// Muss == `VOICE_PACKET_MAGIC` sein
    pub magic: u32,
    /// Monoton steigende Sequenznummer (fuer Jitter-Buffer und Replay-Schutz)
    pub sequence: u64,
    /// Sende-Zeitstempel in Mikrosekunden seit Absender-Epoche
    pub timestamp_us: u64,
    /// Ziel- bzw. Quell-Kanal
    pub channel_id: ChannelId,
    /// Absender
    pub user_id: UserId,
}

impl VoicePacketHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 28;

    /// Erstellt einen neuen Header mit korrektem Magic
    pub fn neu(sequence: u64, timestamp_us: u64, channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            magic: VOICE_PACKET_MAGIC,
            sequence,
            timestamp_us,
            channel_id,
            user_id,
        }
    }

    /// Serialisiert den Header in ein 28-Byte-Array (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..12].copy_from_slice(&self.sequence.to_be_bytes());
        buf[12..20].copy_from_slice(&self.timestamp_us.to_be_bytes());
        buf[20..24].copy_from_slice(&self.channel_id.inner().to_be_bytes());
        buf[24..28].copy_from_slice(&self.user_id.inner().to_be_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 28 Bytes ist
    /// - `InvalidData` bei falschem Magic
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::SIZE
                ),
            ));
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != VOICE_PACKET_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Falsches Magic: {:#010x}", magic),
            ));
        }

        let sequence = u64::from_be_bytes(buf[4..12].try_into().unwrap());
        let timestamp_us = u64::from_be_bytes(buf[12..20].try_into().unwrap());
        let channel_id = u32::from_be_bytes(buf[20..24].try_into().unwrap());
        let user_id = u32::from_be_bytes(buf[24..28].try_into().unwrap());

        Ok(Self {
            magic,
            sequence,
            timestamp_us,
            channel_id: ChannelId(channel_id),
            user_id: UserId(user_id),
        })
    }
}

// ---------------------------------------------------------------------------
// VoicePacket
// ---------------------------------------------------------------------------

/// Vollstaendiges Voice-UDP-Paket (Header + Nutzdaten)
///
/// Die Nutzdaten sind entweder SRTP-verschluesselt
/// (`[seq_be(4) | ciphertext | tag(16)]`) oder – im Entwicklungsmodus
/// ohne installierte SRTP-Session – rohe Opus-Bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePacket {
    /// 28-Byte Header
    pub header: VoicePacketHeader,
    /// Nutzdaten (max. `MAX_NUTZDATEN_LAENGE` Bytes)
    pub payload: Vec<u8>,
}

impl VoicePacket {
    /// Erstellt ein Audio-Paket
    pub fn neu(
        sequence: u64,
        timestamp_us: u64,
        channel_id: ChannelId,
        user_id: UserId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: VoicePacketHeader::neu(sequence, timestamp_us, channel_id, user_id),
            payload,
        }
    }

    /// Erstellt ein Praesenz-Paket (1 Null-Byte, niemals verschluesselt)
    ///
    /// Registriert die UDP-Quelladresse des Clients beim Server, damit
    /// Voice-Pakete fuer den Kanal zugestellt werden koennen.
    pub fn neu_praesenz(
        sequence: u64,
        timestamp_us: u64,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Self {
        Self {
            header: VoicePacketHeader::neu(sequence, timestamp_us, channel_id, user_id),
            payload: vec![0u8],
        }
    }

    /// Serialisiert das gesamte Paket in einen Byte-Vec
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VoicePacketHeader::SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialisiert ein Paket aus einem Byte-Slice und validiert es
    ///
    /// # Fehler
    /// - Header-Validierungsfehler (Laenge, Magic)
    /// - Nutzdaten ueberschreiten `MAX_NUTZDATEN_LAENGE`
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let header = VoicePacketHeader::decode(buf)?;
        let payload_bytes = &buf[VoicePacketHeader::SIZE..];

        if payload_bytes.len() > MAX_NUTZDATEN_LAENGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nutzdaten zu lang: {} Bytes (Maximum {})",
                    payload_bytes.len(),
                    MAX_NUTZDATEN_LAENGE
                ),
            ));
        }

        Ok(Self {
            header,
            payload: payload_bytes.to_vec(),
        })
    }

    /// Gesamtgroesse des Paketes in Bytes
    pub fn groesse(&self) -> usize {
        VoicePacketHeader::SIZE + self.payload.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
