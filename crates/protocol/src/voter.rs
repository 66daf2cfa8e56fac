//! Voter-Protokoll (UDP)
//!
//! Definiert die binaere Paketstruktur zwischen Empfaengern und Engine.
//! Alle Felder in Netzwerk-Byte-Reihenfolge, kein serde.
//!
//! ## Paketformat (Header = 24 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   Zeitstempel Sekunden
//!  4       4   Zeitstempel Nanosekunden
//!  8      10   Challenge (NUL-aufgefuellt)
//! 18       4   Digest
//! 22       2   Payload-Typ (0 = keiner, 1 = mu-law, 2 = GPS)
//! 24+      N   Nutzdaten
//! ```
//!
//! Nutzdaten:
//! - Typ 0: optional ein Options-/Flag-Byte
//! - Typ 1: RSSI (1) + 160 mu-law Samples, exakte Laenge
//! - Typ 2: leer (Keepalive) oder Breite (9) + Laenge (10) + Hoehe (6/7), ASCII

use bytes::{Buf, BufMut, BytesMut};
use chrono::Utc;
use thiserror::Error;
use votebridge_core::VoterError;

use crate::digest::{Challenge, CHALLENGE_LAENGE};

/// Samples pro Audio-Frame (20 ms bei 8 kHz)
pub const FRAME_GROESSE: usize = 160;

/// Samples pro Millisekunde
pub const SAMPLES_PRO_MS: usize = 8;

/// Dauer eines Samples in Nanosekunden
pub const NS_PRO_SAMPLE: i64 = 125_000;

/// mu-law Stille
pub const STILLE: u8 = 0xFF;

/// Ein Audio-Frame
pub type Frame = [u8; FRAME_GROESSE];

const GPS_BREITE: usize = 9;
const GPS_LAENGE: usize = 10;
const GPS_HOEHE: usize = 6;

/// Flag-Byte der Auth-Antwort: Client liefert den Master-Takt
pub const OPTION_MASTER: u8 = 0x02 | 0x08;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Gruende, aus denen ein Paket verworfen wird
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaketFehler {
    #[error("Paket zu kurz: {laenge} Bytes (Header braucht {})", VoterHeader::SIZE)]
    ZuKurz { laenge: usize },

    #[error("Falsche Laenge fuer {typ:?}: {laenge} Bytes")]
    FalscheLaenge { typ: PayloadTyp, laenge: usize },

    #[error("Unbekannter Payload-Typ: {0}")]
    UnbekannterTyp(u16),
}

impl From<PaketFehler> for VoterError {
    fn from(e: PaketFehler) -> Self {
        VoterError::Paket(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// VoterZeit
// ---------------------------------------------------------------------------

/// Zeitstempel (Sekunden, Nanosekunden) wie im Header uebertragen
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VoterZeit {
    pub sekunden: u32,
    pub nanosekunden: u32,
}

impl VoterZeit {
    pub fn neu(sekunden: u32, nanosekunden: u32) -> Self {
        Self {
            sekunden,
            nanosekunden,
        }
    }

    /// Aktuelle Wanduhrzeit
    pub fn jetzt() -> Self {
        let now = Utc::now();
        Self {
            sekunden: now.timestamp() as u32,
            nanosekunden: now.timestamp_subsec_nanos(),
        }
    }

    /// Gesamtzeit in Nanosekunden
    pub fn als_nanos(&self) -> i64 {
        self.sekunden as i64 * 1_000_000_000 + self.nanosekunden as i64
    }

    /// Erstellt eine Zeit aus Nanosekunden (negative Werte werden zu 0)
    pub fn aus_nanos(nanos: i64) -> Self {
        let nanos = nanos.max(0);
        Self {
            sekunden: (nanos / 1_000_000_000) as u32,
            nanosekunden: (nanos % 1_000_000_000) as u32,
        }
    }

    /// Verschiebt um `ms` Millisekunden (auch negativ)
    pub fn plus_ms(&self, ms: i64) -> Self {
        Self::aus_nanos(self.als_nanos() + ms * 1_000_000)
    }

    /// Abstand `self - andere` in Nanosekunden
    pub fn differenz_ns(&self, andere: &VoterZeit) -> i64 {
        self.als_nanos() - andere.als_nanos()
    }
}

// ---------------------------------------------------------------------------
// PayloadTyp
// ---------------------------------------------------------------------------

/// Art der Nutzdaten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PayloadTyp {
    /// Authentifizierung / Keepalive
    Keiner = 0,
    /// mu-law Audio mit RSSI
    Ulaw = 1,
    /// GPS-Position oder Keepalive
    Gps = 2,
}

impl PayloadTyp {
    pub fn from_u16(wert: u16) -> Option<Self> {
        match wert {
            0 => Some(Self::Keiner),
            1 => Some(Self::Ulaw),
            2 => Some(Self::Gps),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// VoterHeader
// ---------------------------------------------------------------------------

/// 24-Byte Header eines Voter-Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoterHeader {
    pub zeit: VoterZeit,
    pub challenge: Challenge,
    pub digest: u32,
    pub payload_typ: PayloadTyp,
}

impl VoterHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 24;

    pub fn neu(zeit: VoterZeit, challenge: Challenge, digest: u32, payload_typ: PayloadTyp) -> Self {
        Self {
            zeit,
            challenge,
            digest,
            payload_typ,
        }
    }

    /// Serialisiert den Header in ein 24-Byte-Array
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut ziel = &mut buf[..];
        self.schreiben(&mut ziel);
        buf
    }

    /// Haengt die 24 Header-Bytes an `buf` an
    pub fn schreiben<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.zeit.sekunden);
        buf.put_u32(self.zeit.nanosekunden);
        buf.put_slice(self.challenge.als_feld());
        buf.put_u32(self.digest);
        buf.put_u16(self.payload_typ as u16);
    }

    /// Deserialisiert einen Header
    ///
    /// # Fehler
    /// - `ZuKurz` wenn weniger als 24 Bytes vorliegen
    /// - `UnbekannterTyp` bei Payload-Typen ausser 0, 1, 2
    pub fn decode(mut buf: &[u8]) -> Result<Self, PaketFehler> {
        if buf.len() < Self::SIZE {
            return Err(PaketFehler::ZuKurz { laenge: buf.len() });
        }

        let sekunden = buf.get_u32();
        let nanosekunden = buf.get_u32();
        let challenge = Challenge::aus_bytes(&buf[..CHALLENGE_LAENGE]);
        buf.advance(CHALLENGE_LAENGE);
        let digest = buf.get_u32();
        let roh_typ = buf.get_u16();
        let payload_typ = PayloadTyp::from_u16(roh_typ).ok_or(PaketFehler::UnbekannterTyp(roh_typ))?;

        Ok(Self {
            zeit: VoterZeit::neu(sekunden, nanosekunden),
            challenge,
            digest,
            payload_typ,
        })
    }
}

// ---------------------------------------------------------------------------
// GPS
// ---------------------------------------------------------------------------

/// Positionsmeldung eines Empfaengers (ASCII-Felder, unveraendert)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsFix {
    pub breite: String,
    pub laenge: String,
    pub hoehe: String,
}

impl GpsFix {
    fn aus_bytes(daten: &[u8]) -> Self {
        let feld = |b: &[u8]| {
            String::from_utf8_lossy(b)
                .trim_end_matches('\0')
                .trim()
                .to_string()
        };
        Self {
            breite: feld(&daten[..GPS_BREITE]),
            laenge: feld(&daten[GPS_BREITE..GPS_BREITE + GPS_LAENGE]),
            hoehe: feld(&daten[GPS_BREITE + GPS_LAENGE..]),
        }
    }

    fn schreiben(&self, buf: &mut BytesMut) {
        for (text, breite) in [
            (&self.breite, GPS_BREITE),
            (&self.laenge, GPS_LAENGE),
            (&self.hoehe, GPS_HOEHE),
        ] {
            let mut feld = vec![0u8; breite];
            let n = text.len().min(breite);
            feld[..n].copy_from_slice(&text.as_bytes()[..n]);
            buf.put_slice(&feld);
        }
    }
}

// ---------------------------------------------------------------------------
// VoterPaket
// ---------------------------------------------------------------------------

/// Nutzdaten eines Voter-Pakets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nutzdaten {
    /// Handshake / Keepalive, optional mit Flag-Byte
    Keine { optionen: Option<u8> },
    /// Ein Audio-Frame mit Signalstaerke
    Audio { rssi: u8, audio: Frame },
    /// GPS-Position, `None` = reines Keepalive
    Gps(Option<GpsFix>),
}

/// Vollstaendiges Voter-Paket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterPaket {
    pub header: VoterHeader,
    pub nutzdaten: Nutzdaten,
}

impl VoterPaket {
    /// Auth-/Zeit-Antwort der Engine (Typ 0 mit Flag-Byte)
    pub fn auth_antwort(zeit: VoterZeit, challenge: Challenge, digest: u32, flags: u8) -> Self {
        Self {
            header: VoterHeader::neu(zeit, challenge, digest, PayloadTyp::Keiner),
            nutzdaten: Nutzdaten::Keine {
                optionen: Some(flags),
            },
        }
    }

    /// Audio-Paket (Typ 1)
    pub fn audio(zeit: VoterZeit, challenge: Challenge, digest: u32, rssi: u8, audio: Frame) -> Self {
        Self {
            header: VoterHeader::neu(zeit, challenge, digest, PayloadTyp::Ulaw),
            nutzdaten: Nutzdaten::Audio { rssi, audio },
        }
    }

    /// Header-only Keepalive (Typ 2 ohne Nutzdaten)
    pub fn keepalive(zeit: VoterZeit, challenge: Challenge, digest: u32) -> Self {
        Self {
            header: VoterHeader::neu(zeit, challenge, digest, PayloadTyp::Gps),
            nutzdaten: Nutzdaten::Gps(None),
        }
    }

    /// Serialisiert das Paket
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(VoterHeader::SIZE + 1 + FRAME_GROESSE);
        self.header.schreiben(&mut buf);
        match &self.nutzdaten {
            Nutzdaten::Keine { optionen } => {
                if let Some(flags) = optionen {
                    buf.put_u8(*flags);
                }
            }
            Nutzdaten::Audio { rssi, audio } => {
                buf.put_u8(*rssi);
                buf.put_slice(audio);
            }
            Nutzdaten::Gps(Some(fix)) => fix.schreiben(&mut buf),
            Nutzdaten::Gps(None) => {}
        }
        buf.to_vec()
    }

    /// Deserialisiert und validiert ein Paket
    ///
    /// Die Laenge muss exakt zum Payload-Typ passen; alles andere wird
    /// als `FalscheLaenge` abgelehnt.
    pub fn decode(buf: &[u8]) -> Result<Self, PaketFehler> {
        let header = VoterHeader::decode(buf)?;
        let rest = &buf[VoterHeader::SIZE..];

        let nutzdaten = match header.payload_typ {
            PayloadTyp::Keiner => Nutzdaten::Keine {
                optionen: rest.first().copied(),
            },
            PayloadTyp::Ulaw => {
                if rest.len() != FRAME_GROESSE + 1 {
                    return Err(PaketFehler::FalscheLaenge {
                        typ: PayloadTyp::Ulaw,
                        laenge: buf.len(),
                    });
                }
                let mut audio = [STILLE; FRAME_GROESSE];
                audio.copy_from_slice(&rest[1..]);
                Nutzdaten::Audio {
                    rssi: rest[0],
                    audio,
                }
            }
            PayloadTyp::Gps => {
                let fix_laenge = GPS_BREITE + GPS_LAENGE + GPS_HOEHE;
                match rest.len() {
                    0 => Nutzdaten::Gps(None),
                    n if n == fix_laenge || n == fix_laenge + 1 => {
                        Nutzdaten::Gps(Some(GpsFix::aus_bytes(rest)))
                    }
                    _ => {
                        return Err(PaketFehler::FalscheLaenge {
                            typ: PayloadTyp::Gps,
                            laenge: buf.len(),
                        })
                    }
                }
            }
        };

        Ok(Self { header, nutzdaten })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn zeit() -> VoterZeit {
        VoterZeit::neu(1_700_000_000, 120_000_000)
    }

    #[test]
    fn header_layout_ist_big_endian() {
        let header = VoterHeader::neu(
            VoterZeit::neu(0x0102_0304, 0x0506_0708),
            Challenge::aus_str("abc"),
            0xDEAD_BEEF,
            PayloadTyp::Ulaw,
        );
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..8], &[5, 6, 7, 8]);
        assert_eq!(&bytes[8..11], b"abc");
        assert_eq!(&bytes[11..18], &[0; 7]);
        assert_eq!(&bytes[18..22], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&bytes[22..24], &[0, 1]);
    }

    #[test]
    fn header_schreiben_haengt_an() {
        let header = VoterHeader::neu(zeit(), Challenge::aus_str("srv"), 0x0102_0304, PayloadTyp::Gps);
        let mut buf = BytesMut::new();
        buf.put_u8(0xAA);
        header.schreiben(&mut buf);

        assert_eq!(buf.len(), 1 + VoterHeader::SIZE);
        assert_eq!(buf[0], 0xAA);
        assert_eq!(&buf[1..], &header.encode()[..]);
        assert_eq!(VoterHeader::decode(&buf[1..]).unwrap(), header);
    }

    #[test]
    fn audio_paket_dekodieren() {
        let mut audio = [0u8; FRAME_GROESSE];
        audio[0] = 0x11;
        audio[159] = 0x22;
        let paket = VoterPaket::audio(zeit(), Challenge::aus_str("x"), 7, 200, audio);
        let bytes = paket.encode();
        assert_eq!(bytes.len(), VoterHeader::SIZE + 161);

        let dekodiert = VoterPaket::decode(&bytes).unwrap();
        assert_eq!(dekodiert.header.zeit, zeit());
        match dekodiert.nutzdaten {
            Nutzdaten::Audio { rssi, audio } => {
                assert_eq!(rssi, 200);
                assert_eq!(audio[0], 0x11);
                assert_eq!(audio[159], 0x22);
            }
            andere => panic!("Audio erwartet, erhalten: {andere:?}"),
        }
    }

    #[test]
    fn audio_mit_falscher_laenge_abgelehnt() {
        let paket = VoterPaket::audio(zeit(), Challenge::default(), 1, 1, [0; FRAME_GROESSE]);
        let mut bytes = paket.encode();
        bytes.pop();
        assert!(matches!(
            VoterPaket::decode(&bytes),
            Err(PaketFehler::FalscheLaenge { typ: PayloadTyp::Ulaw, .. })
        ));
        bytes.extend_from_slice(&[0, 0]);
        assert!(VoterPaket::decode(&bytes).is_err());
    }

    #[test]
    fn zu_kurzer_header_abgelehnt() {
        assert_eq!(
            VoterPaket::decode(&[0u8; 23]),
            Err(PaketFehler::ZuKurz { laenge: 23 })
        );
    }

    #[test]
    fn unbekannter_typ_abgelehnt() {
        let mut bytes = VoterHeader::neu(zeit(), Challenge::default(), 1, PayloadTyp::Keiner)
            .encode()
            .to_vec();
        bytes[23] = 4;
        assert_eq!(VoterPaket::decode(&bytes), Err(PaketFehler::UnbekannterTyp(4)));
    }

    #[test]
    fn gps_keepalive_und_fix() {
        let keepalive = VoterPaket::keepalive(zeit(), Challenge::aus_str("c"), 9).encode();
        assert_eq!(keepalive.len(), VoterHeader::SIZE);
        assert_eq!(
            VoterPaket::decode(&keepalive).unwrap().nutzdaten,
            Nutzdaten::Gps(None)
        );

        let mut fix = keepalive.clone();
        fix.extend_from_slice(b"4807.038N");
        fix.extend_from_slice(b"01131.000E");
        fix.extend_from_slice(b"0545.4");
        match VoterPaket::decode(&fix).unwrap().nutzdaten {
            Nutzdaten::Gps(Some(gps)) => {
                assert_eq!(gps.breite, "4807.038N");
                assert_eq!(gps.laenge, "01131.000E");
                assert_eq!(gps.hoehe, "0545.4");
            }
            andere => panic!("GPS-Fix erwartet, erhalten: {andere:?}"),
        }

        // Hoehe mit 7 Zeichen ist ebenfalls gueltig
        fix.push(b'M');
        assert!(VoterPaket::decode(&fix).is_ok());

        fix.truncate(VoterHeader::SIZE + 5);
        assert!(VoterPaket::decode(&fix).is_err());
    }

    #[test]
    fn auth_antwort_traegt_flag_byte() {
        let bytes = VoterPaket::auth_antwort(zeit(), Challenge::aus_str("srv"), 0x1234, OPTION_MASTER).encode();
        assert_eq!(bytes.len(), VoterHeader::SIZE + 1);
        assert_eq!(bytes[VoterHeader::SIZE], 0x0A);

        let dekodiert = VoterPaket::decode(&bytes).unwrap();
        assert_eq!(dekodiert.header.digest, 0x1234);
        assert_eq!(
            dekodiert.nutzdaten,
            Nutzdaten::Keine {
                optionen: Some(OPTION_MASTER)
            }
        );
    }

    #[test]
    fn zeit_arithmetik() {
        let t = VoterZeit::neu(10, 990_000_000);
        let spaeter = t.plus_ms(40);
        assert_eq!(spaeter, VoterZeit::neu(11, 30_000_000));
        assert_eq!(spaeter.differenz_ns(&t), 40_000_000);
        assert_eq!(t.plus_ms(-990), VoterZeit::neu(10, 0));
        assert_eq!(VoterZeit::aus_nanos(-5), VoterZeit::default());
    }

    #[test]
    fn paket_fehler_in_voter_error() {
        let e: VoterError = PaketFehler::UnbekannterTyp(9).into();
        assert!(matches!(e, VoterError::Paket(_)));
    }
}
