//! Challenge/Digest-Authentifizierung
//!
//! Ein Digest ist die CRC-32 (IEEE) ueber Challenge und Geheimnis,
//! hintereinander gelesen. Beide werden wie C-Strings behandelt: das erste
//! NUL-Byte beendet den jeweiligen Teil. Das Geheimnis selbst geht nie ueber
//! die Leitung.

use rand::Rng;

/// Laenge des Challenge-Felds im Paket-Header
pub const CHALLENGE_LAENGE: usize = 10;

/// Berechnet den Digest fuer `challenge` und `geheimnis`
///
/// Reine Funktion: gleiche Eingaben liefern immer denselben Wert.
pub fn pruefsumme(challenge: &[u8], geheimnis: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bis_nul(challenge));
    hasher.update(bis_nul(geheimnis));
    hasher.finalize()
}

fn bis_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(ende) => &bytes[..ende],
        None => bytes,
    }
}

// ---------------------------------------------------------------------------
// Challenge
// ---------------------------------------------------------------------------

/// Challenge-String, NUL-aufgefuellt auf 10 Bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Challenge([u8; CHALLENGE_LAENGE]);

impl Challenge {
    /// Erzeugt eine zufaellige, druckbare Server-Challenge (Dezimalziffern)
    pub fn zufaellig() -> Self {
        let wert: u32 = rand::thread_rng().gen_range(1..=i32::MAX as u32);
        Self::aus_str(&wert.to_string())
    }

    /// Uebernimmt hoechstens 10 Bytes aus `text`
    pub fn aus_str(text: &str) -> Self {
        Self::aus_bytes(text.as_bytes())
    }

    /// Uebernimmt hoechstens 10 Bytes, der Rest bleibt NUL
    pub fn aus_bytes(bytes: &[u8]) -> Self {
        let mut feld = [0u8; CHALLENGE_LAENGE];
        let n = bytes.len().min(CHALLENGE_LAENGE);
        feld[..n].copy_from_slice(&bytes[..n]);
        Self(feld)
    }

    /// Rohes 10-Byte-Feld (fuer den Header)
    pub fn als_feld(&self) -> &[u8; CHALLENGE_LAENGE] {
        &self.0
    }

    /// Nutzbarer Teil bis zum ersten NUL
    pub fn als_bytes(&self) -> &[u8] {
        bis_nul(&self.0)
    }

    /// Digest dieser Challenge mit einem Geheimnis
    pub fn digest(&self, geheimnis: &str) -> u32 {
        pruefsumme(&self.0, geheimnis.as_bytes())
    }

    /// True wenn die Challenge leer ist
    pub fn ist_leer(&self) -> bool {
        self.0[0] == 0
    }
}

impl std::fmt::Display for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.als_bytes()))
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Challenge({:?})", String::from_utf8_lossy(self.als_bytes()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
