//! Master-Takt und Platzierungsrechnung
//!
//! Die Zeitstempel des Master-Clients bilden die einzige Zeitbasis. Alle
//! anderen Pakete werden relativ dazu in Puffer-Koordinaten umgerechnet:
//!
//! ```text
//! basis  = master + VORLAUF
//! offset = (paket - basis) / 125 us + verzoegerung      [Samples]
//! gueltig: 0 <= offset <= laenge - 160
//! ```

use std::time::{Duration, Instant};

use votebridge_protocol::voter::{FRAME_GROESSE, NS_PRO_SAMPLE};
use votebridge_protocol::VoterZeit;

/// Fester Vorlauf vor dem Master-Zeitstempel
pub const VORLAUF_MS: i64 = 40;

/// Maximale Abweichung eines Nicht-Master-Pakets von der lokalen Uhr
pub const SYNC_TOLERANZ: Duration = Duration::from_secs(2);

/// Frame-Perioden ohne Master-Paket, ab denen der Takt als verloren gilt
pub const MAX_MASTER_AUSFALL: u32 = 3;

const FRAME_DAUER: Duration = Duration::from_millis(20);

/// Zeitbasis einer Deployment-Instanz
#[derive(Debug, Default)]
pub struct MasterUhr {
    referenz: Option<VoterZeit>,
    zuletzt: Option<Instant>,
}

impl MasterUhr {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Aktuelle Referenz, `None` bis zum ersten Master-Paket
    pub fn referenz(&self) -> Option<VoterZeit> {
        self.referenz
    }

    /// Uebernimmt den Zeitstempel eines Master-Pakets
    ///
    /// Gibt `true` zurueck, wenn vorher keine Referenz bestand.
    pub fn aktualisieren(&mut self, zeit: VoterZeit, jetzt: Instant) -> bool {
        let neu = self.referenz.is_none();
        self.referenz = Some(zeit);
        self.zuletzt = Some(jetzt);
        neu
    }

    /// Master laenger als [`MAX_MASTER_AUSFALL`] Frames (plus einen) nicht gehoert
    pub fn verloren(&self, jetzt: Instant) -> bool {
        match (self.referenz, self.zuletzt) {
            (Some(_), Some(t)) => {
                jetzt.saturating_duration_since(t) > FRAME_DAUER * (MAX_MASTER_AUSFALL + 1)
            }
            _ => false,
        }
    }

    pub fn zuruecksetzen(&mut self) {
        self.referenz = None;
        self.zuletzt = None;
    }
}

/// Berechnet den Puffer-Offset (Samples ab Drain-Index) fuer ein Paket
///
/// `None` wenn das Paket zu alt oder zu weit in der Zukunft liegt.
pub fn platzierung(
    paket: VoterZeit,
    master: VoterZeit,
    verzoegerung: usize,
    puffer_laenge: usize,
) -> Option<usize> {
    let basis = master.plus_ms(VORLAUF_MS);
    let diff_ns = paket.differenz_ns(&basis) + verzoegerung as i64 * NS_PRO_SAMPLE;
    if diff_ns < 0 {
        return None;
    }
    let offset = (diff_ns / NS_PRO_SAMPLE) as usize;
    (offset <= puffer_laenge - FRAME_GROESSE).then_some(offset)
}

/// Liegt `paket` innerhalb der Toleranz um die lokale Uhr?
pub fn synchron(paket: VoterZeit, lokal: VoterZeit) -> bool {
    paket.differenz_ns(&lokal).unsigned_abs() <= SYNC_TOLERANZ.as_nanos() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
