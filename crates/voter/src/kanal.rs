//! Kanal-Instanz pro Knoten und Host-Handle
//!
//! Der Host spricht ausschliesslich ueber zwei Queues mit der Engine:
//!
//! ```text
//! Host ──KanalBefehl──> [mpsc] ──> Kanal (Engine-Loop)
//! Host <──HostFrame──── [mpsc] <── Kanal (Engine-Loop)
//! ```
//!
//! Lesen und Schreiben blockieren nie. Der Kanal-Zustand (Drain-Index,
//! Sende-Queue, Empfangstaste) gehoert allein der Engine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use votebridge_core::{ClientIndex, NodeNummer, Result, VoterError};
use votebridge_protocol::voter::{Frame, FRAME_GROESSE};

use crate::abstimmung::{Auswahl, Schwelle, TestModus};

/// Nach dieser Zeit ohne Gewinner-Frame faellt die Empfangstaste ab
pub const EMPFANG_TIMEOUT: Duration = Duration::from_millis(200);

/// Ab dieser Laenge wird die Sende-Queue auch bei gedrueckter Taste geleert
pub const SENDE_VORRAT: usize = 3;

/// Kapazitaet der Host-Queues (je Richtung)
pub const QUEUE_GROESSE: usize = 64;

/// Maximale Laenge der Sende-Queue (eine Sekunde Audio), aeltere Frames fallen raus
pub const AUSGANG_MAX: usize = 50;

// ---------------------------------------------------------------------------
// Nachrichten
// ---------------------------------------------------------------------------

/// Ein Frame aus Sicht des Hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostFrame {
    /// Abgestimmtes Empfangsaudio
    Sprache(Frame),
    /// Empfangstaste gedrueckt (`true`) oder losgelassen
    Empfangstaste(bool),
    /// Neuer Gewinner (Client-Name)
    Gewinner(String),
    /// Nichts bereit
    Leer,
}

/// Steuersignale vom Host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steuersignal {
    /// Sendetaste gedrueckt
    Taste,
    /// Sendetaste losgelassen
    Loslassen,
    /// Kanal auflegen
    Auflegen,
}

/// Befehle Host -> Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KanalBefehl {
    Audio(Frame),
    Steuerung(Steuersignal),
}

// ---------------------------------------------------------------------------
// KanalHandle (Host-Seite)
// ---------------------------------------------------------------------------

/// Host-Seite eines geoeffneten Kanals
///
/// Beim Drop wird der Kanal in der Engine beim naechsten Durchlauf entfernt.
#[derive(Debug)]
pub struct KanalHandle {
    knoten: NodeNummer,
    befehle: mpsc::Sender<KanalBefehl>,
    ereignisse: mpsc::Receiver<HostFrame>,
}

impl KanalHandle {
    pub fn knoten(&self) -> NodeNummer {
        self.knoten
    }

    /// Liest den naechsten Frame, ohne zu blockieren
    pub fn frame_lesen(&mut self) -> HostFrame {
        self.ereignisse.try_recv().unwrap_or(HostFrame::Leer)
    }

    /// Wartet auf den naechsten Frame (`None` wenn die Engine beendet ist)
    pub async fn frame_erwarten(&mut self) -> Option<HostFrame> {
        self.ereignisse.recv().await
    }

    /// Reiht einen Frame zum Senden ein
    ///
    /// Wird von der Engine verworfen, solange die Sendetaste nicht gedrueckt ist.
    pub fn frame_schreiben(&self, frame: Frame) -> Result<()> {
        self.senden(KanalBefehl::Audio(frame))
    }

    /// Sendet ein Steuersignal
    pub fn steuern(&self, signal: Steuersignal) -> Result<()> {
        self.senden(KanalBefehl::Steuerung(signal))
    }

    /// Legt auf und gibt den Kanal frei
    pub fn schliessen(self) -> Result<()> {
        self.steuern(Steuersignal::Auflegen)
    }

    fn senden(&self, befehl: KanalBefehl) -> Result<()> {
        match self.befehle.try_send(befehl) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(knoten = %self.knoten, "Befehls-Queue voll – Befehl verworfen");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(VoterError::KanalGeschlossen),
        }
    }
}

// ---------------------------------------------------------------------------
// Kanal (Engine-Seite)
// ---------------------------------------------------------------------------

/// Zustand der Empfangstaste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Empfang {
    Ruhe,
    Aktiv { letzter: Instant },
}

/// Ergebnis beim Abholen der Host-Befehle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KanalStatus {
    Offen,
    Geschlossen,
}

/// Engine-Seite einer Kanal-Instanz
#[derive(Debug)]
pub struct Kanal {
    pub knoten: NodeNummer,
    pub duplex: bool,
    /// Lese-Cursor im gemeinsamen Puffer-Koordinatenraum
    pub drain_index: usize,
    pub ausgang: VecDeque<Frame>,
    pub empfang: Empfang,
    pub sendetaste: bool,
    pub auswahl: Auswahl,
    pub letzter_gewinner: Option<ClientIndex>,
    befehle: mpsc::Receiver<KanalBefehl>,
    ereignisse: mpsc::Sender<HostFrame>,
}

impl Kanal {
    /// Erstellt Engine- und Host-Seite eines Kanals
    pub fn oeffnen(
        knoten: NodeNummer,
        duplex: bool,
        schwellen: Vec<Schwelle>,
        modus: TestModus,
    ) -> (Self, KanalHandle) {
        let (befehl_tx, befehl_rx) = mpsc::channel(QUEUE_GROESSE);
        let (ereignis_tx, ereignis_rx) = mpsc::channel(QUEUE_GROESSE);

        let kanal = Self {
            knoten,
            duplex,
            drain_index: 0,
            ausgang: VecDeque::new(),
            empfang: Empfang::Ruhe,
            sendetaste: false,
            auswahl: Auswahl::neu(schwellen, modus),
            letzter_gewinner: None,
            befehle: befehl_rx,
            ereignisse: ereignis_tx,
        };
        let handle = KanalHandle {
            knoten,
            befehle: befehl_tx,
            ereignisse: ereignis_rx,
        };
        (kanal, handle)
    }

    /// Rueckt den Drain-Index um einen Frame vor
    pub fn drain_vorruecken(&mut self, puffer_laenge: usize) {
        self.drain_index = (self.drain_index + FRAME_GROESSE) % puffer_laenge;
    }

    /// Holt alle anstehenden Host-Befehle ab
    ///
    /// `annehmen` entscheidet, ob Sendeaudio gerade angenommen wird
    /// (z.B. nicht ohne Master-Referenz).
    pub fn befehle_abholen(&mut self, annehmen: bool) -> KanalStatus {
        loop {
            match self.befehle.try_recv() {
                Ok(KanalBefehl::Audio(frame)) => {
                    if self.sendetaste && annehmen {
                        if self.ausgang.len() >= AUSGANG_MAX {
                            self.ausgang.pop_front();
                            tracing::debug!(knoten = %self.knoten, "Sende-Queue voll – aeltester Frame verworfen");
                        }
                        self.ausgang.push_back(frame);
                    }
                }
                Ok(KanalBefehl::Steuerung(Steuersignal::Taste)) => {
                    tracing::debug!(knoten = %self.knoten, "Sendetaste gedrueckt");
                    self.sendetaste = true;
                }
                Ok(KanalBefehl::Steuerung(Steuersignal::Loslassen)) => {
                    tracing::debug!(knoten = %self.knoten, "Sendetaste losgelassen");
                    self.sendetaste = false;
                }
                Ok(KanalBefehl::Steuerung(Steuersignal::Auflegen)) => {
                    return KanalStatus::Geschlossen;
                }
                Err(mpsc::error::TryRecvError::Empty) => return KanalStatus::Offen,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return KanalStatus::Geschlossen;
                }
            }
        }
    }

    /// Naechster Frame fuer die Sender, falls die Queue freigegeben ist
    ///
    /// Bei gedrueckter Sendetaste bleibt ein Vorrat von [`SENDE_VORRAT`]
    /// Frames stehen; danach wird Frame fuer Frame geleert.
    pub fn ausgang_entnehmen(&mut self) -> Option<Frame> {
        let n = self.ausgang.len();
        if n > 0 && (n > SENDE_VORRAT || !self.sendetaste) {
            self.ausgang.pop_front()
        } else {
            None
        }
    }

    /// Wird gerade Empfangsaudio unterdrueckt (Halbduplex beim Senden)?
    pub fn empfang_gesperrt(&self) -> bool {
        !self.duplex && self.sendetaste
    }

    /// Verbucht einen Gewinner-Frame und meldet ihn dem Host
    pub fn gewonnen(&mut self, gewinner: ClientIndex, name: &str, frame: Frame, jetzt: Instant) {
        if self.empfang == Empfang::Ruhe {
            tracing::debug!(knoten = %self.knoten, "Empfangstaste gedrueckt");
            self.melden(HostFrame::Empfangstaste(true));
        }
        self.empfang = Empfang::Aktiv { letzter: jetzt };

        if self.letzter_gewinner != Some(gewinner) {
            tracing::info!(knoten = %self.knoten, client = %name, "Neuer Gewinner");
            self.letzter_gewinner = Some(gewinner);
            self.melden(HostFrame::Gewinner(name.to_string()));
        }
        self.melden(HostFrame::Sprache(frame));
    }

    /// Laesst die Empfangstaste nach [`EMPFANG_TIMEOUT`] ohne Gewinner fallen
    pub fn empfang_pruefen(&mut self, jetzt: Instant) {
        if let Empfang::Aktiv { letzter } = self.empfang {
            if jetzt.saturating_duration_since(letzter) > EMPFANG_TIMEOUT {
                self.empfang_beenden();
            }
        }
    }

    /// Setzt Empfangs- und Sendezustand nach Verlust des Master-Takts zurueck
    pub fn zuruecksetzen(&mut self) {
        self.empfang_beenden();
        self.auswahl.haltung.zuruecksetzen();
        self.ausgang.clear();
    }

    /// Laesst die Empfangstaste sofort fallen und vergisst den letzten Gewinner
    pub fn empfang_beenden(&mut self) {
        if self.empfang != Empfang::Ruhe {
            tracing::debug!(knoten = %self.knoten, "Empfangstaste losgelassen");
            self.melden(HostFrame::Empfangstaste(false));
        }
        self.empfang = Empfang::Ruhe;
        self.letzter_gewinner = None;
    }

    fn melden(&self, frame: HostFrame) {
        match self.ereignisse.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(knoten = %self.knoten, "Host-Queue voll – Frame verworfen");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(knoten = %self.knoten, "Host-Queue geschlossen");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use votebridge_protocol::voter::STILLE;

    fn kanal() -> (Kanal, KanalHandle) {
        Kanal::oeffnen(NodeNummer(1), true, Vec::new(), TestModus::Aus)
    }

    #[test]
    fn lesen_ohne_daten_ist_leer() {
        let (_kanal, mut handle) = kanal();
        assert_eq!(handle.frame_lesen(), HostFrame::Leer);
    }

    #[test]
    fn schreiben_nur_bei_sendetaste() {
        let (mut kanal, handle) = kanal();
        handle.frame_schreiben([1; FRAME_GROESSE]).unwrap();
        assert_eq!(kanal.befehle_abholen(true), KanalStatus::Offen);
        assert!(kanal.ausgang.is_empty());

        handle.steuern(Steuersignal::Taste).unwrap();
        handle.frame_schreiben([2; FRAME_GROESSE]).unwrap();
        kanal.befehle_abholen(true);
        assert_eq!(kanal.ausgang.len(), 1);

        // Ohne Master-Referenz wird verworfen
        handle.frame_schreiben([3; FRAME_GROESSE]).unwrap();
        kanal.befehle_abholen(false);
        assert_eq!(kanal.ausgang.len(), 1);
    }

    #[test]
    fn sende_queue_ist_begrenzt() {
        let (mut kanal, handle) = kanal();
        handle.steuern(Steuersignal::Taste).unwrap();
        for runde in 0..3u8 {
            for i in 0..30u8 {
                handle.frame_schreiben([runde * 30 + i; FRAME_GROESSE]).unwrap();
            }
            kanal.befehle_abholen(true);
        }
        assert_eq!(kanal.ausgang.len(), AUSGANG_MAX);
        // Die aeltesten 40 Frames sind verdraengt
        assert_eq!(kanal.ausgang.front(), Some(&[40; FRAME_GROESSE]));
        assert_eq!(kanal.ausgang.back(), Some(&[89; FRAME_GROESSE]));
    }

    #[test]
    fn empfang_beenden_meldet_sofort() {
        let (mut kanal, mut handle) = kanal();
        kanal.gewonnen(ClientIndex(1), "nord", [7; FRAME_GROESSE], Instant::now());
        while handle.frame_lesen() != HostFrame::Leer {}

        kanal.empfang_beenden();
        assert_eq!(handle.frame_lesen(), HostFrame::Empfangstaste(false));
        assert_eq!(kanal.empfang, Empfang::Ruhe);
        assert!(kanal.letzter_gewinner.is_none());

        // Ohne aktive Taste keine zweite Meldung
        kanal.empfang_beenden();
        assert_eq!(handle.frame_lesen(), HostFrame::Leer);
    }

    #[test]
    fn ausgang_haelt_vorrat_bei_gedrueckter_taste() {
        let (mut kanal, _handle) = kanal();
        kanal.sendetaste = true;
        for i in 0..3 {
            kanal.ausgang.push_back([i; FRAME_GROESSE]);
        }
        assert!(kanal.ausgang_entnehmen().is_none());

        kanal.ausgang.push_back([3; FRAME_GROESSE]);
        assert_eq!(kanal.ausgang_entnehmen(), Some([0; FRAME_GROESSE]));
        assert!(kanal.ausgang_entnehmen().is_none());

        // Taste losgelassen: Rest wird geleert
        kanal.sendetaste = false;
        assert_eq!(kanal.ausgang_entnehmen(), Some([1; FRAME_GROESSE]));
        assert_eq!(kanal.ausgang_entnehmen(), Some([2; FRAME_GROESSE]));
        assert_eq!(kanal.ausgang_entnehmen(), Some([3; FRAME_GROESSE]));
        assert!(kanal.ausgang_entnehmen().is_none());
    }

    #[test]
    fn gewinner_frame_tastet_und_meldet() {
        let (mut kanal, mut handle) = kanal();
        let jetzt = Instant::now();
        kanal.gewonnen(ClientIndex(2), "nord", [7; FRAME_GROESSE], jetzt);
        kanal.gewonnen(ClientIndex(2), "nord", [8; FRAME_GROESSE], jetzt);

        assert_eq!(handle.frame_lesen(), HostFrame::Empfangstaste(true));
        assert_eq!(handle.frame_lesen(), HostFrame::Gewinner("nord".into()));
        assert_eq!(handle.frame_lesen(), HostFrame::Sprache([7; FRAME_GROESSE]));
        assert_eq!(handle.frame_lesen(), HostFrame::Sprache([8; FRAME_GROESSE]));
        assert_eq!(handle.frame_lesen(), HostFrame::Leer);
    }

    #[test]
    fn empfangstaste_faellt_nach_timeout() {
        let (mut kanal, mut handle) = kanal();
        let start = Instant::now();
        kanal.gewonnen(ClientIndex(0), "a", [STILLE; FRAME_GROESSE], start);
        while handle.frame_lesen() != HostFrame::Leer {}

        kanal.empfang_pruefen(start + Duration::from_millis(200));
        assert_eq!(handle.frame_lesen(), HostFrame::Leer);

        kanal.empfang_pruefen(start + Duration::from_millis(201));
        assert_eq!(handle.frame_lesen(), HostFrame::Empfangstaste(false));
        assert_eq!(kanal.empfang, Empfang::Ruhe);
        assert!(kanal.letzter_gewinner.is_none());
    }

    #[test]
    fn drain_index_laeuft_um() {
        let (mut kanal, _handle) = kanal();
        kanal.drain_index = 800;
        kanal.drain_vorruecken(960);
        assert_eq!(kanal.drain_index, 0);
        kanal.drain_vorruecken(960);
        assert_eq!(kanal.drain_index, 160);
    }

    #[test]
    fn auflegen_und_drop_schliessen() {
        let (mut kanal, handle) = kanal();
        handle.schliessen().unwrap();
        assert_eq!(kanal.befehle_abholen(true), KanalStatus::Geschlossen);

        let (mut kanal2, handle2) = Kanal::oeffnen(NodeNummer(2), true, Vec::new(), TestModus::Aus);
        drop(handle2);
        assert_eq!(kanal2.befehle_abholen(true), KanalStatus::Geschlossen);
    }

    #[test]
    fn schreiben_auf_geschlossenen_kanal() {
        let (kanal, handle) = kanal();
        drop(kanal);
        assert!(matches!(
            handle.frame_schreiben([0; FRAME_GROESSE]),
            Err(VoterError::KanalGeschlossen)
        ));
    }

    #[test]
    fn halbduplex_sperrt_beim_senden() {
        let (mut kanal, _handle) = Kanal::oeffnen(NodeNummer(3), false, Vec::new(), TestModus::Aus);
        assert!(!kanal.empfang_gesperrt());
        kanal.sendetaste = true;
        assert!(kanal.empfang_gesperrt());
    }
}
