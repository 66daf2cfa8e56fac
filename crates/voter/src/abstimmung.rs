//! RSSI-Abstimmung pro Frame
//!
//! Ein Abstimmungsdurchlauf betrachtet das 160-Sample-Fenster am Drain-Index
//! aller Clients eines Knotens:
//!
//! 1. RSSI-Mittelwert je Client bilden, danach RSSI-Fenster nullen
//! 2. Gewinner = hoechste Prioritaet mit Signal, darin hoechster Mittelwert;
//!    bei Gleichstand gewinnt der zuerst registrierte Client
//! 3. Schwellen und Nachlauf halten den letzten Gewinner fest
//! 4. Testmodi ersetzen das Ergebnis
//! 5. Audiofenster des Gewinners kopieren, danach die Audiofenster aller
//!    Teilnehmer auf Stille setzen, Gewinner oder nicht
//!
//! Ohne Schwellen und mit gleichen Prioritaeten bleibt nur Schritt 2.

use rand::Rng;
use serde::{Deserialize, Serialize};
use votebridge_core::ClientIndex;
use votebridge_protocol::voter::{Frame, FRAME_GROESSE, STILLE};

use crate::registry::Registry;

/// Nachlauf in Frames, wenn eine Schwelle keinen eigenen angibt
pub const STANDARD_NACHLAUF: u16 = 6;

// ---------------------------------------------------------------------------
// Kandidaten
// ---------------------------------------------------------------------------

/// Ein Teilnehmer eines Durchlaufs mit seinem Fenster-Mittelwert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kandidat<'a> {
    pub index: ClientIndex,
    pub rssi: u8,
    pub name: &'a str,
    pub prioritaet: i32,
}

/// Beste Prioritaet mit Signal, darin der hoechste Mittelwert
///
/// Negative Prioritaeten gewinnen nie.
fn bester<'a>(kandidaten: &[Kandidat<'a>]) -> Option<Kandidat<'a>> {
    let prioritaet = kandidaten
        .iter()
        .filter(|k| k.rssi > 0 && k.prioritaet >= 0)
        .map(|k| k.prioritaet)
        .max()?;
    let maximum = kandidaten
        .iter()
        .filter(|k| k.prioritaet == prioritaet)
        .map(|k| k.rssi)
        .max()?;
    // Erster mit Maximum = Tie-Break nach Registrierung
    kandidaten
        .iter()
        .find(|k| k.prioritaet == prioritaet && k.rssi == maximum)
        .copied()
}

// ---------------------------------------------------------------------------
// Schwellen und Nachlauf
// ---------------------------------------------------------------------------

/// Haltegrenze fuer den letzten Gewinner
///
/// Solange sein Mittelwert mindestens `rssi` betraegt, bleibt er Gewinner.
/// Mit `anzahl > 0` endet das Halten nach so vielen Frames auf derselben
/// Schwelle. Faellt er unter alle Schwellen, haelt ihn der `nachlauf` der
/// zuletzt erreichten Schwelle noch so viele Frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schwelle {
    pub rssi: u8,
    pub anzahl: u16,
    pub nachlauf: u16,
}

impl Schwelle {
    pub fn neu(rssi: u8) -> Self {
        Self {
            rssi,
            anzahl: 0,
            nachlauf: STANDARD_NACHLAUF,
        }
    }
}

/// Laufzustand der Schwellen (pro Kanal)
#[derive(Debug, Default)]
pub struct Haltung {
    pub schwellen: Vec<Schwelle>,
    /// Erreichte Schwelle, 1-basiert, 0 = keine
    aktiv: usize,
    zaehler: u16,
    nachlauf: u16,
}

impl Haltung {
    pub fn neu(schwellen: Vec<Schwelle>) -> Self {
        Self {
            schwellen,
            ..Self::default()
        }
    }

    pub fn zuruecksetzen(&mut self) {
        self.aktiv = 0;
        self.zaehler = 0;
        self.nachlauf = 0;
    }

    /// Haelt den letzten Gewinner fest, falls Schwelle oder Nachlauf es verlangen
    ///
    /// Ein Kandidat hoeherer Prioritaet setzt sich immer durch.
    fn anwenden<'a>(&mut self, bester: Kandidat<'a>, letzter: Option<Kandidat<'a>>) -> Kandidat<'a> {
        let Some(letzter) = letzter else {
            self.nachlauf = 0;
            return bester;
        };

        if !self.schwellen.is_empty() && bester.prioritaet <= letzter.prioritaet {
            let anzahl_schwellen = self.schwellen.len();
            for i in 0..anzahl_schwellen {
                let schwelle = self.schwellen[i];
                if letzter.rssi >= schwelle.rssi {
                    if i + 1 != self.aktiv {
                        self.aktiv = i + 1;
                        self.zaehler = 0;
                        tracing::trace!(schwelle = self.aktiv, client = %letzter.name, "Neue Schwelle");
                    } else if schwelle.anzahl > 0 {
                        let bisher = self.zaehler;
                        self.zaehler = self.zaehler.saturating_add(1);
                        if bisher >= schwelle.anzahl {
                            tracing::trace!(schwelle = self.aktiv, client = %letzter.name, "Schwelle abgelaufen");
                            self.zuruecksetzen();
                            continue;
                        }
                    }
                    self.nachlauf = 0;
                    return letzter;
                }
                if i == anzahl_schwellen - 1 {
                    if self.aktiv > 0 {
                        self.nachlauf = self.schwellen[self.aktiv - 1].nachlauf;
                    }
                    self.aktiv = 0;
                    self.zaehler = 0;
                }
            }
        }

        if self.nachlauf > 0 {
            self.nachlauf -= 1;
            tracing::trace!(client = %letzter.name, rest = self.nachlauf, "Nachlauf");
            return letzter;
        }
        bester
    }
}

// ---------------------------------------------------------------------------
// Testmodi
// ---------------------------------------------------------------------------

/// Diagnose-Modus fuer die Gewinnerauswahl
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TestModus {
    /// Normale Abstimmung
    #[default]
    Aus,
    /// Gleichverteilte Zufallswahl unter allen gleichauf liegenden Besten
    Zufall,
    /// Reihum unter den gleichauf liegenden Besten, Wechsel alle `n - 1` Frames
    Zyklisch(u32),
    /// Der genannte Client gewinnt, sobald irgendein Client Signal hat
    Erzwungen(String),
}

impl TestModus {
    /// Uebersetzt den numerischen Konfigurationswert
    ///
    /// `0` = aus, `1` = Zufall, `n > 1` = zyklisch mit Laenge `n`.
    /// Ein gesetzter Client-Name hat Vorrang.
    pub fn aus_wert(wert: u32, erzwungen: Option<&str>) -> Self {
        if let Some(name) = erzwungen.filter(|n| !n.is_empty()) {
            return Self::Erzwungen(name.to_string());
        }
        match wert {
            0 => Self::Aus,
            1 => Self::Zufall,
            n => Self::Zyklisch(n),
        }
    }
}

/// Laufzustand eines Testmodus (pro Kanal)
#[derive(Debug, Default)]
pub struct TestAuswahl {
    pub modus: TestModus,
    zyklus: u32,
    index: usize,
}

impl TestAuswahl {
    pub fn neu(modus: TestModus) -> Self {
        Self {
            modus,
            zyklus: 0,
            index: 0,
        }
    }

    /// Wechselt den Modus und setzt die Zaehler zurueck
    pub fn modus_setzen(&mut self, modus: TestModus) {
        *self = Self::neu(modus);
    }

    /// Ersetzt den regulaer gewaehlten Gewinner je nach Modus
    ///
    /// Gleichauf liegt, wer denselben Mittelwert wie `gewaehlt` hat.
    fn waehlen(&mut self, kandidaten: &[Kandidat], gewaehlt: Kandidat) -> ClientIndex {
        match &self.modus {
            TestModus::Aus => gewaehlt.index,
            TestModus::Erzwungen(name) => kandidaten
                .iter()
                .find(|k| k.name == name.as_str())
                .map_or(gewaehlt.index, |k| k.index),
            TestModus::Zufall => {
                let gleichauf = gleichauf(kandidaten, gewaehlt.rssi);
                let i = rand::thread_rng().gen_range(0..gleichauf.len());
                gleichauf[i]
            }
            TestModus::Zyklisch(laenge) => {
                let gleichauf = gleichauf(kandidaten, gewaehlt.rssi);
                if gleichauf.len() < 2 {
                    self.zyklus = 0;
                    self.index = 0;
                    return gewaehlt.index;
                }
                self.zyklus += 1;
                if self.zyklus >= laenge.saturating_sub(1) {
                    self.zyklus = 0;
                    self.index += 1;
                }
                if self.index >= gleichauf.len() {
                    self.index = 0;
                }
                gleichauf[self.index]
            }
        }
    }
}

fn gleichauf(kandidaten: &[Kandidat], rssi: u8) -> Vec<ClientIndex> {
    kandidaten
        .iter()
        .filter(|k| k.rssi == rssi)
        .map(|k| k.index)
        .collect()
}

// ---------------------------------------------------------------------------
// Auswahl
// ---------------------------------------------------------------------------

/// Gesamter Auswahlzustand eines Kanals
#[derive(Debug, Default)]
pub struct Auswahl {
    pub haltung: Haltung,
    pub test: TestAuswahl,
}

impl Auswahl {
    pub fn neu(schwellen: Vec<Schwelle>, modus: TestModus) -> Self {
        Self {
            haltung: Haltung::neu(schwellen),
            test: TestAuswahl::neu(modus),
        }
    }

    /// Waehlt den Gewinner; `letzter` ist der Gewinner des vorigen Frames
    fn waehlen(&mut self, kandidaten: &[Kandidat], letzter: Option<ClientIndex>) -> Option<ClientIndex> {
        let Some(bester) = bester(kandidaten) else {
            self.haltung.zuruecksetzen();
            return None;
        };
        let letzter = letzter.and_then(|l| kandidaten.iter().find(|k| k.index == l).copied());
        let gewaehlt = self.haltung.anwenden(bester, letzter);
        Some(self.test.waehlen(kandidaten, gewaehlt))
    }
}

// ---------------------------------------------------------------------------
// Abstimmung
// ---------------------------------------------------------------------------

/// Ergebnis eines Durchlaufs mit Gewinner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abstimmung {
    pub gewinner: ClientIndex,
    pub frame: Frame,
}

/// Fuehrt einen Abstimmungsdurchlauf am Fenster `drain_index` aus
///
/// Nach dem Aufruf sind RSSI- und Audiofenster aller `teilnehmer` geleert,
/// unabhaengig vom Ergebnis. Ausgeschlossene Clients stimmen nicht mit ab.
pub fn abstimmen(
    registry: &mut Registry,
    teilnehmer: &[ClientIndex],
    drain_index: usize,
    auswahl: &mut Auswahl,
    letzter: Option<ClientIndex>,
) -> Option<Abstimmung> {
    for &index in teilnehmer {
        let client = registry.client_mut(index);
        let summe = client.rssi.summe(drain_index, FRAME_GROESSE);
        client.letzter_rssi = (summe / FRAME_GROESSE as u32) as u8;
        client.rssi.fuellen(drain_index, FRAME_GROESSE, 0);
    }

    let gewinner = {
        let kandidaten: Vec<Kandidat> = teilnehmer
            .iter()
            .filter_map(|&i| {
                let c = registry.client(i);
                c.prioritaet().map(|prioritaet| Kandidat {
                    index: i,
                    rssi: c.letzter_rssi,
                    name: c.name.as_str(),
                    prioritaet,
                })
            })
            .collect();
        auswahl.waehlen(&kandidaten, letzter)
    };

    let ergebnis = gewinner.map(|gewinner| {
        let mut frame = [STILLE; FRAME_GROESSE];
        registry.client(gewinner).audio.lesen(drain_index, &mut frame);
        Abstimmung { gewinner, frame }
    });

    for &index in teilnehmer {
        registry
            .client_mut(index)
            .audio
            .fuellen(drain_index, FRAME_GROESSE, STILLE);
    }

    ergebnis
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
