//! Voting-Engine – alleiniger Besitzer des Abstimmungszustands
//!
//! Die Engine ist synchron und wird ausschliesslich von der Netzwerk-Loop
//! aufgerufen. Zeit wird als [`Zeitpunkt`] hineingereicht, Pakete an Clients
//! kommen als [`Sendung`] zurueck. Dadurch ist der gesamte Ablauf ohne
//! Sockets und ohne echte Uhr testbar.
//!
//! ## Ablauf pro Paket
//!
//! ```text
//! VoterPaket::decode()            <- Laenge/Typ pruefen, sonst verwerfen
//!     |
//! Registry::suchen(digest)        <- Client identifizieren, Adresse lernen
//!     |
//!     +-- Typ 0 / unbekannt  --> Auth-Antwort an Absender
//!     +-- Typ 2              --> GPS loggen
//!     +-- Typ 1              --> Master-Takt / Platzierung im Ringpuffer
//!                                  |
//!                                  +-- vom Master: abstimmen, senden, Keepalives
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::Serialize;
use votebridge_core::{ClientIndex, NodeNummer, Result, VoterError};
use votebridge_protocol::voter::{Frame, GpsFix, Nutzdaten, VoterHeader, OPTION_MASTER};
use votebridge_protocol::{Challenge, VoterPaket, VoterZeit};

use crate::abstimmung::{self, TestModus};
use crate::config::{KnotenKonfig, VoterConfig};
use crate::kanal::{Kanal, KanalHandle, KanalStatus};
use crate::registry::{PrioUebersteuerung, Registry};
use crate::uhr::{self, MasterUhr};

/// Ohne Sendung an einen Client geht nach dieser Zeit ein Keepalive raus
pub const KEEPALIVE_INTERVALL: Duration = Duration::from_millis(1000);

/// Mindestabstand der Warnung "kein Master konfiguriert" pro Client
pub const MASTER_WARNUNG_INTERVALL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Hilfstypen
// ---------------------------------------------------------------------------

/// Monotone und Wanduhr-Zeit eines Verarbeitungsschritts
#[derive(Debug, Clone, Copy)]
pub struct Zeitpunkt {
    pub monoton: Instant,
    pub wand: VoterZeit,
}

impl Zeitpunkt {
    pub fn neu(monoton: Instant, wand: VoterZeit) -> Self {
        Self { monoton, wand }
    }

    pub fn jetzt() -> Self {
        Self {
            monoton: Instant::now(),
            wand: VoterZeit::jetzt(),
        }
    }

    /// Verschiebt beide Uhren um `ms` Millisekunden
    pub fn plus_ms(&self, ms: u64) -> Self {
        Self {
            monoton: self.monoton + Duration::from_millis(ms),
            wand: self.wand.plus_ms(ms as i64),
        }
    }
}

/// Ein zu sendendes Datagramm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sendung {
    pub ziel: SocketAddr,
    pub daten: Vec<u8>,
}

/// Zaehler seit Start
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStatistik {
    pub pakete_empfangen: u64,
    pub pakete_verworfen: u64,
    pub auth_antworten: u64,
    pub frames_abgestimmt: u64,
    pub frames_gesendet: u64,
}

/// Diagnosedaten eines Clients
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub name: String,
    pub knoten: NodeNummer,
    pub master: bool,
    pub darf_senden: bool,
    /// Wirksame Prioritaet, `None` = ausgeschlossen
    pub prioritaet: Option<i32>,
    pub gehoert: bool,
    pub adresse: Option<SocketAddr>,
    pub letzter_rssi: u8,
}

/// Momentaufnahme der Engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub master_konfiguriert: bool,
    pub master_synchron: bool,
    pub offene_kanaele: usize,
    pub clients: Vec<ClientStatus>,
    pub statistik: EngineStatistik,
}

impl EngineStatus {
    pub fn angemeldete_clients(&self) -> usize {
        self.clients.iter().filter(|c| c.gehoert).count()
    }
}

// ---------------------------------------------------------------------------
// VoterEngine
// ---------------------------------------------------------------------------

/// Engine-Kontext: Registry, Ringpuffer, Master-Takt und Kanaele
#[derive(Debug)]
pub struct VoterEngine {
    registry: Registry,
    uhr: MasterUhr,
    knoten: Vec<KnotenKonfig>,
    kanaele: Vec<Kanal>,
    puffer_laenge: usize,
    verzoegerung: usize,
    adressen_pruefen: bool,
    statistik: EngineStatistik,
}

impl VoterEngine {
    /// Erstellt die Engine
    ///
    /// # Fehler
    /// Jeder Konfigurationsfehler ist fatal: doppelte oder ungueltige
    /// Digests, leere Geheimnisse, fehlendes Passwort, unbekannte Knoten.
    pub fn neu(config: VoterConfig) -> Result<Self> {
        config.pruefen()?;
        let puffer_laenge = config.puffer_laenge();
        let verzoegerung = config.verzoegerung();
        let registry = Registry::neu(
            config.challenge,
            &config.passwort,
            &config.clients,
            puffer_laenge,
        )?;

        if !registry.hat_master() {
            tracing::warn!("Kein Master-Client konfiguriert – es wird nicht abgestimmt");
        }
        tracing::info!(
            clients = registry.clients().len(),
            knoten = config.knoten.len(),
            puffer = puffer_laenge,
            verzoegerung = verzoegerung,
            challenge = %registry.challenge(),
            "Voting-Engine initialisiert"
        );

        Ok(Self {
            registry,
            uhr: MasterUhr::neu(),
            knoten: config.knoten,
            kanaele: Vec::new(),
            puffer_laenge,
            verzoegerung,
            adressen_pruefen: config.adressen_pruefen,
            statistik: EngineStatistik::default(),
        })
    }

    pub fn challenge(&self) -> &Challenge {
        self.registry.challenge()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn puffer_laenge(&self) -> usize {
        self.puffer_laenge
    }

    pub fn verzoegerung(&self) -> usize {
        self.verzoegerung
    }

    pub fn master_referenz(&self) -> Option<VoterZeit> {
        self.uhr.referenz()
    }

    /// Engine-Seite eines offenen Kanals
    pub fn kanal(&self, knoten: NodeNummer) -> Option<&Kanal> {
        self.kanaele.iter().find(|k| k.knoten == knoten)
    }

    // -----------------------------------------------------------------------
    // Host-Operationen
    // -----------------------------------------------------------------------

    /// Oeffnet den Kanal eines konfigurierten Knotens
    pub fn kanal_oeffnen(&mut self, knoten: NodeNummer) -> Result<KanalHandle> {
        let konfig = self
            .knoten
            .iter()
            .find(|k| k.knoten == knoten)
            .ok_or(VoterError::UnbekannterKnoten(knoten.0))?;
        if self.kanal(knoten).is_some() {
            return Err(VoterError::KanalBelegt(knoten.0));
        }

        let (kanal, handle) = Kanal::oeffnen(
            knoten,
            konfig.duplex,
            konfig.schwellen.clone(),
            konfig.testmodus.clone(),
        );
        self.kanaele.push(kanal);
        tracing::info!(knoten = %knoten, "Kanal geoeffnet");
        Ok(handle)
    }

    /// Aendert den Testmodus eines Knotens (auch fuer spaeter geoeffnete Kanaele)
    pub fn testmodus_setzen(&mut self, knoten: NodeNummer, modus: TestModus) -> Result<()> {
        let konfig = self
            .knoten
            .iter_mut()
            .find(|k| k.knoten == knoten)
            .ok_or(VoterError::UnbekannterKnoten(knoten.0))?;
        konfig.testmodus = modus.clone();
        if let Some(kanal) = self.kanaele.iter_mut().find(|k| k.knoten == knoten) {
            kanal.auswahl.test.modus_setzen(modus.clone());
        }
        tracing::info!(knoten = %knoten, modus = ?modus, "Testmodus gesetzt");
        Ok(())
    }

    /// Uebersteuert die Abstimmungsprioritaet eines Clients zur Laufzeit
    pub fn prioritaet_setzen(&mut self, name: &str, uebersteuerung: PrioUebersteuerung) -> Result<()> {
        let index = self
            .registry
            .nach_name(name)
            .ok_or_else(|| VoterError::UnbekannterClient(name.to_string()))?;
        self.registry.client_mut(index).uebersteuerung = uebersteuerung;
        tracing::info!(client = %name, uebersteuerung = ?uebersteuerung, "Prioritaet gesetzt");
        Ok(())
    }

    /// Momentaufnahme fuer Diagnose und Metriken
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            master_konfiguriert: self.registry.hat_master(),
            master_synchron: self.uhr.referenz().is_some(),
            offene_kanaele: self.kanaele.len(),
            clients: self
                .registry
                .clients()
                .iter()
                .map(|c| ClientStatus {
                    name: c.name.clone(),
                    knoten: c.knoten,
                    master: c.master,
                    darf_senden: c.darf_senden,
                    prioritaet: c.prioritaet(),
                    gehoert: c.gehoert,
                    adresse: c.adresse,
                    letzter_rssi: c.letzter_rssi,
                })
                .collect(),
            statistik: self.statistik,
        }
    }

    // -----------------------------------------------------------------------
    // Loop-Einstiegspunkte
    // -----------------------------------------------------------------------

    /// Periodischer Durchlauf ohne Paket: Master-Ausfall, Host-Befehle, Empfangs-Timeouts
    pub fn takt(&mut self, t: Zeitpunkt) {
        if self.uhr.verloren(t.monoton) {
            self.master_verloren();
        }
        self.befehle_abholen();
        for kanal in &mut self.kanaele {
            kanal.empfang_pruefen(t.monoton);
        }
    }

    /// Verarbeitet ein empfangenes Datagramm
    ///
    /// Gibt die daraufhin zu sendenden Datagramme zurueck.
    pub fn paket_verarbeiten(
        &mut self,
        daten: &[u8],
        absender: SocketAddr,
        t: Zeitpunkt,
    ) -> Vec<Sendung> {
        self.statistik.pakete_empfangen += 1;
        self.takt(t);

        let paket = match VoterPaket::decode(daten) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(fehler = %e, absender = %absender, "Ungueltiges Voter-Paket");
                self.statistik.pakete_verworfen += 1;
                return Vec::new();
            }
        };

        let client = self.registry.suchen(paket.header.digest);
        if let Some(index) = client {
            self.registry
                .anmelden(index, absender, &paket.header.challenge, t.monoton);
        }

        match (client, paket.nutzdaten) {
            (Some(index), Nutzdaten::Audio { rssi, audio }) => {
                self.audio_verarbeiten(index, paket.header.zeit, rssi, &audio, t)
            }
            (Some(index), Nutzdaten::Gps(fix)) => {
                self.gps_verarbeiten(index, fix);
                Vec::new()
            }
            (client, _) => vec![self.auth_antwort(client, &paket.header, absender, t)],
        }
    }

    // -----------------------------------------------------------------------
    // Internes
    // -----------------------------------------------------------------------

    fn befehle_abholen(&mut self) {
        // Ohne Master-Takt wird nie gesendet
        let annehmen = self.uhr.referenz().is_some();
        self.kanaele.retain_mut(|kanal| match kanal.befehle_abholen(annehmen) {
            KanalStatus::Offen => true,
            KanalStatus::Geschlossen => {
                tracing::info!(knoten = %kanal.knoten, "Kanal geschlossen");
                false
            }
        });
    }

    /// Antwort auf Handshake, Keepalive oder unbekannten Absender
    ///
    /// Unbekannte Absender bekommen immer eine Antwort, es gibt keine
    /// explizite Ablehnung.
    fn auth_antwort(
        &mut self,
        client: Option<ClientIndex>,
        header: &VoterHeader,
        absender: SocketAddr,
        t: Zeitpunkt,
    ) -> Sendung {
        let mut digest = self.registry.antwort_digest(&header.challenge);
        let mut flags = 0;

        match client {
            Some(index) => {
                let hat_master = self.registry.hat_master();
                let c = self.registry.client_mut(index);
                c.tx_sequenz = 0;
                if !hat_master {
                    let warnen = c.letzte_warnung.map_or(true, |w| {
                        t.monoton.saturating_duration_since(w) >= MASTER_WARNUNG_INTERVALL
                    });
                    if warnen {
                        c.letzte_warnung = Some(t.monoton);
                        tracing::warn!(
                            client = %c.name,
                            "Client meldet sich an, aber es ist kein Master-Takt konfiguriert"
                        );
                    }
                    digest = 0;
                    c.abmelden();
                } else if c.master {
                    flags = OPTION_MASTER;
                }
                tracing::trace!(client = %c.name, "Handshake beantwortet");
            }
            None => {
                tracing::debug!(
                    absender = %absender,
                    digest = %format!("{:08x}", header.digest),
                    "Unbekannter Absender – Challenge-Antwort"
                );
            }
        }

        self.statistik.auth_antworten += 1;
        let antwort = VoterPaket::auth_antwort(t.wand, *self.registry.challenge(), digest, flags);
        Sendung {
            ziel: absender,
            daten: antwort.encode(),
        }
    }

    fn gps_verarbeiten(&mut self, index: ClientIndex, fix: Option<GpsFix>) {
        let client = self.registry.client(index);
        match fix {
            Some(fix) => tracing::debug!(
                client = %client.name,
                breite = %fix.breite,
                laenge = %fix.laenge,
                hoehe = %fix.hoehe,
                "GPS-Position"
            ),
            None => tracing::trace!(client = %client.name, "GPS-Keepalive"),
        }
    }

    fn audio_verarbeiten(
        &mut self,
        index: ClientIndex,
        zeit: VoterZeit,
        rssi: u8,
        audio: &Frame,
        t: Zeitpunkt,
    ) -> Vec<Sendung> {
        let (knoten, master) = {
            let c = self.registry.client(index);
            (c.knoten, c.master)
        };
        let Some(kanal_pos) = self.kanaele.iter().position(|k| k.knoten == knoten) else {
            tracing::trace!(knoten = %knoten, "Kein offener Kanal fuer Knoten");
            self.statistik.pakete_verworfen += 1;
            return Vec::new();
        };

        if master {
            if self.uhr.aktualisieren(zeit, t.monoton) {
                tracing::info!(
                    client = %self.registry.client(index).name,
                    "Master-Takt synchronisiert"
                );
                for kanal in &mut self.kanaele {
                    kanal.ausgang.clear();
                }
            }
        } else if !uhr::synchron(zeit, t.wand) {
            tracing::debug!(
                client = %self.registry.client(index).name,
                abweichung_ms = zeit.differenz_ns(&t.wand) / 1_000_000,
                "Zeitstempel ausserhalb der Toleranz"
            );
            self.statistik.pakete_verworfen += 1;
            return Vec::new();
        }

        let Some(referenz) = self.uhr.referenz() else {
            self.statistik.pakete_verworfen += 1;
            return Vec::new();
        };

        match uhr::platzierung(zeit, referenz, self.verzoegerung, self.puffer_laenge) {
            Some(offset) => {
                let position = (self.kanaele[kanal_pos].drain_index + offset) % self.puffer_laenge;
                let client = self.registry.client_mut(index);
                client.platzieren(position, rssi, audio);
                tracing::trace!(client = %client.name, offset, rssi, "Frame platziert");
            }
            None => {
                tracing::debug!(
                    client = %self.registry.client(index).name,
                    "Frame ausserhalb des Pufferfensters"
                );
                self.statistik.pakete_verworfen += 1;
            }
        }

        if master {
            self.master_takt(t)
        } else {
            Vec::new()
        }
    }

    fn master_verloren(&mut self) {
        tracing::warn!("Master-Takt verloren – Puffer und Kanaele zurueckgesetzt");
        self.uhr.zuruecksetzen();
        self.registry.alle_puffer_leeren();
        for kanal in &mut self.kanaele {
            kanal.zuruecksetzen();
        }
    }

    /// Ein Frame-Takt: Clients pruefen, abstimmen, senden
    fn master_takt(&mut self, t: Zeitpunkt) -> Vec<Sendung> {
        self.registry.zeitueberschreitungen_pruefen(t.monoton);
        if self.adressen_pruefen {
            self.registry.adressen_pruefen();
        }

        let mut sendungen = Vec::new();
        for i in 0..self.kanaele.len() {
            self.kanal_abstimmen(i, t);
            self.kanal_senden(i, t, &mut sendungen);
        }
        sendungen
    }

    fn kanal_abstimmen(&mut self, i: usize, t: Zeitpunkt) {
        let kanal = &mut self.kanaele[i];
        let teilnehmer = self.registry.von_knoten(kanal.knoten);
        let ergebnis = abstimmung::abstimmen(
            &mut self.registry,
            &teilnehmer,
            kanal.drain_index,
            &mut kanal.auswahl,
            kanal.letzter_gewinner,
        );
        kanal.drain_vorruecken(self.puffer_laenge);

        let Some(ergebnis) = ergebnis else {
            return;
        };
        if kanal.empfang_gesperrt() {
            tracing::trace!(knoten = %kanal.knoten, "Halbduplex, Empfang unterdrueckt");
            kanal.empfang_beenden();
            return;
        }
        let name = &self.registry.client(ergebnis.gewinner).name;
        kanal.gewonnen(ergebnis.gewinner, name, ergebnis.frame, t.monoton);
        self.statistik.frames_abgestimmt += 1;
    }

    /// Sendeaudio an sendefaehige Clients, Keepalives an alle stillen Clients des Knotens
    fn kanal_senden(&mut self, i: usize, t: Zeitpunkt, sendungen: &mut Vec<Sendung>) {
        let kanal = &mut self.kanaele[i];
        let knoten = kanal.knoten;
        let frame = kanal.ausgang_entnehmen();
        let referenz = self.uhr.referenz().unwrap_or(t.wand);
        let challenge = *self.registry.challenge();

        for client in self
            .registry
            .clients_mut()
            .iter_mut()
            .filter(|c| c.knoten == knoten && c.erreichbar())
        {
            let Some(ziel) = client.adresse else { continue };

            if let (Some(frame), true) = (frame, client.darf_senden) {
                client.tx_sequenz = client.tx_sequenz.wrapping_add(1);
                let zeit = VoterZeit::neu(referenz.sekunden, client.tx_sequenz);
                let paket = VoterPaket::audio(zeit, challenge, client.antwort_digest, 0, frame);
                sendungen.push(Sendung {
                    ziel,
                    daten: paket.encode(),
                });
                client.zuletzt_gesendet = Some(t.monoton);
                self.statistik.frames_gesendet += 1;
                continue;
            }

            let faellig = client.zuletzt_gesendet.map_or(true, |s| {
                t.monoton.saturating_duration_since(s) >= KEEPALIVE_INTERVALL
            });
            if faellig {
                let paket = VoterPaket::keepalive(referenz, challenge, client.antwort_digest);
                sendungen.push(Sendung {
                    ziel,
                    daten: paket.encode(),
                });
                client.zuletzt_gesendet = Some(t.monoton);
                tracing::trace!(client = %client.name, "Keepalive gesendet");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
