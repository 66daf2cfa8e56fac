//! Konfiguration der Voting-Engine
//!
//! Reine Datenstrukturen. Das Einlesen aus TOML uebernimmt der Server,
//! die Pruefung auf doppelte oder ungueltige Digests die Registry.

use votebridge_core::{NodeNummer, Result, VoterError};
use votebridge_protocol::voter::{FRAME_GROESSE, SAMPLES_PRO_MS};
use votebridge_protocol::Challenge;

use crate::abstimmung::{Schwelle, TestModus};

/// Standard-Pufferlaenge in Millisekunden
pub const STANDARD_PUFFER_MS: u32 = 500;

/// Konfiguration eines Empfaengers
#[derive(Debug, Clone)]
pub struct ClientKonfig {
    pub name: String,
    pub geheimnis: String,
    pub knoten: NodeNummer,
    /// Liefert den Master-Takt
    pub master: bool,
    /// Erhaelt Sendeaudio vom Host
    pub darf_senden: bool,
    /// Hoehere Prioritaet mit Signal schlaegt jedes RSSI niedrigerer Prioritaet
    pub prioritaet: i32,
}

impl ClientKonfig {
    pub fn neu(name: impl Into<String>, geheimnis: impl Into<String>, knoten: NodeNummer) -> Self {
        Self {
            name: name.into(),
            geheimnis: geheimnis.into(),
            knoten,
            master: false,
            darf_senden: false,
            prioritaet: 0,
        }
    }

    pub fn als_master(mut self) -> Self {
        self.master = true;
        self
    }

    pub fn mit_senden(mut self) -> Self {
        self.darf_senden = true;
        self
    }

    pub fn mit_prioritaet(mut self, prioritaet: i32) -> Self {
        self.prioritaet = prioritaet;
        self
    }
}

/// Einstellungen eines Knotens
#[derive(Debug, Clone)]
pub struct KnotenKonfig {
    pub knoten: NodeNummer,
    /// Bei `false` wird Empfangsaudio unterdrueckt, solange gesendet wird
    pub duplex: bool,
    pub testmodus: TestModus,
    /// Haltegrenzen fuer den letzten Gewinner, geprueft in dieser Reihenfolge
    pub schwellen: Vec<Schwelle>,
}

impl KnotenKonfig {
    pub fn neu(knoten: NodeNummer) -> Self {
        Self {
            knoten,
            duplex: true,
            testmodus: TestModus::Aus,
            schwellen: Vec::new(),
        }
    }
}

/// Gesamtkonfiguration der Engine
#[derive(Debug, Clone)]
pub struct VoterConfig {
    /// Server-Passwort fuer die Antwort-Digests
    pub passwort: String,
    /// Server-Challenge, wird beim Start zufaellig erzeugt
    pub challenge: Challenge,
    /// Laenge der Ringpuffer in Millisekunden
    pub puffer_ms: u32,
    /// Drain-Verzoegerung in Millisekunden, `None` = Pufferlaenge minus zwei Frames
    pub verzoegerung_ms: Option<u32>,
    /// Zwei Clients auf derselben Adresse werden beide abgemeldet
    pub adressen_pruefen: bool,
    pub knoten: Vec<KnotenKonfig>,
    pub clients: Vec<ClientKonfig>,
}

impl VoterConfig {
    /// Erstellt eine Konfiguration mit Standardwerten und zufaelliger Challenge
    pub fn neu(passwort: impl Into<String>) -> Self {
        Self {
            passwort: passwort.into(),
            challenge: Challenge::zufaellig(),
            puffer_ms: STANDARD_PUFFER_MS,
            verzoegerung_ms: None,
            adressen_pruefen: true,
            knoten: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// Fuegt einen Client hinzu; der Knoten wird bei Bedarf mit Standardwerten angelegt
    pub fn client(mut self, client: ClientKonfig) -> Self {
        if !self.knoten.iter().any(|k| k.knoten == client.knoten) {
            self.knoten.push(KnotenKonfig::neu(client.knoten));
        }
        self.clients.push(client);
        self
    }

    /// Pufferlaenge in Samples
    ///
    /// Abgerundet auf ganze Frames, mindestens zwei Frames.
    pub fn puffer_laenge(&self) -> usize {
        let roh = self.puffer_ms as usize * SAMPLES_PRO_MS;
        (roh - roh % FRAME_GROESSE).max(FRAME_GROESSE * 2)
    }

    /// Drain-Verzoegerung in Samples, begrenzt auf die Pufferlaenge
    pub fn verzoegerung(&self) -> usize {
        let laenge = self.puffer_laenge();
        match self.verzoegerung_ms {
            Some(ms) => (ms as usize * SAMPLES_PRO_MS).min(laenge),
            None => laenge - FRAME_GROESSE * 2,
        }
    }

    /// Prueft den Teil der Konfiguration, der ohne Digests pruefbar ist
    pub fn pruefen(&self) -> Result<()> {
        if self.passwort.is_empty() {
            return Err(VoterError::konfiguration("Server-Passwort fehlt"));
        }
        if self.challenge.ist_leer() {
            return Err(VoterError::konfiguration("Server-Challenge ist leer"));
        }
        for client in &self.clients {
            if !self.knoten.iter().any(|k| k.knoten == client.knoten) {
                return Err(VoterError::konfiguration(format!(
                    "Client '{}' verweist auf unbekannten Knoten {}",
                    client.name, client.knoten
                )));
            }
        }
        for (i, k) in self.knoten.iter().enumerate() {
            if self.knoten[..i].iter().any(|v| v.knoten == k.knoten) {
                return Err(VoterError::konfiguration(format!(
                    "Knoten {} doppelt konfiguriert",
                    k.knoten
                )));
            }
        }
        Ok(())
    }
}
