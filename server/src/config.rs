//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Abschnitte haben
//! Standardwerte; ohne `[[knoten]]` startet die Engine ohne Clients.
//!
//! ```toml
//! [voter]
//! passwort = "geheim"
//!
//! [[knoten]]
//! knoten = 1999
//!
//! [[knoten.clients]]
//! name = "master"
//! geheimnis = "m-geheim"
//! master = true
//! ```

use serde::{Deserialize, Serialize};
use votebridge_core::NodeNummer;
use votebridge_protocol::Challenge;
use votebridge_voter::config::STANDARD_PUFFER_MS;
use votebridge_voter::abstimmung::STANDARD_NACHLAUF;
use votebridge_voter::{ClientKonfig, KnotenKonfig, Schwelle, TestModus, VoterConfig};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Voting-Einstellungen
    pub voter: VoterEinstellungen,
    /// Knoten mit ihren Empfaengern
    pub knoten: Vec<KnotenEinstellungen>,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// UDP-Port fuer Voter-Pakete
    pub udp_port: u16,
    /// Takt der Netzwerk-Loop ohne eingehende Pakete
    pub takt_ms: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            udp_port: 667,
            takt_ms: 50,
        }
    }
}

/// Voting-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoterEinstellungen {
    /// Server-Passwort fuer die Antwort-Digests (Pflicht)
    pub passwort: String,
    /// Feste Server-Challenge (leer = zufaellig pro Start)
    pub challenge: Option<String>,
    /// Pufferlaenge in Millisekunden
    pub puffer_ms: u32,
    /// Drain-Verzoegerung in Millisekunden (leer = Puffer minus zwei Frames)
    pub verzoegerung_ms: Option<u32>,
    /// Clients mit gleicher Absenderadresse abmelden
    pub adressen_pruefen: bool,
    /// Testmodus fuer alle Knoten: 0 = aus, 1 = Zufall, n = zyklisch
    pub testmodus: u32,
    /// Client, der im Testmodus immer gewinnt
    pub erzwungen: Option<String>,
}

impl Default for VoterEinstellungen {
    fn default() -> Self {
        Self {
            passwort: String::new(),
            challenge: None,
            puffer_ms: STANDARD_PUFFER_MS,
            verzoegerung_ms: None,
            adressen_pruefen: true,
            testmodus: 0,
            erzwungen: None,
        }
    }
}

fn standard_ja() -> bool {
    true
}

fn standard_nachlauf() -> u16 {
    STANDARD_NACHLAUF
}

/// Ein Knoten und seine Empfaenger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnotenEinstellungen {
    pub knoten: NodeNummer,
    #[serde(default = "standard_ja")]
    pub duplex: bool,
    /// Ueberschreibt `voter.testmodus`
    #[serde(default)]
    pub testmodus: Option<u32>,
    /// Ueberschreibt `voter.erzwungen`
    #[serde(default)]
    pub erzwungen: Option<String>,
    /// Kanal beim Start oeffnen und Gewinnerwechsel protokollieren
    #[serde(default = "standard_ja")]
    pub beobachten: bool,
    /// Haltegrenzen fuer den letzten Gewinner
    #[serde(default)]
    pub schwellen: Vec<SchwellenEinstellungen>,
    /// Nachlauf in Frames fuer Schwellen ohne eigenen Wert
    #[serde(default = "standard_nachlauf")]
    pub nachlauf: u16,
    #[serde(default)]
    pub clients: Vec<ClientEinstellungen>,
}

/// Eine Haltegrenze
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchwellenEinstellungen {
    pub rssi: u8,
    /// Frames, nach denen das Halten endet (0 = nie)
    #[serde(default)]
    pub anzahl: u16,
    /// Ueberschreibt `knoten.nachlauf`
    #[serde(default)]
    pub nachlauf: Option<u16>,
}

/// Ein Empfaenger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEinstellungen {
    pub name: String,
    pub geheimnis: String,
    #[serde(default)]
    pub master: bool,
    /// Erhaelt Sendeaudio vom Host
    #[serde(default)]
    pub senden: bool,
    /// Abstimmungsprioritaet, hoeher schlaegt niedriger
    #[serde(default)]
    pub prioritaet: i32,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
    /// Intervall, in dem der Engine-Status abgefragt wird
    pub status_intervall_s: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            status_intervall_s: 5,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Bind-Adresse fuer den Voter-UDP-Socket
    pub fn udp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.udp_port)
    }

    /// Bind-Adresse fuer den Observability-Server
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }

    /// Uebersetzt in die Engine-Konfiguration
    ///
    /// Geprueft wird erst beim Erstellen der Engine.
    pub fn engine_config(&self) -> VoterConfig {
        let v = &self.voter;
        let mut config = VoterConfig::neu(v.passwort.clone());
        if let Some(challenge) = v.challenge.as_deref().filter(|c| !c.is_empty()) {
            config.challenge = Challenge::aus_str(challenge);
        }
        config.puffer_ms = v.puffer_ms;
        config.verzoegerung_ms = v.verzoegerung_ms;
        config.adressen_pruefen = v.adressen_pruefen;

        for k in &self.knoten {
            let erzwungen = k.erzwungen.as_deref().or(v.erzwungen.as_deref());
            config.knoten.push(KnotenKonfig {
                knoten: k.knoten,
                duplex: k.duplex,
                testmodus: TestModus::aus_wert(k.testmodus.unwrap_or(v.testmodus), erzwungen),
                schwellen: k
                    .schwellen
                    .iter()
                    .map(|s| Schwelle {
                        rssi: s.rssi,
                        anzahl: s.anzahl,
                        nachlauf: s.nachlauf.unwrap_or(k.nachlauf),
                    })
                    .collect(),
            });
            for c in &k.clients {
                let mut client = ClientKonfig::neu(c.name.clone(), c.geheimnis.clone(), k.knoten);
                client.master = c.master;
                client.darf_senden = c.senden;
                client.prioritaet = c.prioritaet;
                config.clients.push(client);
            }
        }
        config
    }
}
