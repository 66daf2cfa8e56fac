//! UDP Voter Server – Netzwerk-Loop der Voting-Engine
//!
//! Ein einziger Task besitzt Socket und [`VoterEngine`]. Alles, was von
//! aussen kommt (Pakete, Host-Befehle, Takt), wird in diesem Task
//! nacheinander verarbeitet; es gibt keine Locks.
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv_from) ─┐
//! VoterHandle (mpsc) ─────┼──> tokio::select! ──> VoterEngine
//! Takt (interval) ────────┘                          |
//!                                                    v
//!                                         Vec<Sendung> --> send_to
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use votebridge_core::{NodeNummer, Result, VoterError};

use crate::abstimmung::TestModus;
use crate::engine::{EngineStatus, Sendung, VoterEngine, Zeitpunkt};
use crate::kanal::KanalHandle;
use crate::registry::PrioUebersteuerung;

/// Groesster erwarteter Datagramm (Header 24 + RSSI + 160 Samples, mit Reserve)
const UDP_BUFFER_SIZE: usize = 1500;

/// Kapazitaet der Steuerungs-Queue
const STEUERUNG_QUEUE: usize = 32;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den UDP Voter Server
#[derive(Debug, Clone)]
pub struct VoterServerConfig {
    /// Bind-Adresse (z.B. "0.0.0.0:667")
    pub bind_addr: SocketAddr,
    /// Intervall fuer Host-Befehle und Empfangs-Timeouts ohne eingehende Pakete
    pub takt: Duration,
}

impl VoterServerConfig {
    pub fn neu(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            takt: Duration::from_millis(50),
        }
    }
}

// ---------------------------------------------------------------------------
// Steuerung
// ---------------------------------------------------------------------------

/// Anfragen an die laufende Engine
#[derive(Debug)]
pub enum Steuerung {
    KanalOeffnen {
        knoten: NodeNummer,
        antwort: oneshot::Sender<Result<KanalHandle>>,
    },
    Status {
        antwort: oneshot::Sender<EngineStatus>,
    },
    Testmodus {
        knoten: NodeNummer,
        modus: TestModus,
        antwort: oneshot::Sender<Result<()>>,
    },
    Prioritaet {
        client: String,
        uebersteuerung: PrioUebersteuerung,
        antwort: oneshot::Sender<Result<()>>,
    },
}

/// Klonbarer Zugriff auf die Engine von ausserhalb der Netzwerk-Loop
#[derive(Debug, Clone)]
pub struct VoterHandle {
    tx: mpsc::Sender<Steuerung>,
}

impl VoterHandle {
    /// Oeffnet den Kanal eines Knotens
    pub async fn kanal_oeffnen(&self, knoten: NodeNummer) -> Result<KanalHandle> {
        let (antwort, rx) = oneshot::channel();
        self.anfragen(Steuerung::KanalOeffnen { knoten, antwort }, rx)
            .await?
    }

    /// Momentaufnahme der Engine
    pub async fn status(&self) -> Result<EngineStatus> {
        let (antwort, rx) = oneshot::channel();
        self.anfragen(Steuerung::Status { antwort }, rx).await
    }

    /// Aendert den Testmodus eines Knotens zur Laufzeit
    pub async fn testmodus_setzen(&self, knoten: NodeNummer, modus: TestModus) -> Result<()> {
        let (antwort, rx) = oneshot::channel();
        self.anfragen(
            Steuerung::Testmodus {
                knoten,
                modus,
                antwort,
            },
            rx,
        )
        .await?
    }

    /// Uebersteuert die Prioritaet eines Clients oder schliesst ihn aus
    pub async fn prioritaet_setzen(
        &self,
        client: impl Into<String>,
        uebersteuerung: PrioUebersteuerung,
    ) -> Result<()> {
        let (antwort, rx) = oneshot::channel();
        self.anfragen(
            Steuerung::Prioritaet {
                client: client.into(),
                uebersteuerung,
                antwort,
            },
            rx,
        )
        .await?
    }

    async fn anfragen<T>(&self, steuerung: Steuerung, rx: oneshot::Receiver<T>) -> Result<T> {
        self.tx
            .send(steuerung)
            .await
            .map_err(|_| VoterError::EngineBeendet)?;
        rx.await.map_err(|_| VoterError::EngineBeendet)
    }
}

// ---------------------------------------------------------------------------
// VoterServer
// ---------------------------------------------------------------------------

/// UDP Voter Server
pub struct VoterServer {
    config: VoterServerConfig,
    socket: UdpSocket,
    engine: VoterEngine,
    steuerung_tx: mpsc::Sender<Steuerung>,
    steuerung_rx: mpsc::Receiver<Steuerung>,
}

impl VoterServer {
    /// Bindet den UDP-Socket
    pub async fn binden(config: VoterServerConfig, engine: VoterEngine) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        tracing::info!(addr = %config.bind_addr, "UDP Voter Server gebunden");

        let (steuerung_tx, steuerung_rx) = mpsc::channel(STEUERUNG_QUEUE);
        Ok(Self {
            config,
            socket,
            engine,
            steuerung_tx,
            steuerung_rx,
        })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn handle(&self) -> VoterHandle {
        VoterHandle {
            tx: self.steuerung_tx.clone(),
        }
    }

    /// Startet die Empfangs-Loop (laeuft bis `shutdown_rx` ein Signal sendet)
    ///
    /// Die Engine wird in die Loop verschoben; Zugriff danach nur noch
    /// ueber [`VoterHandle`].
    pub async fn empfangs_loop_starten(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let Self {
            config,
            socket,
            mut engine,
            steuerung_tx,
            mut steuerung_rx,
        } = self;
        drop(steuerung_tx);

        let mut buf = [0u8; UDP_BUFFER_SIZE];
        let mut takt = tokio::time::interval(config.takt);
        takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Voter-Empfangs-Loop gestartet");

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, absender)) => {
                            let sendungen =
                                engine.paket_verarbeiten(&buf[..len], absender, Zeitpunkt::jetzt());
                            senden(&socket, sendungen).await;
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                }

                Some(steuerung) = steuerung_rx.recv() => {
                    steuerung_ausfuehren(&mut engine, steuerung);
                }

                _ = takt.tick() => {
                    engine.takt(Zeitpunkt::jetzt());
                }

                _ = &mut shutdown_rx => {
                    tracing::info!("Voter-Server: Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        tracing::info!("Voter-Empfangs-Loop beendet");
    }
}

fn steuerung_ausfuehren(engine: &mut VoterEngine, steuerung: Steuerung) {
    // Ein abgebrochener Aufrufer ist kein Fehler der Engine
    match steuerung {
        Steuerung::KanalOeffnen { knoten, antwort } => {
            let _ = antwort.send(engine.kanal_oeffnen(knoten));
        }
        Steuerung::Status { antwort } => {
            let _ = antwort.send(engine.status());
        }
        Steuerung::Testmodus {
            knoten,
            modus,
            antwort,
        } => {
            let _ = antwort.send(engine.testmodus_setzen(knoten, modus));
        }
        Steuerung::Prioritaet {
            client,
            uebersteuerung,
            antwort,
        } => {
            let _ = antwort.send(engine.prioritaet_setzen(&client, uebersteuerung));
        }
    }
}

async fn senden(socket: &UdpSocket, sendungen: Vec<Sendung>) {
    for sendung in sendungen {
        match socket.send_to(&sendung.daten, sendung.ziel).await {
            Ok(_) => {
                tracing::trace!(
                    bytes = sendung.daten.len(),
                    ziel = %sendung.ziel,
                    "UDP-Paket gesendet"
                );
            }
            Err(e) => {
                tracing::warn!(fehler = %e, ziel = %sendung.ziel, "UDP-Sendefehler");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
