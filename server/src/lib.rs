//! votebridge-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Voting-Engine, UDP-Loop und Observability.

pub mod config;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use config::ServerConfig;
use tokio::sync::oneshot;
use votebridge_observability::{observability_server_starten, HealthState, VoterMetrics};
use votebridge_voter::{
    HostFrame, KanalHandle, VoterEngine, VoterHandle, VoterServer, VoterServerConfig,
};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Voting-Engine aus der Konfiguration bauen (Fehler hier sind fatal)
    /// 2. UDP-Socket binden und Netzwerk-Loop starten
    /// 3. Beobachtete Kanaele oeffnen
    /// 4. Observability-Server und Status-Abfrage starten
    /// 5. Auf Ctrl-C warten
    pub async fn starten(self) -> Result<()> {
        let engine = VoterEngine::neu(self.config.engine_config())
            .context("Voting-Engine konnte nicht erstellt werden")?;

        let udp_adresse: SocketAddr = self
            .config
            .udp_bind_adresse()
            .parse()
            .context("Ungueltige UDP-Bind-Adresse")?;
        let mut voter_config = VoterServerConfig::neu(udp_adresse);
        voter_config.takt = Duration::from_millis(self.config.netzwerk.takt_ms.max(1));

        let server = VoterServer::binden(voter_config, engine)
            .await
            .with_context(|| format!("UDP-Socket {udp_adresse} konnte nicht gebunden werden"))?;
        let handle = server.handle();

        tracing::info!(
            udp = %udp_adresse,
            knoten = self.config.knoten.len(),
            "Server startet"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let loop_task = tokio::spawn(server.empfangs_loop_starten(shutdown_rx));

        for knoten in self.config.knoten.iter().filter(|k| k.beobachten) {
            let kanal = handle.kanal_oeffnen(knoten.knoten).await?;
            tokio::spawn(kanal_beobachten(kanal));
        }

        if self.config.observability.aktiviert {
            self.observability_starten(handle.clone())?;
        }

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(());
        loop_task.await?;
        Ok(())
    }

    fn observability_starten(&self, handle: VoterHandle) -> Result<()> {
        let adresse: SocketAddr = self
            .config
            .observability_bind_adresse()
            .parse()
            .context("Ungueltige Observability-Bind-Adresse")?;
        let metriken = VoterMetrics::neu()?;
        let health = HealthState::neu();

        let intervall = Duration::from_secs(self.config.observability.status_intervall_s.max(1));
        tokio::spawn(status_abfragen(handle, metriken.clone(), health.clone(), intervall));

        tokio::spawn(async move {
            if let Err(e) = observability_server_starten(adresse, metriken, health).await {
                tracing::error!(fehler = %e, "Observability-Server beendet");
            }
        });
        Ok(())
    }
}

/// Zieht Metriken und Health-Zustand periodisch aus der Engine nach
async fn status_abfragen(
    handle: VoterHandle,
    metriken: VoterMetrics,
    health: HealthState,
    intervall: Duration,
) {
    let mut takt = tokio::time::interval(intervall);
    loop {
        takt.tick().await;
        match handle.status().await {
            Ok(status) => {
                metriken.aktualisieren(&status);
                health.aktualisieren(&status);
            }
            Err(_) => {
                tracing::debug!("Engine beendet, Status-Abfrage endet");
                break;
            }
        }
    }
}

/// Minimaler Host: protokolliert Empfangstaste und Gewinnerwechsel eines Knotens
async fn kanal_beobachten(mut kanal: KanalHandle) {
    let knoten = kanal.knoten();
    let mut frames: u64 = 0;
    while let Some(frame) = kanal.frame_erwarten().await {
        match frame {
            HostFrame::Empfangstaste(true) => {
                tracing::info!(knoten = %knoten, "Empfang beginnt");
            }
            HostFrame::Empfangstaste(false) => {
                tracing::info!(knoten = %knoten, frames, "Empfang beendet");
                frames = 0;
            }
            HostFrame::Gewinner(name) => {
                tracing::info!(knoten = %knoten, client = %name, "Gewinner");
            }
            HostFrame::Sprache(_) => frames += 1,
            HostFrame::Leer => {}
        }
    }
    tracing::debug!(knoten = %knoten, "Beobachtung beendet");
}
