//! Prometheus-kompatible Metriken fuer die Votebridge
//!
//! Registrierte Metriken:
//! - `votebridge_packets_received_total` – Counter: Empfangene UDP-Pakete
//! - `votebridge_packets_dropped_total` – Counter: Verworfene Pakete
//! - `votebridge_auth_replies_total` – Counter: Gesendete Auth-Antworten
//! - `votebridge_frames_voted_total` – Counter: Abgestimmte Frames
//! - `votebridge_frames_relayed_total` – Counter: An Empfaenger gesendete Frames
//! - `votebridge_clients_authenticated` – Gauge: Angemeldete Empfaenger
//! - `votebridge_channels_open` – Gauge: Offene Kanaele
//! - `votebridge_master_synchronized` – Gauge: 1 wenn Master-Takt vorhanden
//!
//! Die Engine zaehlt selbst; die Counter werden aus ihrem Status nachgezogen.

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use votebridge_voter::EngineStatus;

/// Alle Votebridge-Prometheus-Metriken
#[derive(Clone)]
pub struct VoterMetrics {
    pub registry: Arc<Registry>,

    pub pakete_empfangen: IntCounter,
    pub pakete_verworfen: IntCounter,
    pub auth_antworten: IntCounter,
    pub frames_abgestimmt: IntCounter,
    pub frames_gesendet: IntCounter,

    pub angemeldete_clients: IntGauge,
    pub offene_kanaele: IntGauge,
    pub master_synchron: IntGauge,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn anzeige(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Zieht einen Counter auf den absoluten Stand der Engine nach
fn nachziehen(counter: &IntCounter, stand: u64) {
    let alt = counter.get();
    if stand > alt {
        counter.inc_by(stand - alt);
    }
}

impl VoterMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let pakete_empfangen = zaehler(
            &registry,
            "votebridge_packets_received_total",
            "Gesamtanzahl empfangener UDP-Pakete",
        )?;
        let pakete_verworfen = zaehler(
            &registry,
            "votebridge_packets_dropped_total",
            "Ungueltige oder nicht platzierbare Pakete",
        )?;
        let auth_antworten = zaehler(
            &registry,
            "votebridge_auth_replies_total",
            "Gesendete Challenge-/Auth-Antworten",
        )?;
        let frames_abgestimmt = zaehler(
            &registry,
            "votebridge_frames_voted_total",
            "An den Host gelieferte Gewinner-Frames",
        )?;
        let frames_gesendet = zaehler(
            &registry,
            "votebridge_frames_relayed_total",
            "An Empfaenger gesendete Audio-Frames",
        )?;

        let angemeldete_clients = anzeige(
            &registry,
            "votebridge_clients_authenticated",
            "Aktuell angemeldete Empfaenger",
        )?;
        let offene_kanaele = anzeige(
            &registry,
            "votebridge_channels_open",
            "Aktuell geoeffnete Kanaele",
        )?;
        let master_synchron = anzeige(
            &registry,
            "votebridge_master_synchronized",
            "1 wenn eine Master-Zeitreferenz besteht",
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            pakete_empfangen,
            pakete_verworfen,
            auth_antworten,
            frames_abgestimmt,
            frames_gesendet,
            angemeldete_clients,
            offene_kanaele,
            master_synchron,
        })
    }

    /// Uebernimmt eine Momentaufnahme der Engine
    pub fn aktualisieren(&self, status: &EngineStatus) {
        let s = &status.statistik;
        nachziehen(&self.pakete_empfangen, s.pakete_empfangen);
        nachziehen(&self.pakete_verworfen, s.pakete_verworfen);
        nachziehen(&self.auth_antworten, s.auth_antworten);
        nachziehen(&self.frames_abgestimmt, s.frames_abgestimmt);
        nachziehen(&self.frames_gesendet, s.frames_gesendet);

        self.angemeldete_clients
            .set(status.angemeldete_clients() as i64);
        self.offene_kanaele.set(status.offene_kanaele as i64);
        self.master_synchron.set(i64::from(status.master_synchron));
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: VoterMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<VoterMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use votebridge_voter::engine::EngineStatistik;

    fn status(empfangen: u64, synchron: bool) -> EngineStatus {
        EngineStatus {
            master_konfiguriert: true,
            master_synchron: synchron,
            offene_kanaele: 2,
            clients: Vec::new(),
            statistik: EngineStatistik {
                pakete_empfangen: empfangen,
                pakete_verworfen: 3,
                ..Default::default()
            },
        }
    }

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = VoterMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn counter_folgen_engine_stand() {
        let metriken = VoterMetrics::neu().unwrap();
        metriken.aktualisieren(&status(10, true));
        assert_eq!(metriken.pakete_empfangen.get(), 10);
        assert_eq!(metriken.pakete_verworfen.get(), 3);

        metriken.aktualisieren(&status(25, false));
        assert_eq!(metriken.pakete_empfangen.get(), 25);
        assert_eq!(metriken.pakete_verworfen.get(), 3);
        assert_eq!(metriken.master_synchron.get(), 0);
        assert_eq!(metriken.offene_kanaele.get(), 2);
    }

    #[test]
    fn counter_laufen_nie_rueckwaerts() {
        let metriken = VoterMetrics::neu().unwrap();
        metriken.aktualisieren(&status(10, true));
        metriken.aktualisieren(&status(4, true));
        assert_eq!(metriken.pakete_empfangen.get(), 10);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = VoterMetrics::neu().unwrap();
        metriken.aktualisieren(&status(1, true));

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("votebridge_packets_received_total 1"));
        assert!(output.contains("votebridge_master_synchronized 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn registries_sind_unabhaengig() {
        let a = VoterMetrics::neu().unwrap();
        let b = VoterMetrics::neu().unwrap();
        a.pakete_empfangen.inc();
        assert_eq!(b.pakete_empfangen.get(), 0);
    }
}
