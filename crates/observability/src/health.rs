//! Health-Check-Endpunkt fuer die Votebridge
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Voter-Zustand
//!
//! `degraded` bedeutet: ein Master ist konfiguriert, liefert aber keinen
//! Takt. Es wird dann nicht abgestimmt.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use votebridge_voter::EngineStatus;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Zuletzt gemeldeter Engine-Zustand
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VoterZustand {
    pub master_konfiguriert: bool,
    pub master_synchron: bool,
    pub angemeldete_clients: usize,
    pub offene_kanaele: usize,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub voter: VoterZustand,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    zustand: Arc<RwLock<VoterZustand>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            zustand: Arc::new(RwLock::new(VoterZustand::default())),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn aktualisieren(&self, status: &EngineStatus) {
        *self.zustand.write() = VoterZustand {
            master_konfiguriert: status.master_konfiguriert,
            master_synchron: status.master_synchron,
            angemeldete_clients: status.angemeldete_clients(),
            offene_kanaele: status.offene_kanaele,
        };
    }

    pub fn zustand(&self) -> VoterZustand {
        self.zustand.read().clone()
    }

    pub fn status(&self) -> HealthStatus {
        let z = self.zustand.read();
        if !z.master_konfiguriert || z.master_synchron {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: state.status(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        voter: state.zustand(),
    };
    // 200 auch bei degraded (Health-Check soll nicht failen)
    (StatusCode::OK, Json(response))
}
