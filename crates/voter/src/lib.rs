//! votebridge-voter – Voting-Engine fuer Empfaenger-Netze
//!
//! Mehrere Funkempfaenger senden denselben Kanal als 20-ms-Frames per UDP.
//! Die Engine richtet alle Frames am Takt eines Master-Empfaengers aus und
//! waehlt pro Frame den Empfaenger mit dem staerksten Signal.
//!
//! ## Module
//! - [`ring_puffer`] – Generischer Ringpuffer mit Wraparound-Spannen
//! - [`config`] – Engine-Konfiguration (Clients, Knoten, Puffer)
//! - [`registry`] – Client-Registry und Digest-Authentifizierung
//! - [`uhr`] – Master-Takt und Platzierungsrechnung
//! - [`abstimmung`] – RSSI-Abstimmung, Prioritaeten, Schwellen und Testmodi
//! - [`kanal`] – Kanal-Instanz pro Knoten und Host-Handle
//! - [`engine`] – Engine-Kontext, Paketverarbeitung
//! - [`udp`] – UDP-Loop und Steuerungs-Handle

pub mod abstimmung;
pub mod config;
pub mod engine;
pub mod kanal;
pub mod registry;
pub mod ring_puffer;
pub mod udp;
pub mod uhr;

pub use abstimmung::{Schwelle, TestModus};
pub use config::{ClientKonfig, KnotenKonfig, VoterConfig};
pub use engine::{EngineStatus, Sendung, VoterEngine, Zeitpunkt};
pub use kanal::{HostFrame, KanalHandle, Steuersignal};
pub use registry::PrioUebersteuerung;
pub use udp::{VoterHandle, VoterServer, VoterServerConfig};
