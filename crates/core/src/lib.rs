//! votebridge-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Protokoll, Voting-Engine
//! und Server gemeinsam nutzen.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, VoterError};
pub use types::{ClientIndex, NodeNummer};
