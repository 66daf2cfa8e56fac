//! Gemeinsame Identifikationstypen
//!
//! Newtype-Pattern, damit Knotennummern und Client-Indizes zur Compilezeit
//! nicht verwechselt werden koennen.

use serde::{Deserialize, Serialize};

/// Nummer eines logischen Repeater-Knotens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeNummer(pub u32);

impl NodeNummer {
    /// Gibt die rohe Nummer zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeNummer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl From<u32> for NodeNummer {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

/// Position eines Clients in der Registrierungsreihenfolge
///
/// Die Reihenfolge entspricht der Konfiguration und ist gleichzeitig die
/// Tie-Break-Reihenfolge beim Voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIndex(pub usize);

impl std::fmt::Display for ClientIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{}", self.0)
    }
}
