//! Fehlertypen fuer die Votebridge
//!
//! Zur Laufzeit werden Fehler lokal behandelt (Paket verwerfen, weiter).
//! Fatal sind nur Konfigurationsfehler: die Engine startet dann nicht.

use thiserror::Error;

/// Globaler Result-Alias fuer die Votebridge
pub type Result<T> = std::result::Result<T, VoterError>;

/// Alle Fehlerzustaende der Voting-Engine
#[derive(Debug, Error)]
pub enum VoterError {
    // --- Konfiguration (fatal beim Start) ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Doppelter Digest {digest:08x}: Clients '{erster}' und '{zweiter}'")]
    DoppelterDigest {
        digest: u32,
        erster: String,
        zweiter: String,
    },

    #[error("Client '{0}' hat einen ungueltigen Digest (0)")]
    UngueltigerDigest(String),

    #[error("Client '{0}' hat kein Geheimnis konfiguriert")]
    LeeresGeheimnis(String),

    // --- Host-Schnittstelle ---
    #[error("Unbekannter Knoten: {0}")]
    UnbekannterKnoten(u32),

    #[error("Kanal fuer Knoten {0} ist bereits geoeffnet")]
    KanalBelegt(u32),

    #[error("Unbekannter Client: {0}")]
    UnbekannterClient(String),

    #[error("Kanal geschlossen")]
    KanalGeschlossen,

    #[error("Voting-Engine laeuft nicht mehr")]
    EngineBeendet,

    // --- Protokoll ---
    #[error("Ungueltiges Paket: {0}")]
    Paket(String),

    // --- Netzwerk ---
    #[error("Netzwerkfehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl VoterError {
    /// Erstellt einen Konfigurationsfehler aus einer beliebigen Nachricht
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler den Start der Engine verhindert
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::Konfiguration(_)
                | Self::DoppelterDigest { .. }
                | Self::UngueltigerDigest(_)
                | Self::LeeresGeheimnis(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = VoterError::LeeresGeheimnis("nord".into());
        assert_eq!(e.to_string(), "Client 'nord' hat kein Geheimnis konfiguriert");
    }

    #[test]
    fn doppelter_digest_zeigt_hex() {
        let e = VoterError::DoppelterDigest {
            digest: 0xBEEF,
            erster: "a".into(),
            zweiter: "b".into(),
        };
        let text = e.to_string();
        assert!(text.contains("0000beef"));
        assert!(text.contains("'a'"));
        assert!(text.contains("'b'"));
    }

    #[test]
    fn fatal_erkennung() {
        assert!(VoterError::konfiguration("kaputt").ist_fatal());
        assert!(VoterError::UngueltigerDigest("x".into()).ist_fatal());
        assert!(!VoterError::KanalGeschlossen.ist_fatal());
        assert!(!VoterError::Paket("zu kurz".into()).ist_fatal());
    }

    #[test]
    fn io_fehler_konvertierung() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "belegt");
        let e: VoterError = io.into();
        assert!(matches!(e, VoterError::Io(_)));
        assert!(e.to_string().starts_with("Netzwerkfehler"));
    }
}
