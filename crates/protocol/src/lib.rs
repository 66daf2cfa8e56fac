//! votebridge-protocol – Voter-Netzwerkprotokoll
//!
//! Binaeres UDP-Paketformat der Empfaenger ("Voter") sowie die
//! Challenge/Digest-Authentifizierung.

pub mod digest;
pub mod voter;

pub use digest::{pruefsumme, Challenge};
pub use voter::{PaketFehler, PayloadTyp, VoterHeader, VoterPaket, VoterZeit};
