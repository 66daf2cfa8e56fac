//! Client-Registry und Digest-Authentifizierung
//!
//! Statische Liste aller konfigurierten Empfaenger in Konfigurationsreihenfolge.
//! Eingehende Pakete werden ueber ihren Digest in O(1) einem Client
//! zugeordnet; die Socket-Adresse wird bei jedem Treffer neu gelernt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use votebridge_core::{ClientIndex, NodeNummer, Result, VoterError};
use votebridge_protocol::voter::{Frame, FRAME_GROESSE, STILLE};
use votebridge_protocol::Challenge;

use crate::config::ClientKonfig;
use crate::ring_puffer::RingPuffer;

/// Ohne Paket nach dieser Zeit gilt ein Client als getrennt
pub const CLIENT_TIMEOUT: Duration = Duration::from_millis(3000);

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Laufzeit-Uebersteuerung der konfigurierten Prioritaet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrioUebersteuerung {
    /// Konfigurierter Wert gilt
    #[default]
    Keine,
    /// Client stimmt nicht mit ab
    Ausgeschlossen,
    Wert(i32),
}

/// Ein konfigurierter Empfaenger samt Laufzeitzustand
#[derive(Debug)]
pub struct Client {
    pub name: String,
    pub knoten: NodeNummer,
    /// Digest aus Server-Challenge und Client-Geheimnis
    pub digest: u32,
    pub master: bool,
    pub darf_senden: bool,
    /// Konfigurierte Abstimmungsprioritaet
    pub konfig_prioritaet: i32,
    pub uebersteuerung: PrioUebersteuerung,
    pub audio: RingPuffer<u8>,
    pub rssi: RingPuffer<u8>,
    /// Zuletzt gesehene Absenderadresse
    pub adresse: Option<SocketAddr>,
    /// RSSI-Mittelwert des letzten abgestimmten Fensters
    pub letzter_rssi: u8,
    /// Digest fuer Pakete an diesen Client (0 = keiner)
    pub antwort_digest: u32,
    pub gehoert: bool,
    pub zuletzt_gehoert: Option<Instant>,
    pub zuletzt_gesendet: Option<Instant>,
    pub tx_sequenz: u32,
    pub(crate) letzte_warnung: Option<Instant>,
}

impl Client {
    fn neu(konfig: &ClientKonfig, digest: u32, puffer_laenge: usize) -> Self {
        Self {
            name: konfig.name.clone(),
            knoten: konfig.knoten,
            digest,
            master: konfig.master,
            darf_senden: konfig.darf_senden,
            konfig_prioritaet: konfig.prioritaet,
            uebersteuerung: PrioUebersteuerung::Keine,
            audio: RingPuffer::neu(puffer_laenge, STILLE),
            rssi: RingPuffer::neu(puffer_laenge, 0),
            adresse: None,
            letzter_rssi: 0,
            antwort_digest: 0,
            gehoert: false,
            zuletzt_gehoert: None,
            zuletzt_gesendet: None,
            tx_sequenz: 0,
            letzte_warnung: None,
        }
    }

    /// Legt einen Frame an `position` ab (Audio und RSSI gleich ausgerichtet)
    ///
    /// Bei RSSI 0 wird Stille gespeichert.
    pub fn platzieren(&mut self, position: usize, rssi: u8, audio: &Frame) {
        if rssi == 0 {
            self.audio.fuellen(position, FRAME_GROESSE, STILLE);
        } else {
            self.audio.schreiben(position, audio);
        }
        self.rssi.fuellen(position, FRAME_GROESSE, rssi);
    }

    /// Wirksame Prioritaet, `None` wenn von der Abstimmung ausgeschlossen
    pub fn prioritaet(&self) -> Option<i32> {
        match self.uebersteuerung {
            PrioUebersteuerung::Keine => Some(self.konfig_prioritaet),
            PrioUebersteuerung::Ausgeschlossen => None,
            PrioUebersteuerung::Wert(p) => Some(p),
        }
    }

    /// Setzt beide Puffer komplett zurueck
    pub fn puffer_leeren(&mut self) {
        self.audio.alles_fuellen(STILLE);
        self.rssi.alles_fuellen(0);
    }

    /// Vergisst die Anmeldung; der naechste Handshake stellt sie wieder her
    pub fn abmelden(&mut self) {
        self.gehoert = false;
        self.antwort_digest = 0;
        self.zuletzt_gehoert = None;
    }

    /// Kann dieser Client Pakete von uns empfangen?
    pub fn erreichbar(&self) -> bool {
        self.gehoert && self.antwort_digest != 0 && self.adresse.is_some()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Statische Client-Liste mit Digest-Index
#[derive(Debug)]
pub struct Registry {
    clients: Vec<Client>,
    nach_digest: HashMap<u32, ClientIndex>,
    challenge: Challenge,
    passwort: String,
}

impl Registry {
    /// Baut die Registry auf und berechnet alle Digests
    ///
    /// # Fehler
    /// Leeres Geheimnis, Digest 0 oder zwei Clients mit gleichem Digest.
    pub fn neu(
        challenge: Challenge,
        passwort: &str,
        konfigs: &[ClientKonfig],
        puffer_laenge: usize,
    ) -> Result<Self> {
        let mut clients = Vec::with_capacity(konfigs.len());
        let mut nach_digest = HashMap::with_capacity(konfigs.len());

        for (i, konfig) in konfigs.iter().enumerate() {
            if konfig.geheimnis.is_empty() {
                return Err(VoterError::LeeresGeheimnis(konfig.name.clone()));
            }
            let digest = challenge.digest(&konfig.geheimnis);
            if digest == 0 {
                return Err(VoterError::UngueltigerDigest(konfig.name.clone()));
            }
            if let Some(vorher) = nach_digest.insert(digest, ClientIndex(i)) {
                return Err(VoterError::DoppelterDigest {
                    digest,
                    erster: konfigs[vorher.0].name.clone(),
                    zweiter: konfig.name.clone(),
                });
            }
            tracing::debug!(
                client = %konfig.name,
                knoten = %konfig.knoten,
                digest = %format!("{digest:08x}"),
                master = konfig.master,
                "Client registriert"
            );
            clients.push(Client::neu(konfig, digest, puffer_laenge));
        }

        Ok(Self {
            clients,
            nach_digest,
            challenge,
            passwort: passwort.to_string(),
        })
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// Sucht den Client zu einem Paket-Digest (0 trifft nie)
    pub fn suchen(&self, digest: u32) -> Option<ClientIndex> {
        if digest == 0 {
            return None;
        }
        self.nach_digest.get(&digest).copied()
    }

    pub fn nach_name(&self, name: &str) -> Option<ClientIndex> {
        self.clients.iter().position(|c| c.name == name).map(ClientIndex)
    }

    pub fn client(&self, index: ClientIndex) -> &Client {
        &self.clients[index.0]
    }

    pub fn client_mut(&mut self, index: ClientIndex) -> &mut Client {
        &mut self.clients[index.0]
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn clients_mut(&mut self) -> &mut [Client] {
        &mut self.clients
    }

    /// Alle Clients eines Knotens in Registrierungsreihenfolge
    pub fn von_knoten(&self, knoten: NodeNummer) -> Vec<ClientIndex> {
        self.clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.knoten == knoten)
            .map(|(i, _)| ClientIndex(i))
            .collect()
    }

    /// Ist mindestens ein Master-Client konfiguriert?
    pub fn hat_master(&self) -> bool {
        self.clients.iter().any(|c| c.master)
    }

    /// Digest, mit dem die Engine auf eine fremde Challenge antwortet
    pub fn antwort_digest(&self, challenge: &Challenge) -> u32 {
        challenge.digest(&self.passwort)
    }

    /// Verbucht ein authentifiziertes Paket
    pub fn anmelden(
        &mut self,
        index: ClientIndex,
        adresse: SocketAddr,
        paket_challenge: &Challenge,
        jetzt: Instant,
    ) {
        let antwort = self.antwort_digest(paket_challenge);
        let client = &mut self.clients[index.0];
        if client.adresse != Some(adresse) {
            tracing::info!(
                client = %client.name,
                adresse = %adresse,
                "Client-Adresse gelernt"
            );
        }
        client.adresse = Some(adresse);
        client.antwort_digest = antwort;
        client.gehoert = true;
        client.zuletzt_gehoert = Some(jetzt);
    }

    /// Meldet Clients ab, die laenger als [`CLIENT_TIMEOUT`] still waren
    ///
    /// Gibt die Anzahl abgemeldeter Clients zurueck.
    pub fn zeitueberschreitungen_pruefen(&mut self, jetzt: Instant) -> usize {
        let mut anzahl = 0;
        for client in self.clients.iter_mut().filter(|c| c.gehoert) {
            let still = client
                .zuletzt_gehoert
                .map_or(true, |t| jetzt.saturating_duration_since(t) > CLIENT_TIMEOUT);
            if still {
                tracing::info!(client = %client.name, "Client getrennt (Zeitueberschreitung)");
                client.abmelden();
                anzahl += 1;
            }
        }
        anzahl
    }

    /// Meldet angemeldete Clients ab, die sich eine Absenderadresse teilen
    pub fn adressen_pruefen(&mut self) -> usize {
        let mut doppelt = vec![false; self.clients.len()];
        for i in 0..self.clients.len() {
            let a = &self.clients[i];
            if a.antwort_digest == 0 || a.adresse.is_none() {
                continue;
            }
            for j in i + 1..self.clients.len() {
                let b = &self.clients[j];
                if b.antwort_digest != 0 && b.adresse == a.adresse {
                    doppelt[i] = true;
                    doppelt[j] = true;
                }
            }
        }

        let mut anzahl = 0;
        for (client, _) in self.clients.iter_mut().zip(&doppelt).filter(|(_, &d)| d) {
            tracing::warn!(
                client = %client.name,
                adresse = ?client.adresse,
                "Adresse von mehreren Clients benutzt, Client abgemeldet"
            );
            client.abmelden();
            anzahl += 1;
        }
        anzahl
    }

    /// Leert die Puffer aller Clients
    pub fn alle_puffer_leeren(&mut self) {
        for client in &mut self.clients {
            client.puffer_leeren();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use votebridge_protocol::pruefsumme;

    fn adresse(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn konfigs() -> Vec<ClientKonfig> {
        vec![
            ClientKonfig::neu("master", "m-geheim", NodeNummer(1)).als_master(),
            ClientKonfig::neu("nord", "n-geheim", NodeNummer(1)).mit_senden(),
            ClientKonfig::neu("sued", "s-geheim", NodeNummer(2)),
        ]
    }

    fn registry() -> Registry {
        Registry::neu(Challenge::aus_str("12345"), "serverpw", &konfigs(), 640).unwrap()
    }

    #[test]
    fn digest_entspricht_pruefsumme() {
        let reg = registry();
        for client in reg.clients() {
            let geheimnis = konfigs()
                .into_iter()
                .find(|k| k.name == client.name)
                .unwrap()
                .geheimnis;
            assert_eq!(client.digest, pruefsumme(b"12345", geheimnis.as_bytes()));
        }
    }

    #[test]
    fn uebersteuerung_der_prioritaet() {
        let mut reg = registry();
        let nord = reg.nach_name("nord").unwrap();
        assert_eq!(reg.client(nord).prioritaet(), Some(0));

        reg.client_mut(nord).uebersteuerung = PrioUebersteuerung::Wert(4);
        assert_eq!(reg.client(nord).prioritaet(), Some(4));
        reg.client_mut(nord).uebersteuerung = PrioUebersteuerung::Ausgeschlossen;
        assert_eq!(reg.client(nord).prioritaet(), None);
        assert!(reg.nach_name("west").is_none());
    }

    #[test]
    fn suchen_ueber_digest() {
        let reg = registry();
        let nord = reg.clients()[1].digest;
        assert_eq!(reg.suchen(nord), Some(ClientIndex(1)));
        assert_eq!(reg.suchen(nord ^ 1), None);
        assert_eq!(reg.suchen(0), None);
    }

    #[test]
    fn doppeltes_geheimnis_ist_fatal() {
        let mut k = konfigs();
        k.push(ClientKonfig::neu("kopie", "n-geheim", NodeNummer(2)));
        let fehler = Registry::neu(Challenge::aus_str("1"), "pw", &k, 640).unwrap_err();
        match fehler {
            VoterError::DoppelterDigest { erster, zweiter, .. } => {
                assert_eq!(erster, "nord");
                assert_eq!(zweiter, "kopie");
            }
            andere => panic!("DoppelterDigest erwartet, erhalten: {andere}"),
        }
    }

    #[test]
    fn leeres_geheimnis_ist_fatal() {
        let k = vec![ClientKonfig::neu("leer", "", NodeNummer(1))];
        assert!(matches!(
            Registry::neu(Challenge::aus_str("1"), "pw", &k, 640),
            Err(VoterError::LeeresGeheimnis(_))
        ));
    }

    #[test]
    fn anmelden_lernt_adresse_und_antwort_digest() {
        let mut reg = registry();
        let jetzt = Instant::now();
        let challenge = Challenge::aus_str("client1");
        reg.anmelden(ClientIndex(1), adresse(5000), &challenge, jetzt);

        let c = reg.client(ClientIndex(1));
        assert!(c.gehoert);
        assert!(c.erreichbar());
        assert_eq!(c.adresse, Some(adresse(5000)));
        assert_eq!(c.antwort_digest, pruefsumme(b"client1", b"serverpw"));

        // Adresswechsel ohne neuen Handshake
        reg.anmelden(ClientIndex(1), adresse(5001), &challenge, jetzt);
        assert_eq!(reg.client(ClientIndex(1)).adresse, Some(adresse(5001)));
    }

    #[test]
    fn zeitueberschreitung_meldet_ab() {
        let mut reg = registry();
        let start = Instant::now();
        reg.anmelden(ClientIndex(0), adresse(5000), &Challenge::aus_str("a"), start);
        reg.anmelden(ClientIndex(1), adresse(5001), &Challenge::aus_str("b"), start + Duration::from_secs(2));

        let abgemeldet = reg.zeitueberschreitungen_pruefen(start + Duration::from_millis(3500));
        assert_eq!(abgemeldet, 1);
        assert!(!reg.client(ClientIndex(0)).gehoert);
        assert_eq!(reg.client(ClientIndex(0)).antwort_digest, 0);
        assert!(reg.client(ClientIndex(1)).gehoert);
    }

    #[test]
    fn gleiche_adresse_meldet_beide_ab() {
        let mut reg = registry();
        let jetzt = Instant::now();
        reg.anmelden(ClientIndex(0), adresse(6000), &Challenge::aus_str("a"), jetzt);
        reg.anmelden(ClientIndex(2), adresse(6000), &Challenge::aus_str("b"), jetzt);
        reg.anmelden(ClientIndex(1), adresse(6001), &Challenge::aus_str("c"), jetzt);

        assert_eq!(reg.adressen_pruefen(), 2);
        assert!(!reg.client(ClientIndex(0)).gehoert);
        assert!(!reg.client(ClientIndex(2)).gehoert);
        assert!(reg.client(ClientIndex(1)).gehoert);
    }

    #[test]
    fn platzieren_mit_rssi_null_speichert_stille() {
        let mut reg = registry();
        let client = reg.client_mut(ClientIndex(1));
        client.platzieren(600, 0, &[0x42; FRAME_GROESSE]);
        let mut audio = [0u8; FRAME_GROESSE];
        client.audio.lesen(600, &mut audio);
        assert!(audio.iter().all(|&s| s == STILLE));
        assert_eq!(client.rssi.summe(600, FRAME_GROESSE), 0);

        client.platzieren(600, 90, &[0x42; FRAME_GROESSE]);
        client.audio.lesen(600, &mut audio);
        assert!(audio.iter().all(|&s| s == 0x42));
        assert_eq!(client.rssi.summe(600, FRAME_GROESSE), 90 * 160);
    }

    #[test]
    fn von_knoten_in_registrierungsreihenfolge() {
        let reg = registry();
        assert_eq!(reg.von_knoten(NodeNummer(1)), vec![ClientIndex(0), ClientIndex(1)]);
        assert_eq!(reg.von_knoten(NodeNummer(2)), vec![ClientIndex(2)]);
        assert!(reg.hat_master());
    }
}
