//! Integration-Tests fuer den UDP Voter Server (echte Sockets auf localhost)

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use votebridge_core::NodeNummer;
use votebridge_protocol::voter::{Nutzdaten, FRAME_GROESSE, OPTION_MASTER, STILLE};
use votebridge_protocol::{pruefsumme, Challenge, VoterPaket, VoterZeit};
use votebridge_voter::{
    ClientKonfig, HostFrame, VoterConfig, VoterEngine, VoterServer, VoterServerConfig,
};

const KNOTEN: NodeNummer = NodeNummer(42);

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn engine() -> VoterEngine {
    let mut cfg = VoterConfig::neu("serverpw")
        .client(ClientKonfig::neu("master", "m-geheim", KNOTEN).als_master())
        .client(ClientKonfig::neu("turm", "t-geheim", KNOTEN));
    cfg.challenge = Challenge::aus_str("98765");
    cfg.verzoegerung_ms = Some(40);
    VoterEngine::neu(cfg).expect("Konfiguration muss gueltig sein")
}

fn digest(geheimnis: &str) -> u32 {
    pruefsumme(b"98765", geheimnis.as_bytes())
}

async fn antwort(socket: &UdpSocket) -> VoterPaket {
    let mut buf = [0u8; 256];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("Antwort innerhalb von 2 s erwartet")
        .unwrap();
    VoterPaket::decode(&buf[..len]).unwrap()
}

#[tokio::test]
async fn handshake_und_abstimmung_ueber_udp() {
    let server = VoterServer::binden(VoterServerConfig::neu(localhost(0)), engine())
        .await
        .unwrap();
    let server_addr = server.lokale_adresse().unwrap();
    let handle = server.handle();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(server.empfangs_loop_starten(shutdown_rx));

    let mut kanal = handle.kanal_oeffnen(KNOTEN).await.unwrap();

    let master = UdpSocket::bind(localhost(0)).await.unwrap();
    let turm = UdpSocket::bind(localhost(0)).await.unwrap();

    // Erster Kontakt ohne Digest: Server nennt seine Challenge
    let hallo = VoterPaket::auth_antwort(VoterZeit::default(), Challenge::aus_str("mc"), 0, 0);
    master.send_to(&hallo.encode(), server_addr).await.unwrap();
    let challenge = antwort(&master).await;
    assert_eq!(challenge.header.challenge, Challenge::aus_str("98765"));
    assert_eq!(challenge.header.digest, pruefsumme(b"mc", b"serverpw"));

    // Mit Digest: Master wird als solcher bestaetigt
    let anmeldung = VoterPaket::auth_antwort(
        VoterZeit::default(),
        Challenge::aus_str("mc"),
        digest("m-geheim"),
        0,
    );
    master.send_to(&anmeldung.encode(), server_addr).await.unwrap();
    let bestaetigt = antwort(&master).await;
    assert_eq!(
        bestaetigt.nutzdaten,
        Nutzdaten::Keine {
            optionen: Some(OPTION_MASTER)
        }
    );

    // Drei Master-Frames, dazwischen ein Frame des Turms
    let basis = VoterZeit::jetzt();
    for n in 0..3i64 {
        let zeit = basis.plus_ms(n * 20);
        let takt = VoterPaket::audio(
            zeit,
            Challenge::aus_str("mc"),
            digest("m-geheim"),
            0,
            [STILLE; FRAME_GROESSE],
        );
        master.send_to(&takt.encode(), server_addr).await.unwrap();
        if n == 0 {
            let frame = VoterPaket::audio(
                zeit,
                Challenge::aus_str("tc"),
                digest("t-geheim"),
                180,
                [0x5A; FRAME_GROESSE],
            );
            turm.send_to(&frame.encode(), server_addr).await.unwrap();
        }
    }

    let mut empfangen = Vec::new();
    while empfangen.len() < 3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), kanal.frame_erwarten())
            .await
            .expect("Host-Frame erwartet")
            .expect("Engine laeuft");
        empfangen.push(frame);
    }
    assert_eq!(
        empfangen,
        vec![
            HostFrame::Empfangstaste(true),
            HostFrame::Gewinner("turm".into()),
            HostFrame::Sprache([0x5A; FRAME_GROESSE]),
        ]
    );

    let status = handle.status().await.unwrap();
    assert!(status.master_synchron);
    assert_eq!(status.angemeldete_clients(), 2);
    assert_eq!(status.statistik.frames_abgestimmt, 1);

    let _ = shutdown_tx.send(());
    task.await.unwrap();
}

#[tokio::test]
async fn muell_wird_ignoriert() {
    let server = VoterServer::binden(VoterServerConfig::neu(localhost(0)), engine())
        .await
        .unwrap();
    let server_addr = server.lokale_adresse().unwrap();
    let handle = server.handle();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(server.empfangs_loop_starten(shutdown_rx));

    let client = UdpSocket::bind(localhost(0)).await.unwrap();
    client.send_to(b"kein voter paket", server_addr).await.unwrap();

    let mut buf = [0u8; 64];
    let ergebnis =
        tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
    assert!(ergebnis.is_err(), "Auf ungueltige Pakete darf keine Antwort kommen");

    let status = handle.status().await.unwrap();
    assert_eq!(status.statistik.pakete_empfangen, 1);
    assert_eq!(status.statistik.pakete_verworfen, 1);

    let _ = shutdown_tx.send(());
    task.await.unwrap();
}
