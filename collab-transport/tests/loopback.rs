//! End-to-end tests against a raw QUIC listener on loopback (§8 reconnect
//! policy properties, §4.2 startup sequence).

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use collab_transport::{CertificateHash, ConnectOptions, ConnectionManager, ConnectionStatus};
use compio_quic::ServerBuilder;

fn self_signed() -> (
    Vec<rustls::pki_types::CertificateDer<'static>>,
    rustls::pki_types::PrivateKeyDer<'static>,
    CertificateHash,
) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let der = cert.der().clone();
    let hash = CertificateHash::of_der(&der);
    let key = key_pair.serialize_der().try_into().unwrap();
    (vec![der], key, hash)
}

/// Binds a QUIC listener on loopback that echoes every byte it receives back
/// on the same stream, and returns its address and pinned certificate hash.
async fn spawn_echo_server() -> (SocketAddr, CertificateHash) {
    let (cert_chain, key, hash) = self_signed();
    let endpoint = ServerBuilder::default()
        .with_alpn_protocols(&["collab"])
        .with_single_cert(cert_chain, key)
        .unwrap()
        .bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = endpoint.local_addr().unwrap();

    compio_runtime::spawn(async move {
        while let Some(incoming) = endpoint.wait_incoming().await {
            let connection = match incoming.await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            compio_runtime::spawn(async move {
                if let Ok((mut send, mut recv)) = connection.accept_bi().await {
                    let mut marker = Vec::with_capacity(1);
                    let _ = recv.read(&mut marker).await;
                    let mut buf = Vec::with_capacity(4096);
                    while let Ok(Some(n)) = recv.read(&mut buf).await {
                        let _ = send.write_all(&buf[..n]).await;
                        buf.clear();
                    }
                }
            })
            .detach();
        }
    })
    .detach();

    (addr, hash)
}

#[compio_macros::test]
async fn connect_reaches_connected_with_pinned_certificate() {
    let (addr, hash) = spawn_echo_server().await;

    let mut options = ConnectOptions::new(addr, "localhost");
    options.server_certificate_hashes = vec![hash];

    let manager = ConnectionManager::new(options);
    let statuses = Rc::new(RefCell::new(Vec::new()));
    let recorded = statuses.clone();
    manager.on_status(move |status| recorded.borrow_mut().push(status));

    manager.connect().await.expect("handshake against pinned cert");
    assert_eq!(
        statuses.borrow().as_slice(),
        &[ConnectionStatus::Connecting, ConnectionStatus::Connected],
    );

    manager.disconnect();
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[compio_macros::test]
async fn connect_with_wrong_pinned_hash_fails() {
    let (addr, _real_hash) = spawn_echo_server().await;
    let (_, _, unrelated_hash) = self_signed();

    let mut options = ConnectOptions::new(addr, "localhost");
    options.server_certificate_hashes = vec![unrelated_hash];

    let manager = ConnectionManager::new(options);
    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, collab_transport::TransportError::ConnectFailed(_)));
}

#[compio_macros::test]
async fn destroyed_manager_refuses_connect() {
    let manager = ConnectionManager::new(ConnectOptions::new(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
        "localhost",
    ));
    manager.destroy();
    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, collab_transport::TransportError::Destroyed));
}

#[compio_macros::test]
async fn reconnect_gives_up_after_max_attempts() {
    // Nothing is bound on this loopback port, so every open fails.
    let dead = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
    let mut options = ConnectOptions::new(dead, "localhost");
    options.reconnect.max_attempts = 3;
    options.reconnect.base_delay = Duration::from_millis(5);
    options.reconnect.max_delay = Duration::from_millis(20);
    options.idle_timeout = Duration::from_millis(50);

    let manager = ConnectionManager::new(options);
    let attempts = Rc::new(RefCell::new(0u32));
    let counted = attempts.clone();
    manager.on_status(move |status| {
        if status == ConnectionStatus::Connecting {
            *counted.borrow_mut() += 1;
        }
    });

    let _ = manager.connect().await;
    // Give the reconnect loop room to exhaust its budget: worst case delay
    // is 3 attempts at up to max_delay each, plus handshake timeouts.
    compio_runtime::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(*attempts.borrow(), 4, "initial attempt + 3 reconnects");
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}
