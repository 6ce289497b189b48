//! End-to-end sync handshake against a loopback relay that simply forwards
//! bytes between the first two control streams it sees (§8 "Sync protocol",
//! scenario 1 "Cold start, empty room").

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use collab_provider::{CertificateHash, Provider, ProviderOptions};
use compio_quic::ServerBuilder;
use yrs::{Map, Transact};

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

/// Accepts exactly two connections and relays every byte from each one's
/// control stream to the other's, unmodified. Stands in for the real room
/// relay this crate's provider talks to in production.
async fn spawn_two_party_relay() -> (SocketAddr, CertificateHash) {
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
        let mut first: Option<(compio_quic::SendStream, compio_quic::RecvStream)> = None;
        while let Some(incoming) = endpoint.wait_incoming().await {
            let Ok(connection) = incoming.await else { continue };
            let Ok((mut send, mut recv)) = connection.accept_bi().await else { continue };
            let mut marker = Vec::with_capacity(1);
            let _ = recv.read(&mut marker).await;

            match first.take() {
                None => first = Some((send, recv)),
                Some((mut other_send, mut other_recv)) => {
                    compio_runtime::spawn(async move {
                        let mut buf = Vec::with_capacity(8192);
                        loop {
                            match recv.read(&mut buf).await {
                                Ok(Some(n)) => {
                                    if other_send.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                    buf.clear();
                                }
                                _ => break,
                            }
                        }
                    })
                    .detach();
                    compio_runtime::spawn(async move {
                        let mut buf = Vec::with_capacity(8192);
                        loop {
                            match other_recv.read(&mut buf).await {
                                Ok(Some(n)) => {
                                    if send.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                    buf.clear();
                                }
                                _ => break,
                            }
                        }
                    })
                    .detach();
                }
            }
        }
    })
    .detach();

    (addr, hash)
}

#[compio_macros::test]
async fn two_providers_converge_to_the_same_state() {
    let (addr, hash) = spawn_two_party_relay().await;

    let doc_a = Rc::new(yrs::Doc::new());
    {
        let map = doc_a.get_or_insert_map("root");
        let mut txn = doc_a.transact_mut();
        map.insert(&mut txn, "from", "a");
    }
    let doc_b = Rc::new(yrs::Doc::new());

    let synced_a = Rc::new(RefCell::new(false));
    let synced_b = Rc::new(RefCell::new(false));

    let mut options_a = ProviderOptions::default();
    options_a.server_certificate_hashes = vec![hash];
    let provider_a = Provider::new(addr, "localhost", "room", doc_a.clone(), options_a);
    let flag = synced_a.clone();
    provider_a.on_synced(move |value| *flag.borrow_mut() = value);

    let mut options_b = ProviderOptions::default();
    options_b.server_certificate_hashes = vec![hash];
    let provider_b = Provider::new(addr, "localhost", "room", doc_b.clone(), options_b);
    let flag = synced_b.clone();
    provider_b.on_synced(move |value| *flag.borrow_mut() = value);

    for _ in 0..50 {
        if *synced_a.borrow() && *synced_b.borrow() {
            break;
        }
        compio_runtime::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(*synced_a.borrow(), "provider A never reached synced");
    assert!(*synced_b.borrow(), "provider B never reached synced");

    let map_b = doc_b.get_or_insert_map("root");
    let txn_b = doc_b.transact();
    assert_eq!(
        map_b.get(&txn_b, "from").map(|v| v.to_string(&txn_b)),
        Some("a".to_string())
    );

    provider_a.destroy();
    provider_b.destroy();
}
