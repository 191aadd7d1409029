//! Private network protector end-to-end

use proxim_core::pnet::{PreSharedKey, ProtectedConnection, NONCE_LEN};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn test_psk() -> PreSharedKey {
    PreSharedKey::new([0x42; 32])
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xFF) as u8).collect()
}

#[tokio::test]
async fn eight_kib_roundtrip_with_wire_tap() {
    let psk = test_psk();
    let plaintext = pattern(8 * 1024);

    // Client <-> tap <-> server, with the tap recording raw wire bytes
    let (client_io, mut tap_client) = tokio::io::duplex(64 * 1024);
    let (server_io, mut tap_server) = tokio::io::duplex(64 * 1024);

    let (tap_done_tx, tap_done_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
    let expected_wire_len = NONCE_LEN + plaintext.len();
    let tap = tokio::spawn(async move {
        let mut client_to_server = Vec::new();
        let mut buf_c = [0u8; 4096];
        let mut buf_s = [0u8; 4096];
        loop {
            tokio::select! {
                n = tap_client.read(&mut buf_c) => {
                    let n = match n { Ok(0) | Err(_) => break, Ok(n) => n };
                    client_to_server.extend_from_slice(&buf_c[..n]);
                    if tap_server.write_all(&buf_c[..n]).await.is_err() { break; }
                    if client_to_server.len() >= expected_wire_len {
                        let _ = tap_done_tx.send(client_to_server);
                        // Keep relaying the other direction below
                        client_to_server = Vec::new();
                        break;
                    }
                }
                n = tap_server.read(&mut buf_s) => {
                    let n = match n { Ok(0) | Err(_) => break, Ok(n) => n };
                    if tap_client.write_all(&buf_s[..n]).await.is_err() { break; }
                }
            }
        }
        // Continue pass-through so the connections stay usable
        loop {
            tokio::select! {
                n = tap_client.read(&mut buf_c) => {
                    let n = match n { Ok(0) | Err(_) => break, Ok(n) => n };
                    if tap_server.write_all(&buf_c[..n]).await.is_err() { break; }
                }
                n = tap_server.read(&mut buf_s) => {
                    let n = match n { Ok(0) | Err(_) => break, Ok(n) => n };
                    if tap_client.write_all(&buf_s[..n]).await.is_err() { break; }
                }
            }
        }
    });

    let (client, server) = tokio::join!(
        ProtectedConnection::secure(client_io, &psk),
        ProtectedConnection::secure(server_io, &psk),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    client.write_all(&plaintext).await.unwrap();
    client.flush().await.unwrap();

    let mut received = vec![0u8; plaintext.len()];
    server.read_exact(&mut received).await.unwrap();
    assert_eq!(received, plaintext);

    // The wire carries the 24-byte nonce prefix and then ciphertext
    // that differs from the plaintext
    let wire = tap_done_rx.await.unwrap();
    assert!(wire.len() >= expected_wire_len);
    let after_nonce = &wire[NONCE_LEN..NONCE_LEN + plaintext.len()];
    assert_ne!(after_nonce, plaintext.as_slice());
    tap.abort();
}

#[tokio::test]
async fn protected_pipe_is_transparent_to_both_sides() {
    let psk = test_psk();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, server) = tokio::join!(
        ProtectedConnection::secure(client_io, &psk),
        ProtectedConnection::secure(server_io, &psk),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    for round in 0..5u8 {
        let message = vec![round; 1000];
        client.write_all(&message).await.unwrap();
        client.flush().await.unwrap();
        let mut received = vec![0u8; message.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, message);

        server.write_all(b"ack").await.unwrap();
        server.flush().await.unwrap();
        let mut ack = [0u8; 3];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"ack");
    }
}

#[tokio::test]
async fn psk_loads_from_swarm_key_file() {
    use std::io::Write;

    let psk = test_psk();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(psk.to_file_string().as_bytes()).unwrap();

    let content = std::fs::read_to_string(file.path()).unwrap();
    let loaded = PreSharedKey::parse(&content).unwrap();
    assert_eq!(loaded, psk);
    assert_eq!(loaded.fingerprint(), psk.fingerprint());
}
