use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modbus_client::{encode_u32, ClientConfig, ClientError, ModbusClient, RegisterReader, RegisterTransport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Listener that counts connections and closes the first `drop_first` of them right away.
/// Later connections are held open without ever answering.
async fn flaky_slave(drop_first: usize) -> (ClientConfig, Arc<AtomicUsize>, mpsc::Receiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let (closed_tx, closed_rx) = mpsc::channel(8);

    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            if index < drop_first {
                drop(socket);
                let _ = closed_tx.send(index).await;
            } else {
                held.push(socket);
            }
        }
    });

    let config = ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        timeout_ms: 500,
        ..ClientConfig::default()
    };
    (config, accepted, closed_rx)
}

#[tokio::test]
async fn failed_read_is_not_retried_by_default() {
    let (config, accepted, mut closed) = flaky_slave(usize::MAX).await;
    assert_eq!(config.retry_count, 0);

    let client = ModbusClient::connect(config).await.expect("connect");
    closed.recv().await.expect("first socket closed");

    let result = client.read_registers(126, 40_004, 66).await;
    assert!(result.is_err());
    assert!(!client.is_connected());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    // the next call dials again instead of reporting a dead context
    let result = client.read_registers(126, 40_004, 66).await;
    assert!(matches!(result, Err(ClientError::Modbus(_)) | Err(ClientError::Timeout { .. })));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn configured_read_retries_redial_between_attempts() {
    let (config, accepted, mut closed) = flaky_slave(usize::MAX).await;
    let config = ClientConfig {
        retry_count: 2,
        retry_backoff_ms: 10,
        retry_max_backoff_ms: 20,
        ..config
    };

    let client = ModbusClient::connect(config).await.expect("connect");
    closed.recv().await.expect("first socket closed");

    assert!(client.read_registers(126, 40_004, 66).await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_write_clears_connected_until_reconnect() {
    let (config, accepted, mut closed) = flaky_slave(1).await;

    let client = ModbusClient::connect(config).await.expect("connect");
    assert!(client.is_connected());
    closed.recv().await.expect("first socket closed");

    let result = client.write_registers(3, 40_151, &encode_u32(0x0322)).await;
    assert!(result.is_err());
    assert!(!client.is_connected());

    client.reconnect().await.expect("reconnect");
    assert!(client.is_connected());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}
