mod common;

use std::time::Duration;

use battery_controller::{RegisterWriter, RetryPolicy, WriteError, WriteOutcome};
use common::FakeTransport;
use modbus_client::{EncodeError, RegisterKind};
use tokio::time::Instant;

fn writer(transport: &FakeTransport) -> RegisterWriter<FakeTransport> {
    RegisterWriter::new(transport.clone(), 3, RetryPolicy::default())
}

#[tokio::test(start_paused = true)]
async fn writes_big_endian_word_pair_to_control_unit() {
    let transport = FakeTransport::connected();

    let outcome = writer(&transport)
        .write(40_149, -5_500, RegisterKind::Int32)
        .await
        .expect("write");

    assert_eq!(outcome, WriteOutcome::Written);
    assert_eq!(transport.writes(), vec![(3, 40_149, vec![0xFFFF, 0xEA84])]);
    assert_eq!(transport.reconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnected_transport_reconnects_instead_of_writing() {
    let transport = FakeTransport::disconnected();

    let outcome = writer(&transport)
        .write(40_151, 0x0322, RegisterKind::Uint32)
        .await
        .expect("write");

    assert_eq!(outcome, WriteOutcome::Skipped);
    assert_eq!(transport.attempts(), 0);
    assert_eq!(transport.reconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn single_failure_is_retried_once_after_backoff() {
    let transport = FakeTransport::connected();
    transport.fail_next(1);
    let started = Instant::now();

    let outcome = writer(&transport)
        .write(40_151, 0x0322, RegisterKind::Uint32)
        .await
        .expect("write");

    assert_eq!(outcome, WriteOutcome::Written);
    assert_eq!(transport.attempts(), 2);
    assert_eq!(transport.reconnects(), 1);
    assert_eq!(transport.writes(), vec![(3, 40_151, vec![0x0000, 0x0322])]);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let transport = FakeTransport::connected();
    transport.fail_always();

    let result = writer(&transport)
        .write(40_149, 100, RegisterKind::Int32)
        .await;

    match result {
        Err(WriteError::RetriesExhausted { address, attempts, .. }) => {
            assert_eq!(address, 40_149);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(transport.attempts(), 4);
    assert_eq!(transport.reconnects(), 3);
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_still_counts_toward_retries() {
    let transport = FakeTransport::connected();
    transport.fail_always();
    transport.refuse_reconnect();
    let policy = RetryPolicy {
        max_retries: 1,
        backoff: Duration::from_millis(250),
    };

    let result = RegisterWriter::new(transport.clone(), 3, policy)
        .write(40_149, 100, RegisterKind::Int32)
        .await;

    assert!(matches!(result, Err(WriteError::RetriesExhausted { attempts: 2, .. })));
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_value_is_not_sent() {
    let transport = FakeTransport::connected();

    let result = writer(&transport)
        .write(40_151, -1, RegisterKind::Uint32)
        .await;

    assert!(matches!(
        result,
        Err(WriteError::Encode(EncodeError::OutOfRange { value: -1, .. }))
    ));
    assert_eq!(transport.attempts(), 0);
}
