mod common;

use std::time::Duration;

use battery_controller::{
    PowerLimits, PowerSetter, RegisterWriter, RetryPolicy, SchedulerConfig, Setpoint,
    SetpointScheduler, TickOutcome, ACTIVATE_CONTROL_ADDRESS, CHANGE_POWER_ADDRESS,
};
use common::FakeTransport;
use tokio::sync::watch;
use tokio::time::sleep;

fn scheduler(
    transport: &FakeTransport,
    setpoint: &Setpoint,
    policy: RetryPolicy,
) -> (SetpointScheduler<FakeTransport>, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let writer = RegisterWriter::new(transport.clone(), 3, policy);
    let scheduler = SetpointScheduler::new(writer, setpoint.clone(), SchedulerConfig::default(), rx);
    (scheduler, tx)
}

#[tokio::test(start_paused = true)]
async fn every_tick_sends_activation_then_setpoint() {
    let transport = FakeTransport::connected();
    let setpoint = Setpoint::default();
    PowerSetter::new(setpoint.clone(), PowerLimits::default())
        .set_power(-2_000.0)
        .expect("set");
    let (scheduler, shutdown) = scheduler(&transport, &setpoint, RetryPolicy::default());

    let handle = tokio::spawn(scheduler.run());
    // ticks at 0s, 5s and 10s
    sleep(Duration::from_secs(12)).await;
    shutdown.send(true).expect("send shutdown");
    handle.await.expect("scheduler task");

    let writes = transport.writes();
    assert_eq!(writes.len(), 6);
    for pair in writes.chunks(2) {
        assert_eq!(pair[0], (3, ACTIVATE_CONTROL_ADDRESS, vec![0x0000, 0x0322]));
        assert_eq!(pair[1], (3, CHANGE_POWER_ADDRESS, vec![0xFFFF, 0xF830]));
    }
}

#[tokio::test(start_paused = true)]
async fn tick_picks_up_setpoint_changes() {
    let transport = FakeTransport::connected();
    let setpoint = Setpoint::default();
    let power = PowerSetter::new(setpoint.clone(), PowerLimits::default());
    let (scheduler, _shutdown) = scheduler(&transport, &setpoint, RetryPolicy::default());

    assert_eq!(scheduler.tick().await.expect("tick"), TickOutcome::Sent { watts: 0 });
    power.set_power(750.0).expect("set");
    assert_eq!(scheduler.tick().await.expect("tick"), TickOutcome::Sent { watts: 750 });

    let writes = transport.writes();
    assert_eq!(writes[1].2, vec![0x0000, 0x0000]);
    assert_eq!(writes[3].2, vec![0x0000, 0x02EE]);
}

#[tokio::test(start_paused = true)]
async fn skipped_activation_skips_setpoint() {
    let transport = FakeTransport::disconnected();
    let setpoint = Setpoint::default();
    let (scheduler, _shutdown) = scheduler(&transport, &setpoint, RetryPolicy::default());

    assert_eq!(scheduler.tick().await.expect("tick"), TickOutcome::Skipped);
    assert_eq!(transport.attempts(), 0);
    assert_eq!(transport.reconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_activation_skips_setpoint() {
    let transport = FakeTransport::connected();
    transport.fail_always();
    let setpoint = Setpoint::default();
    let policy = RetryPolicy {
        max_retries: 0,
        backoff: Duration::from_secs(1),
    };
    let (scheduler, _shutdown) = scheduler(&transport, &setpoint, policy);

    assert!(scheduler.tick().await.is_err());
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn loop_keeps_running_after_failed_tick() {
    let transport = FakeTransport::connected();
    transport.fail_next(1);
    let setpoint = Setpoint::default();
    let policy = RetryPolicy {
        max_retries: 0,
        backoff: Duration::from_millis(100),
    };
    let (scheduler, shutdown) = scheduler(&transport, &setpoint, policy);

    let handle = tokio::spawn(scheduler.run());
    sleep(Duration::from_secs(7)).await;
    shutdown.send(true).expect("send shutdown");
    handle.await.expect("scheduler task");

    // first tick lost its activation write, second tick went through
    let addresses: Vec<u16> = transport.writes().iter().map(|(_, address, _)| *address).collect();
    assert_eq!(addresses, vec![ACTIVATE_CONTROL_ADDRESS, CHANGE_POWER_ADDRESS]);
}

#[tokio::test(start_paused = true)]
async fn dropping_shutdown_sender_stops_loop() {
    let transport = FakeTransport::connected();
    let setpoint = Setpoint::default();
    let (scheduler, shutdown) = scheduler(&transport, &setpoint, RetryPolicy::default());

    let handle = tokio::spawn(scheduler.run());
    sleep(Duration::from_secs(1)).await;
    drop(shutdown);
    handle.await.expect("scheduler task");

    assert_eq!(transport.writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_retry_backoff() {
    let transport = FakeTransport::connected();
    transport.fail_always();
    let setpoint = Setpoint::default();
    let (scheduler, shutdown) = scheduler(&transport, &setpoint, RetryPolicy::default());
    let started = tokio::time::Instant::now();

    let handle = tokio::spawn(scheduler.run());
    // first attempt at 0s, second after the 1s backoff, third would follow at 2s
    sleep(Duration::from_millis(1_500)).await;
    shutdown.send(true).expect("send shutdown");
    handle.await.expect("scheduler task");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(transport.attempts(), 2);
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_start_sends_nothing() {
    let transport = FakeTransport::connected();
    let setpoint = Setpoint::default();
    let (scheduler, shutdown) = scheduler(&transport, &setpoint, RetryPolicy::default());

    shutdown.send(true).expect("send shutdown");
    scheduler.run().await;

    assert_eq!(transport.attempts(), 0);
}
