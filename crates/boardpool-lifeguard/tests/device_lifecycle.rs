//! End-to-end device lifecycle tests against an in-memory store and a fake
//! relay board.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use boardpool_core::RelayCoordinate;
use boardpool_lifeguard::device_machine::{events, states};
use boardpool_lifeguard::{DeviceMachineConfig, HardwareApi, LifeguardDriver, NoopPxe};
use boardpool_machine::DriverConfig;
use boardpool_relay::testing::FakeRelayBoard;
use boardpool_relay::RelayClient;
use boardpool_store::{MemStore, StateStore};

const FAST_SETTLE: Duration = Duration::from_millis(5);

fn lifeguard(store: &MemStore, config: &DeviceMachineConfig) -> LifeguardDriver {
    let relay = Arc::new(RelayClient::with_settle(FAST_SETTLE));
    let hardware = Arc::new(HardwareApi::new(
        Arc::new(store.devices()),
        relay,
        Arc::new(NoopPxe),
    ));
    LifeguardDriver::new(
        Arc::new(store.devices()),
        hardware,
        DriverConfig::new("srv"),
        config,
    )
}

fn device_state(store: &MemStore, device: &str) -> String {
    store.devices().get_state(device).unwrap().state
}

async fn wait_for_state(store: &MemStore, device: &str, wanted: &str, patience: Duration) {
    let deadline = tokio::time::Instant::now() + patience;
    loop {
        if device_state(store, device) == wanted {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "device {device} did not reach state {wanted}; stuck in {}",
            device_state(store, device)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ready_self_check_rearms_without_changing_state() {
    let store = MemStore::new();
    store.add_device("board-0001", "prod", "srv", None);
    store
        .devices()
        .set_state("board-0001", states::READY, Some(Utc::now()))
        .unwrap();

    let driver = lifeguard(&store, &DeviceMachineConfig::default());
    driver.handle_timeout("board-0001").unwrap();

    let state = store.devices().get_state("board-0001").unwrap();
    assert_eq!(state.state, states::READY);
    let deadline = state.timeout.expect("self-check must be re-armed");
    assert!(deadline > Utc::now() + chrono::Duration::seconds(250));
}

#[tokio::test(flavor = "multi_thread")]
async fn reboot_power_cycles_through_the_relay_board() {
    let board = FakeRelayBoard::start().await.unwrap();
    board.add_relay(1, 3);

    let store = MemStore::new();
    let coordinate = RelayCoordinate::new(board.host(), 1, 3).unwrap();
    store.add_device("board-0001", "prod", "srv", Some(coordinate));
    store
        .devices()
        .set_state("board-0001", states::READY, None)
        .unwrap();

    let driver = lifeguard(&store, &DeviceMachineConfig::default());
    driver.start();

    driver
        .handle_event("board-0001", events::REBOOT, &Value::Null)
        .unwrap();
    assert_eq!(device_state(&store, "board-0001"), states::REBOOTING);

    // The background cycle confirms both halves and reports back in.
    wait_for_state(&store, "board-0001", states::REBOOT_COMPLETE, Duration::from_secs(5)).await;
    assert_eq!(board.actions().len(), 4);

    // The image comes up and tells us it is running.
    driver
        .handle_event("board-0001", events::IMAGE_RUNNING, &Value::Null)
        .unwrap();
    let state = store.devices().get_state("board-0001").unwrap();
    assert_eq!(state.state, states::READY);
    assert!(state.counters.is_empty());

    driver.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_power_cycle_failures_escalate_to_permanent() {
    let store = MemStore::new();
    // No relay coordinate: every power cycle fails, no event ever arrives.
    store.add_device("board-0001", "prod", "srv", None);
    store
        .devices()
        .set_state("board-0001", states::REBOOTING, None)
        .unwrap();

    let config = DeviceMachineConfig {
        reboot_failure_limit: 3,
        ..DeviceMachineConfig::default()
    };
    let driver = lifeguard(&store, &config);

    for expected in 1..=3_u32 {
        driver.handle_timeout("board-0001").unwrap();
        let state = store.devices().get_state("board-0001").unwrap();
        assert_eq!(state.state, states::REBOOTING);
        assert_eq!(state.counters.get(states::REBOOTING), Some(&expected));
    }

    // Past the limit the device fails permanently...
    driver.handle_timeout("board-0001").unwrap();
    assert_eq!(
        device_state(&store, "board-0001"),
        states::FAILED_REBOOT_REBOOTING
    );

    // ...and further timeouts leave it there.
    driver.handle_timeout("board-0001").unwrap();
    assert_eq!(
        device_state(&store, "board-0001"),
        states::FAILED_REBOOT_REBOOTING
    );

    // Only an explicit reboot request leaves a failed state.
    driver
        .handle_event("board-0001", events::REBOOT, &Value::Null)
        .unwrap();
    assert_eq!(device_state(&store, "board-0001"), states::REBOOTING);
}

#[tokio::test(flavor = "multi_thread")]
async fn image_that_never_comes_up_escalates() {
    let store = MemStore::new();
    store.add_device("board-0001", "prod", "srv", None);
    store
        .devices()
        .set_state("board-0001", states::REBOOT_COMPLETE, None)
        .unwrap();

    let config = DeviceMachineConfig {
        complete_failure_limit: 2,
        ..DeviceMachineConfig::default()
    };
    let driver = lifeguard(&store, &config);

    for _ in 0..2 {
        // Image wait expires below the limit: another power cycle.
        driver.handle_timeout("board-0001").unwrap();
        assert_eq!(device_state(&store, "board-0001"), states::REBOOTING);
        // Pretend the cycle confirmed and we are waiting on the image again.
        store
            .devices()
            .set_state("board-0001", states::REBOOT_COMPLETE, None)
            .unwrap();
    }

    driver.handle_timeout("board-0001").unwrap();
    assert_eq!(
        device_state(&store, "board-0001"),
        states::FAILED_REBOOT_COMPLETE
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_self_check_triggers_recovery() {
    let store = MemStore::new();
    store.add_device("board-0001", "prod", "srv", None);
    store
        .devices()
        .set_state("board-0001", states::READY, None)
        .unwrap();

    let driver = lifeguard(&store, &DeviceMachineConfig::default());
    driver
        .handle_event("board-0001", events::SELF_CHECK_FAILED, &Value::Null)
        .unwrap();
    assert_eq!(device_state(&store, "board-0001"), states::REBOOTING);
}

#[tokio::test(flavor = "multi_thread")]
async fn unrecognized_state_still_accepts_reboot() {
    let store = MemStore::new();
    store.add_device("board-0001", "prod", "srv", None);
    store
        .devices()
        .set_state("board-0001", "some-retired-state", None)
        .unwrap();

    let driver = lifeguard(&store, &DeviceMachineConfig::default());
    driver
        .handle_event("board-0001", events::REBOOT, &Value::Null)
        .unwrap();
    assert_eq!(device_state(&store, "board-0001"), states::REBOOTING);
}

#[tokio::test(flavor = "multi_thread")]
async fn conditional_change_guards_against_races() {
    let store = MemStore::new();
    store.add_device("board-0001", "prod", "srv", None);
    store
        .devices()
        .set_state("board-0001", states::NEW, None)
        .unwrap();

    let driver = lifeguard(&store, &DeviceMachineConfig::default());

    assert!(driver
        .conditional_state_change("board-0001", states::NEW, states::READY)
        .unwrap());
    assert_eq!(device_state(&store, "board-0001"), states::READY);

    // A second caller expecting `new` loses the race and gets a clean false.
    assert!(!driver
        .conditional_state_change("board-0001", states::NEW, states::READY)
        .unwrap());
}
