//! Tests for multiplexing several wavemeter sessions onto one driver.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use wlm_scpi::driver::{DriverCall, DriverError, SimulatedDriver};
use wlm_scpi::measurement::{Measurement, RawEvent, Reading};
use wlm_scpi::session::SessionState;
use wlm_scpi::{DriverHub, ProductId, SessionError, Wavemeter};

/// Helper to create a hub over a simulated driver with the given wavemeters.
fn create_hub(ids: &[ProductId]) -> (Arc<SimulatedDriver>, Arc<DriverHub>) {
    let driver = Arc::new(SimulatedDriver::with_wavemeters(ids.iter().copied()));
    let hub = Arc::new(DriverHub::new(driver.clone()));
    (driver, hub)
}

fn expected_wavelength(product_id: ProductId, channel: u32) -> Reading {
    let base = Decimal::from(400 + product_id);
    let step = Decimal::new(i64::from(channel - 1) * 25, 2);
    Reading::Finite(base + step)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_connect_is_rejected() {
    let (_driver, hub) = create_hub(&[4711]);
    let first = Wavemeter::new(4711, hub.clone());
    let second = Wavemeter::new(4711, hub.clone());

    let (left, right) = tokio::join!(first.connect(), second.connect());
    let (winner, loser) = match (left, right) {
        (Ok(()), Err(err)) => {
            assert!(matches!(err, SessionError::AlreadyConnected(4711)));
            (&first, &second)
        }
        (Err(err), Ok(())) => {
            assert!(matches!(err, SessionError::AlreadyConnected(4711)));
            (&second, &first)
        }
        other => panic!("expected exactly one connect to succeed, got {other:?}"),
    };
    assert_eq!(winner.state(), SessionState::Connected);
    assert_eq!(loser.state(), SessionState::Unconnected);

    // The winning session is unaffected
    assert_eq!(winner.get_channel_count().await.unwrap(), 8);
    assert_eq!(hub.live_sessions().await, vec![4711]);

    // Connecting the same session twice is rejected as well
    assert!(matches!(
        winner.connect().await,
        Err(SessionError::AlreadyConnected(4711))
    ));
    assert_eq!(hub.live_sessions().await, vec![4711]);

    winner.disconnect().await.unwrap();

    // Once released, another session may take over
    loser.connect().await.unwrap();
    loser.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_randomized_sessions_never_interleave() {
    let ids: Vec<ProductId> = vec![1, 2, 3, 4];
    let (driver, hub) = create_hub(&ids);
    driver.set_latency(Duration::from_millis(1));

    let sessions: Vec<Arc<Wavemeter>> = ids
        .iter()
        .map(|id| Arc::new(Wavemeter::new(*id, hub.clone())))
        .collect();
    for session in &sessions {
        session.connect().await.unwrap();
    }

    let tasks: Vec<_> = sessions
        .iter()
        .enumerate()
        .map(|(index, session)| {
            let session = Arc::clone(session);
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(0x5eed + index as u64);
                let product_id = session.product_id();
                for _ in 0..25 {
                    match rng.gen_range(0..3) {
                        0 => {
                            let channel = rng.gen_range(1..=8);
                            let reading = session.get_wavelength(channel).await.unwrap();
                            assert_eq!(reading, expected_wavelength(product_id, channel));
                        }
                        1 => {
                            let info = session.get_wavemeter_info().await.unwrap();
                            assert_eq!(info.serial, product_id);
                        }
                        _ => {
                            let channel = rng.gen_range(1..=8);
                            session.set_channel(channel).await.unwrap();
                            assert_eq!(session.get_channel().await.unwrap(), channel);
                        }
                    }
                    let pause = rng.gen_range(0..3);
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert!(!driver.overlap_detected());

    // Every call after a selection ran against a selected wavemeter
    let journal = driver.journal();
    assert!(journal
        .iter()
        .filter(|entry| !matches!(entry.call, DriverCall::Select(_)))
        .all(|entry| entry.selected.is_some()));

    for session in &sessions {
        session.disconnect().await.unwrap();
    }
    assert!(!driver.callback_installed());
}

#[tokio::test]
async fn test_events_are_routed_by_product_id() {
    let (driver, hub) = create_hub(&[1, 2]);
    let first = Wavemeter::new(1, hub.clone());
    let second = Wavemeter::new(2, hub.clone());
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    // Nobody listens yet: the event is dropped
    let delivered = driver
        .emit_event(RawEvent {
            product_id: 1,
            mode: 14,
            int_val: 1,
            double_val: 21.0,
            result: 0,
        })
        .join()
        .unwrap();
    assert!(delivered);

    let mut events = first.subscribe();
    let mut other = second.subscribe();
    assert_eq!(hub.events().subscriber_count(&1), 1);

    driver
        .emit_event(RawEvent {
            product_id: 1,
            mode: 14,
            int_val: 2,
            double_val: 22.5,
            result: 0,
        })
        .join()
        .unwrap();

    let package = events.recv().await.unwrap();
    match package.measurement {
        Measurement::Scalar {
            timestamp, value, ..
        } => {
            assert_eq!(timestamp, 2);
            assert_eq!(value.to_string(), "22.5");
        }
        other => panic!("unexpected measurement {other:?}"),
    }
    assert!(events.try_recv().is_none());
    assert!(other.try_recv().is_none());

    drop(events);
    assert_eq!(hub.events().subscriber_count(&1), 0);

    first.disconnect().await.unwrap();
    second.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unavailable_wavemeter_is_reported() {
    let (driver, hub) = create_hub(&[1]);
    let session = Wavemeter::new(1, hub);
    session.connect().await.unwrap();

    driver.set_missing_until_window(1);
    // The window is opened and the call retried once
    assert_eq!(
        session.get_temperature().await.unwrap().to_string(),
        "23.5"
    );
    assert_eq!(driver.windows_opened(), vec![1]);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_failed_callback_removal_still_disconnects() {
    let (driver, hub) = create_hub(&[1, 2]);
    let first = Wavemeter::new(1, hub.clone());
    let second = Wavemeter::new(2, hub.clone());
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    driver.set_remove_callback_failure(Some(DriverError::WlmMissing));

    // Not the last session: the callback is left alone
    first.disconnect().await.unwrap();
    assert_eq!(hub.live_sessions().await, vec![2]);

    let result = second.disconnect().await;
    assert!(matches!(
        result,
        Err(SessionError::Driver(DriverError::WlmMissing))
    ));
    assert_eq!(second.state(), SessionState::Disconnected);
    assert!(hub.live_sessions().await.is_empty());
    assert!(hub.callback_installed().await);

    // A later session reuses the callback and can remove it once the driver recovers
    driver.set_remove_callback_failure(None);
    second.connect().await.unwrap();
    second.disconnect().await.unwrap();
    assert!(!hub.callback_installed().await);
    assert!(!driver.callback_installed());
}
