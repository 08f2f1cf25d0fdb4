mod common;

use std::sync::Arc;

use common::{router_config, unreachable_config, FakeIface, FakeRouter, RouterState};
use monik::router::{RouterClient, RouterError};

#[tokio::test]
async fn list_interfaces_maps_counters_and_flags() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![
            FakeIface::new("xether1", 100, 50).comment("uplink"),
            FakeIface::new("xether2", 0, 0).down(),
        ],
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router.config());

    let interfaces = client.list_interfaces().await.unwrap();
    assert_eq!(interfaces.len(), 2);
    assert_eq!(interfaces[0].name, "xether1");
    assert_eq!(interfaces[0].rx_bytes, 100);
    assert_eq!(interfaces[0].tx_bytes, 50);
    assert!(interfaces[0].running);
    assert_eq!(interfaces[0].comment, "uplink");
    assert!(!interfaces[1].running);
}

#[tokio::test]
async fn traffic_rates_convert_to_mbps() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![FakeIface::new("xether2", 10, 10).rates(2_500_000, 1_000_000)],
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router.config());

    let (rx, tx) = client.get_traffic_rates("xether2").await.unwrap();
    assert!((rx - 2.5).abs() < f64::EPSILON);
    assert!((tx - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn empty_monitor_reply_is_no_data() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![FakeIface::new("xether2", 10, 10)], // no rates scripted
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router.config());

    let err = client.get_traffic_rates("xether2").await.unwrap_err();
    assert!(matches!(err, RouterError::NoData(name) if name == "xether2"));
}

#[tokio::test]
async fn concurrent_callers_are_strictly_serialized() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![FakeIface::new("xether2", 10, 10).rates(1_000_000, 1_000_000)],
        reply_delay: std::time::Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let client = Arc::new(RouterClient::new(router.config()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.get_traffic_rates("xether2").await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // The router must never observe overlapping requests.
    assert_eq!(router.max_in_flight().await, 1);
}

#[tokio::test]
async fn unreachable_router_reports_transport_error() {
    let client = RouterClient::new(unreachable_config());
    let err = client.list_interfaces().await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::Unreachable(_) | RouterError::Deadline(_)
    ));
}

#[tokio::test]
async fn bad_credentials_report_auth_error() {
    let router = FakeRouter::start(RouterState {
        reject_login: true,
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router.config());

    let err = client.list_interfaces().await.unwrap_err();
    assert!(matches!(err, RouterError::Auth(_)));
}

#[tokio::test]
async fn session_reconnects_lazily_after_a_drop() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![FakeIface::new("xether1", 1, 1)],
        drop_after_replies: Some(1),
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router.config());

    // First call succeeds, then the server severs the connection.
    assert!(client.list_interfaces().await.is_ok());

    // The dead session surfaces as a transport error and is dropped.
    let err = client.list_interfaces().await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::Unreachable(_) | RouterError::Deadline(_) | RouterError::Protocol(_)
    ));

    // The next call reconnects on a fresh session and succeeds.
    assert!(client.list_interfaces().await.is_ok());
}

#[tokio::test]
async fn system_info_tolerates_partial_replies() {
    let router = FakeRouter::start(RouterState::default()).await;
    let client = RouterClient::new(router.config());

    let info = client.get_system_info().await.unwrap();
    assert_eq!(info.identity, "edge-router");
    assert_eq!(info.board_name, "RB4011iGS+");
    assert_eq!(info.cpu, "4%");
    assert_eq!(info.memory, "734003200/1073741824");
    assert_eq!(info.timezone, "Asia/Jakarta");
    // Disk fields were absent from the scripted reply.
    assert!(info.disk.is_empty());
}

#[tokio::test]
async fn last_reboot_time_picks_the_newest_system_entry() {
    let router = FakeRouter::start(RouterState {
        log_entries: vec![
            (
                "system,info".to_string(),
                "router rebooted".to_string(),
                "jan/05 03:00:00".to_string(),
            ),
            (
                "system,info".to_string(),
                "system started".to_string(),
                "jan/06 04:30:00".to_string(),
            ),
            (
                "firewall".to_string(),
                "dropped packet".to_string(),
                "jan/07 00:00:00".to_string(),
            ),
        ],
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router.config());

    let reboot = client.get_last_reboot_time().await.unwrap();
    use chrono::Datelike;
    use chrono::Timelike;
    assert_eq!(reboot.month(), 1);
    assert_eq!(reboot.day(), 6);
    assert_eq!(reboot.hour(), 4);
}

#[tokio::test]
async fn get_interface_filters_by_name() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![
            FakeIface::new("xether1", 100, 50),
            FakeIface::new("xether2", 7, 9),
        ],
        ..Default::default()
    })
    .await;
    let client = RouterClient::new(router_config(router.addr));

    let sample = client.get_interface("xether2").await.unwrap();
    assert_eq!(sample.name, "xether2");
    assert_eq!(sample.rx_bytes, 7);

    let err = client.get_interface("nope").await.unwrap_err();
    assert!(matches!(err, RouterError::NoData(_)));
}
