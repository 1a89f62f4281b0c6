// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! End-to-end UDP protocol tests: a real `UdpSocket` client talks to a real
//! `senselink::udp::run` server over loopback, the way Sense talks to an
//! actual HS110 on the LAN.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use senselink::codec::{decrypt, encrypt};
use senselink::configuration::{PlugEntry, Settings, SourceConfig};
use senselink::registry::build_registry;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::time::timeout;

fn plug_mapping(id: &str, entry: PlugEntry) -> HashMap<String, PlugEntry> {
    HashMap::from([(id.to_string(), entry)])
}

/// Builds a client socket and a server bound to distinct loopback ports, and
/// spawns the server loop in the background. Each test uses its own port to
/// run independently of the others.
async fn spawn_server(settings: Settings, bind_addr: &'static str, respond: bool) -> UdpSocket {
    let registry = Arc::new(build_registry(settings).unwrap());
    tokio::spawn(senselink::udp::run(registry, bind_addr, respond));
    // Give the server a moment to bind before the test starts sending.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(bind_addr).await.unwrap();
    client
}

fn sense_probe() -> Value {
    json!({"emeter": {"get_realtime": {}}, "system": {"get_sysinfo": {}}})
}

async fn send_probe(client: &UdpSocket, probe: &Value) {
    let encrypted = encrypt(&probe.to_string());
    client.send(&encrypted[4..]).await.unwrap();
}

async fn recv_response(client: &UdpSocket) -> Option<Value> {
    let mut buf = [0u8; 4096];
    match timeout(Duration::from_millis(300), client.recv(&mut buf)).await {
        Ok(Ok(len)) => Some(serde_json::from_str(&decrypt(&buf[..len])).unwrap()),
        _ => None,
    }
}

#[tokio::test]
async fn hs110_roundtrip_reports_configured_wattage() {
    let entry = PlugEntry {
        mac: Some("aa:11:11:11:11:01".to_string()),
        min_watts: 42.5,
        max_watts: 42.5,
        ..Default::default()
    };
    let settings = Settings {
        sources: vec![SourceConfig::Static(vec![plug_mapping("lamp", entry)])],
        target: None,
    };
    let client = spawn_server(settings, "127.0.0.1:19901", true).await;

    send_probe(&client, &sense_probe()).await;
    let response = recv_response(&client).await.expect("expected a UDP reply");

    assert_eq!(response["emeter"]["get_realtime"]["power"], 42.5);
    assert_eq!(response["system"]["get_sysinfo"]["mac"], "AA:11:11:11:11:01");
    assert_eq!(response["system"]["get_sysinfo"]["model"], "HS110(US)");
}

#[tokio::test]
async fn non_empty_emeter_is_treated_as_self_echo_and_ignored() {
    let entry = PlugEntry {
        mac: Some("aa:11:11:11:11:02".to_string()),
        min_watts: 10.0,
        max_watts: 10.0,
        ..Default::default()
    };
    let settings = Settings {
        sources: vec![SourceConfig::Static(vec![plug_mapping("lamp", entry)])],
        target: None,
    };
    let client = spawn_server(settings, "127.0.0.1:19902", true).await;

    let echo = json!({"emeter": {"get_realtime": {"power": 1.0}}, "system": {"get_sysinfo": {}}});
    send_probe(&client, &echo).await;

    assert!(recv_response(&client).await.is_none());
}

#[tokio::test]
async fn non_emeter_datagrams_are_ignored() {
    let entry = PlugEntry {
        mac: Some("aa:11:11:11:11:03".to_string()),
        min_watts: 10.0,
        max_watts: 10.0,
        ..Default::default()
    };
    let settings = Settings {
        sources: vec![SourceConfig::Static(vec![plug_mapping("lamp", entry)])],
        target: None,
    };
    let client = spawn_server(settings, "127.0.0.1:19903", true).await;

    send_probe(&client, &json!({"hello": "world"})).await;

    assert!(recv_response(&client).await.is_none());
}

#[tokio::test]
async fn quiet_mode_synthesizes_but_never_transmits() {
    let entry = PlugEntry {
        mac: Some("aa:11:11:11:11:04".to_string()),
        min_watts: 10.0,
        max_watts: 10.0,
        ..Default::default()
    };
    let settings = Settings {
        sources: vec![SourceConfig::Static(vec![plug_mapping("lamp", entry)])],
        target: None,
    };
    let client = spawn_server(settings, "127.0.0.1:19904", false).await;

    send_probe(&client, &sense_probe()).await;

    assert!(recv_response(&client).await.is_none());
}

#[tokio::test]
async fn skip_rate_suppresses_responses_between_full_replies() {
    let entry = PlugEntry {
        mac: Some("aa:11:11:11:11:05".to_string()),
        skip_rate: 1,
        min_watts: 10.0,
        max_watts: 10.0,
        ..Default::default()
    };
    let settings = Settings {
        sources: vec![SourceConfig::Static(vec![plug_mapping("lamp", entry)])],
        target: None,
    };
    let client = spawn_server(settings, "127.0.0.1:19905", true).await;

    send_probe(&client, &sense_probe()).await;
    assert!(recv_response(&client).await.is_some(), "first probe should reply");

    send_probe(&client, &sense_probe()).await;
    assert!(recv_response(&client).await.is_none(), "second probe should be skipped");

    send_probe(&client, &sense_probe()).await;
    assert!(recv_response(&client).await.is_some(), "third probe should reply again");
}

#[tokio::test]
async fn aggregate_member_is_hidden_and_aggregate_reports_combined_wattage() {
    let a = PlugEntry {
        mac: Some("aa:11:11:11:11:06".to_string()),
        min_watts: 15.0,
        max_watts: 15.0,
        ..Default::default()
    };
    let b = PlugEntry {
        mac: Some("aa:11:11:11:11:07".to_string()),
        min_watts: 25.0,
        max_watts: 25.0,
        ..Default::default()
    };
    let agg = PlugEntry {
        mac: Some("aa:11:11:11:11:08".to_string()),
        elements: vec!["a".to_string(), "b".to_string()],
        ..Default::default()
    };
    let settings = Settings {
        sources: vec![
            SourceConfig::Static(vec![plug_mapping("a", a), plug_mapping("b", b)]),
            SourceConfig::Aggregate(vec![plug_mapping("agg", agg)]),
        ],
        target: None,
    };
    let client = spawn_server(settings, "127.0.0.1:19906", true).await;

    send_probe(&client, &sense_probe()).await;

    let mut macs_seen = Vec::new();
    while let Some(response) = recv_response(&client).await {
        macs_seen.push(response["system"]["get_sysinfo"]["mac"].as_str().unwrap().to_string());
        if response["system"]["get_sysinfo"]["mac"] == "AA:11:11:11:11:08" {
            assert_eq!(response["emeter"]["get_realtime"]["power"], 40.0);
        }
    }

    assert!(macs_seen.contains(&"AA:11:11:11:11:08".to_string()));
    assert!(!macs_seen.contains(&"AA:11:11:11:11:06".to_string()));
    assert!(!macs_seen.contains(&"AA:11:11:11:11:07".to_string()));
}
