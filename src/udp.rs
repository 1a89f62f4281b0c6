// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! The UDP server that impersonates each registered plug's TP-Link Kasa
//! HS110 emeter responses.
//!
//! Grounded on `original_source/senselink/senselink.py`'s
//! `SenseLinkProtocol.datagram_received`, wired with `tokio::net::UdpSocket`
//! the way the teacher wires its own async I/O loops (a plain `tokio::spawn`
//! task, not an actix actor — there's no mailbox-driven state to protect
//! here).

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error};
use serde_json::Value;
use tokio::net::UdpSocket;

use crate::codec::{decrypt, encrypt};
use crate::registry::Registry;

const MAX_DATAGRAM_SIZE: usize = 4096;

/// Runs the UDP responder loop until the socket errors out.
///
/// `respond` gates whether replies are actually transmitted (the
/// `SENSE_RESPONSE`/`-q` quiet mode); the response is always synthesized and
/// logged so quiet mode remains useful for debugging.
pub async fn run(registry: Arc<Registry>, bind_addr: &str, respond: bool) -> std::io::Result<()> {
    let socket = UdpSocket::bind(bind_addr).await?;
    log::info!("Starting UDP server on {bind_addr}");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        handle_datagram(&socket, &registry, &buf[..len], addr, respond).await;
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    registry: &Registry,
    data: &[u8],
    addr: SocketAddr,
    respond: bool,
) {
    let decrypted = decrypt(data);
    let request: Value = match serde_json::from_str(&decrypted) {
        Ok(v) => v,
        Err(_) => {
            debug!("Did not receive valid JSON message, ignoring");
            return;
        }
    };

    if !has_path(&request, &["emeter", "get_realtime"]) || !has_path(&request, &["system", "get_sysinfo"]) {
        debug!("Ignoring non-emeter JSON from {addr}: {request}");
        return;
    }

    if is_non_empty(request.get("emeter").and_then(|e| e.get("get_realtime"))) {
        debug!("Ignoring non-empty/non-Sense UDP request (self-echo)");
        return;
    }

    debug!("Broadcast received from {addr}: {request}");

    let target: SocketAddr = match &registry.target {
        Some(t) => match format!("{t}:{}", addr.port()).parse() {
            Ok(a) => a,
            Err(_) => addr,
        },
        None => addr,
    };

    for plug in &registry.plugs {
        if plug.in_aggregate() {
            debug!("Plug '{}' in aggregate, not sending discrete response", plug.identifier);
            continue;
        }
        plug.mark_seen();

        let response = plug.generate_response();
        let plug_should_respond = plug.should_respond();

        if !respond {
            debug!(
                "SENSE_RESPONSE disabled, plug {} response content would be: {response}",
                plug.identifier
            );
            continue;
        }
        if !plug_should_respond {
            debug!("Plug {} response rate limited", plug.identifier);
            continue;
        }

        let json_str = response.to_string();
        let encrypted = encrypt(&json_str);
        let payload = &encrypted[4..];

        debug!("Sending response for plug {}: {response}", plug.identifier);
        if let Err(e) = socket.send_to(payload, target).await {
            error!("Error sending UDP response for plug {}: {e}", plug.identifier);
        }
    }
}

fn has_path(value: &Value, path: &[&str]) -> bool {
    path.iter().try_fold(value, |v, seg| v.get(seg)).is_some()
}

fn is_non_empty(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Object(m)) => !m.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn has_path_detects_required_keys() {
        let v = json!({"emeter": {"get_realtime": {}}, "system": {"get_sysinfo": {}}});
        assert!(has_path(&v, &["emeter", "get_realtime"]));
        assert!(has_path(&v, &["system", "get_sysinfo"]));
        assert!(!has_path(&v, &["system", "missing"]));
    }

    #[test]
    fn is_non_empty_detects_self_echo() {
        assert!(!is_non_empty(Some(&json!({}))));
        assert!(is_non_empty(Some(&json!({"power": 1.0}))));
    }
}
