// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! The live Home Assistant WebSocket session: one actor per connection,
//! started once the controller has an open socket.
//!
//! Structurally mirrors the teacher's `HomeAssistantClient`
//! (`client/mod.rs` + `client/actor.rs` + `client/streamhandler.rs`
//! collapsed into one file), with the connection state itself tracked by an
//! explicit `rust-fsm` machine instead of the teacher's scattered booleans.

use std::sync::Arc;

use actix::io::SinkWrite;
use actix::{Actor, ActorContext, Addr, AsyncContext, Context, StreamHandler};
use actix_codec::Framed;
use awc::error::WsProtocolError;
use awc::{ws, BoxedSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use log::{debug, error, info, warn};
use rust_fsm::*;
use serde_json::{json, Value};

use crate::ha::messages::{ConnectionEvent, ConnectionState};
use crate::ha::HaController;
use crate::registry::Plug;

const SUBSCRIBE_EVENTS_ID: u32 = 1;
const GET_STATES_ID: u32 = 2;

state_machine! {
    derive(Debug)
    HaConnection(AwaitingAuthReq)

    AwaitingAuthReq(AuthRequired) => AuthSent,
    AuthSent(AuthOk) => Subscribed,
    AuthSent(AuthInvalid) => Fatal,
    Subscribed(Event) => Subscribed,
}

pub struct HaSession {
    id: u32,
    sources: Vec<Arc<Plug>>,
    sink: SinkWrite<ws::Message, SplitSink<Framed<BoxedSocket, ws::Codec>, ws::Message>>,
    controller: Addr<HaController>,
    access_token: String,
    machine: StateMachine<HaConnection>,
}

impl HaSession {
    pub fn start(
        id: u32,
        access_token: String,
        sources: Vec<Arc<Plug>>,
        controller: Addr<HaController>,
        sink: SplitSink<Framed<BoxedSocket, ws::Codec>, ws::Message>,
        stream: impl futures::Stream<Item = Result<ws::Frame, WsProtocolError>> + 'static,
    ) -> Addr<Self> {
        HaSession::create(|ctx| {
            ctx.add_stream(stream);
            HaSession {
                id,
                sources,
                sink: SinkWrite::new(sink, ctx),
                controller,
                access_token,
                machine: StateMachine::new(),
            }
        })
    }

    fn send_json(&mut self, msg: Value) {
        let name = msg.get("type").and_then(Value::as_str).unwrap_or("?").to_string();
        if self.sink.write(ws::Message::Text(msg.to_string().into())).is_err() {
            warn!("[{}] Could not send {name}, connection closing", self.id);
        } else {
            debug!("[{}] <- {name}", self.id);
        }
    }

    fn on_text(&mut self, txt: Bytes, ctx: &mut Context<Self>) {
        let msg: Value = match serde_json::from_slice(txt.as_ref()) {
            Ok(v) => v,
            Err(e) => {
                warn!("[{}] Invalid JSON from HA: {e}", self.id);
                return;
            }
        };

        let id = msg.get("id").and_then(Value::as_u64).unwrap_or_default() as u32;
        match msg.get("type").and_then(Value::as_str).unwrap_or_default() {
            "auth_required" => {
                if self.machine.consume(&HaConnectionInput::AuthRequired).is_ok() {
                    self.send_json(json!({"type": "auth", "access_token": self.access_token}));
                }
            }
            "auth_invalid" => {
                let _ = self.machine.consume(&HaConnectionInput::AuthInvalid);
                error!(
                    "[{}] HA rejected authentication: {}",
                    self.id,
                    msg.get("message").and_then(Value::as_str).unwrap_or_default()
                );
                self.controller.do_send(ConnectionEvent {
                    session_id: self.id,
                    state: ConnectionState::AuthFailed,
                });
                ctx.stop();
            }
            "auth_ok" => {
                if self.machine.consume(&HaConnectionInput::AuthOk).is_ok() {
                    info!("[{}] Authenticated with Home Assistant", self.id);
                    self.send_json(json!({
                        "id": SUBSCRIBE_EVENTS_ID,
                        "type": "subscribe_events",
                        "event_type": "state_changed"
                    }));
                    self.send_json(json!({"id": GET_STATES_ID, "type": "get_states"}));
                }
            }
            "event" if id == SUBSCRIBE_EVENTS_ID => {
                let _ = self.machine.consume(&HaConnectionInput::Event);
                if let Some(data) = msg.get("event").and_then(|e| e.get("data")) {
                    for plug in &self.sources {
                        if let crate::datasource::DataSource::Ha(source) = &plug.data_source {
                            source.parse_incremental_update(data);
                        }
                    }
                }
            }
            "result" if id == GET_STATES_ID => {
                if let Some(results) = msg.get("result").and_then(Value::as_array) {
                    for element in results {
                        for plug in &self.sources {
                            if let crate::datasource::DataSource::Ha(source) = &plug.data_source {
                                source.parse_bulk_update(element);
                            }
                        }
                    }
                }
            }
            other => debug!("[{}] Ignoring unhandled message type {other:?}", self.id),
        }
    }
}

impl Actor for HaSession {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        debug!("[{}] HA session started", self.id);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        debug!("[{}] HA session stopped", self.id);
        self.controller.do_send(ConnectionEvent {
            session_id: self.id,
            state: ConnectionState::Closed,
        });
    }
}

impl StreamHandler<Result<ws::Frame, WsProtocolError>> for HaSession {
    fn handle(&mut self, msg: Result<ws::Frame, WsProtocolError>, ctx: &mut Self::Context) {
        let frame = match msg {
            Ok(f) => f,
            Err(e) => {
                error!("[{}] WebSocket protocol error: {e}", self.id);
                ctx.stop();
                return;
            }
        };

        match frame {
            ws::Frame::Text(txt) => self.on_text(txt, ctx),
            ws::Frame::Ping(b) => {
                let _ = self.sink.write(ws::Message::Pong(b));
            }
            ws::Frame::Close(reason) => {
                info!("[{}] HA closed connection: {reason:?}", self.id);
                ctx.stop();
            }
            _ => {}
        }
    }

    fn finished(&mut self, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}

impl actix::io::WriteHandler<WsProtocolError> for HaSession {}
