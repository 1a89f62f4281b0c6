// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Home Assistant controller: owns the reconnect loop to a single HA
//! WebSocket endpoint and the plugs fed by it.
//!
//! Grounded on the teacher's `Controller` (`controller/mod.rs`) for the
//! reconnect-on-`ConnectMsg` shape; the actual session protocol lives in
//! [`session`].

pub mod messages;
pub mod session;
pub mod source;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix::{Actor, ActorFutureExt, AsyncContext, Context, Handler, ResponseActFuture, WrapFuture};
use futures::StreamExt;
use log::{error, info, warn};

use crate::configuration::HaControllerConfig;
use crate::ha::messages::{ConnectMsg, ConnectionEvent, ConnectionState};
use crate::ha::session::HaSession;
use crate::registry::Plug;

const RECONNECT_DELAY: Duration = Duration::from_secs(10);

static SESSION_SEQ: AtomicU32 = AtomicU32::new(1);

pub struct HaController {
    config: HaControllerConfig,
    sources: Vec<Arc<Plug>>,
    client: awc::Client,
    session: Option<actix::Addr<HaSession>>,
    current_session_id: Option<u32>,
}

impl HaController {
    pub fn new(config: HaControllerConfig, sources: Vec<Arc<Plug>>) -> Self {
        Self {
            config,
            sources,
            client: awc::Client::default(),
            session: None,
            current_session_id: None,
        }
    }
}

impl Actor for HaController {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.notify(ConnectMsg);
    }
}

impl Handler<ConnectMsg> for HaController {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _msg: ConnectMsg, ctx: &mut Self::Context) -> Self::Result {
        let url = self.config.url.clone();
        let token = self.config.auth_token.clone();
        let sources = self.sources.clone();
        let controller_addr = ctx.address();
        let id = SESSION_SEQ.fetch_add(1, Ordering::SeqCst);
        let request = self.client.ws(url.as_str());

        info!("Connecting to Home Assistant at {url}");
        Box::pin(
            async move { request.connect().await }
                .into_actor(self)
                .map(move |result, act, _ctx| match result {
                    Ok((_, framed)) => {
                        info!("Connected to Home Assistant at {url}");
                        let (sink, stream) = framed.split();
                        act.session = Some(HaSession::start(
                            id,
                            token,
                            sources,
                            controller_addr,
                            sink,
                            stream,
                        ));
                        act.current_session_id = Some(id);
                    }
                    Err(e) => {
                        warn!("Could not connect to Home Assistant at {url}: {e}. Retrying in {RECONNECT_DELAY:?}");
                        act.session = None;
                        schedule_reconnect(_ctx);
                    }
                }),
        )
    }
}

fn schedule_reconnect(ctx: &mut Context<HaController>) {
    ctx.run_later(RECONNECT_DELAY, |_, ctx| {
        ctx.notify(ConnectMsg);
    });
}

impl Handler<ConnectionEvent> for HaController {
    type Result = ();

    fn handle(&mut self, msg: ConnectionEvent, ctx: &mut Self::Context) -> Self::Result {
        if self.current_session_id != Some(msg.session_id) {
            return;
        }
        match msg.state {
            ConnectionState::AuthFailed => {
                error!("Home Assistant rejected our access token; not retrying authentication");
                self.session = None;
                self.current_session_id = None;
            }
            ConnectionState::Closed => {
                info!("Home Assistant session closed, reconnecting in {RECONNECT_DELAY:?}");
                self.session = None;
                self.current_session_id = None;
                schedule_reconnect(ctx);
            }
        }
    }
}
