// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! MQTT controller: one broker session shared by every MQTT-backed plug.
//!
//! No teacher file touches MQTT; grounded on
//! `kmay89-securaCV`'s `event_mqtt_bridge` for `rumqttc` usage and on
//! `original_source/senselink/mqtt/mqtt_controller.py` for the
//! listener-merge-then-subscribe and reconnect-and-resubscribe shape. The
//! non-actix `EventLoop` is bridged into the actor mailbox with a
//! `tokio::spawn`'d pump task, mirroring the teacher's pattern of wrapping
//! an external async source into an actix stream (`client/mod.rs`'s
//! `ctx.add_stream`).

pub mod source;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix::{Actor, AsyncContext, Context, Handler, Message, SpawnHandle};
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::configuration::MqttControllerConfig;
use crate::datasource::DataSource;
use crate::registry::Plug;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Message)]
#[rtype(result = "()")]
struct BrokerEvent(Event);

#[derive(Message)]
#[rtype(result = "()")]
struct BrokerDisconnected;

pub struct MqttController {
    config: MqttControllerConfig,
    client: Option<AsyncClient>,
    /// Topic -> plugs whose MQTT source listens on it.
    topic_map: HashMap<String, Vec<Arc<Plug>>>,
    timeout_handles: HashMap<String, SpawnHandle>,
}

impl MqttController {
    pub fn new(config: MqttControllerConfig, sources: Vec<Arc<Plug>>) -> Self {
        let mut topic_map: HashMap<String, Vec<Arc<Plug>>> = HashMap::new();
        for plug in &sources {
            if let DataSource::Mqtt(source) = &plug.data_source {
                for topic in source.topics() {
                    topic_map.entry(topic.to_string()).or_default().push(Arc::clone(plug));
                }
            }
        }

        Self {
            config,
            client: None,
            topic_map,
            timeout_handles: HashMap::new(),
        }
    }

    fn connect(&mut self, ctx: &mut Context<Self>) {
        let mut options = MqttOptions::new(
            format!("senselink-{}", &self.config.host),
            self.config.host.clone(),
            self.config.port,
        );
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let addr = ctx.address();

        actix::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => addr.do_send(BrokerEvent(event)),
                    Err(e) => {
                        error!("Disconnected from MQTT broker with error: {e}");
                        addr.do_send(BrokerDisconnected);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        self.client = Some(client);
    }

    fn subscribe_all(&self) {
        let Some(client) = &self.client else { return };
        info!("Subscribing to {} MQTT topic(s)", self.topic_map.len());
        for topic in self.topic_map.keys() {
            let client = client.clone();
            let topic = topic.clone();
            actix::spawn(async move {
                if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                    error!("MQTT subscribe error for {topic}: {e}");
                }
            });
        }
    }

    fn dispatch(&mut self, topic: &str, payload: &str, ctx: &mut Context<Self>) {
        let Some(plugs) = self.topic_map.get(topic) else {
            return;
        };
        for plug in plugs.clone() {
            let DataSource::Mqtt(source) = &plug.data_source else {
                continue;
            };
            let rearm = if Some(topic) == source.power_topic.as_deref() {
                source.power_handler(payload)
            } else if Some(topic) == source.state_topic.as_deref() {
                source.state_handler(payload)
            } else if Some(topic) == source.attribute_topic.as_deref() {
                source.attribute_handler(payload)
            } else {
                false
            };

            if rearm {
                self.rearm_timeout(plug, ctx);
            }
        }
    }

    fn rearm_timeout(&mut self, plug: Arc<Plug>, ctx: &mut Context<Self>) {
        let DataSource::Mqtt(source) = &plug.data_source else {
            return;
        };
        let Some(duration) = source.timeout_duration else {
            return;
        };

        if let Some(handle) = self.timeout_handles.remove(&plug.mac) {
            ctx.cancel_future(handle);
        }

        let mac = plug.mac.clone();
        let mac_for_insert = mac.clone();
        let handle = ctx.run_later(Duration::from_secs_f64(duration), move |act, _ctx| {
            if let DataSource::Mqtt(source) = &plug.data_source {
                source.handle_timeout();
            }
            act.timeout_handles.remove(&mac);
        });
        self.timeout_handles.insert(mac_for_insert, handle);
    }
}

impl Actor for MqttController {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Starting MQTT client to {}:{}", self.config.host, self.config.port);
        self.connect(ctx);
    }
}

impl Handler<BrokerEvent> for MqttController {
    type Result = ();

    fn handle(&mut self, msg: BrokerEvent, ctx: &mut Self::Context) -> Self::Result {
        match msg.0 {
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("MQTT client connected");
                self.subscribe_all();
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                debug!("MQTT message on {}: {payload}", publish.topic);
                self.dispatch(&publish.topic, &payload, ctx);
            }
            _ => {}
        }
    }
}

impl Handler<BrokerDisconnected> for MqttController {
    type Result = ();

    fn handle(&mut self, _msg: BrokerDisconnected, _ctx: &mut Self::Context) -> Self::Result {
        warn!("MQTT client disconnected, reconnecting in {RECONNECT_DELAY:?}");
    }
}
