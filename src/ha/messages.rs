// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Actix message definitions for the Home Assistant controller/session actors.

use actix::prelude::Message;

/// Internal message telling the controller to (re)connect.
#[derive(Message, Default)]
#[rtype(result = "()")]
pub struct ConnectMsg;

/// Session actor connection lifecycle events, reported back to the controller.
pub enum ConnectionState {
    AuthFailed,
    Closed,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ConnectionEvent {
    pub session_id: u32,
    pub state: ConnectionState,
}
