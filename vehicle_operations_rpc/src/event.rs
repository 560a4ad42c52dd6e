// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Events flowing between the connection's pipeline, the command server
//! policy, and the application.

use vehicle_operations_mqtt::control_packet::{Publish, SubAck, Subscribe};

use crate::command_server::{CommandRequest, ExecutionResult};

/// Opaque identity of a timer armed through the event pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub(crate) u64);

/// Error descriptor carried by [`Event::Error`] and forwarded to the
/// application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Human-readable description of the failure.
    pub message: String,
}

/// Events the pipeline delivers to an attached policy, serialized on the
/// dispatch thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection is being opened.
    ConnectionOpenRequest,
    /// The broker accepted the connection.
    Connected,
    /// The connection is being closed.
    ConnectionCloseRequest,
    /// The broker acknowledged the disconnect.
    Disconnected,
    /// The broker acknowledged a QoS 1 publish.
    PubAck(u32),
    /// The broker acknowledged a subscribe.
    SubAck(SubAck),
    /// A PUBLISH arrived from the broker.
    PublishReceived(Publish),
    /// A pipeline timer elapsed.
    Timeout(TimerToken),
    /// The application finished executing a command.
    CommandCompleted(ExecutionResult),
    /// A pipeline error to be forwarded to the application.
    Error(ErrorEvent),
}

/// Requests a policy emits toward the MQTT transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Subscribe to a topic filter.
    Subscribe(Subscribe),
    /// Publish a message.
    Publish(Publish),
}

/// Events delivered to the application through the connection's inbound
/// callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationEvent {
    /// A command request is ready for execution.
    CommandReceived(CommandRequest),
    /// A pipeline error was forwarded by a policy.
    Error(ErrorEvent),
}
