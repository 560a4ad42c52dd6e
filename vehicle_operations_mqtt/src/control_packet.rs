// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire-facing control packet records exchanged with the MQTT5 transport.

use bytes::Bytes;
use thiserror::Error;

use crate::properties::PropertyBag;

/// Quality of Service for a PUBLISH or a SUBSCRIBE filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce = 0,
    /// Delivery acknowledged by the receiver.
    #[default]
    AtLeastOnce = 1,
    /// Exactly-once delivery handshake.
    ExactlyOnce = 2,
}

/// Error converting a raw byte into a [`QoS`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid QoS value: {0}")]
pub struct InvalidQoS(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

/// A PUBLISH packet, used both for received indications and outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Topic name the message was (or will be) published to.
    pub topic: String,
    /// Delivery QoS.
    pub qos: QoS,
    /// Opaque message payload.
    pub payload: Bytes,
    /// MQTT5 properties attached to the packet.
    pub properties: PropertyBag,
}

/// An outbound SUBSCRIBE request for a single topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    /// Topic filter to subscribe to.
    pub topic_filter: String,
    /// Maximum QoS granted to the subscription.
    pub qos: QoS,
    /// Packet id assigned when the request was enqueued.
    pub id: u32,
}

/// The broker's acknowledgement of a SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    /// Packet id of the SUBSCRIBE being acknowledged.
    pub id: u32,
}
