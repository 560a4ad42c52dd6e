// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! MQTT5 primitives shared by the vehicle command envoys: control packet
//! records, the MQTT5 property bag, and topic name/filter handling.

pub mod control_packet;
pub mod properties;
pub mod topic;
