// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! RPC server policy for executing vehicle commands over MQTT5.
//!
//! A [`command_server::CommandServer`] attaches to a connection's event
//! pipeline, subscribes to the command topic filter derived from its identity
//! material, parses incoming command requests into
//! [`command_server::CommandRequest`]s for the application, and publishes the
//! application's [`command_server::ExecutionResult`] back to the originator
//! with the MQTT5 response properties set.

pub mod command_server;
pub mod error;
pub mod event;
pub mod pipeline;

#[macro_use]
extern crate derive_builder;
