// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for the RPC server policy.

use thiserror::Error;

use crate::pipeline::PipelineClosed;

/// Error returned by the command server's public operations and event handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandServerError {
    /// A required argument was empty or malformed.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Name of the offending argument or field.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The operation requires the server to be attached to a connection.
    #[error("the command server is not attached to a connection")]
    NotSupported,

    /// An event was delivered to a faulted server instance.
    #[error("the command server has faulted and no longer accepts events")]
    InvalidState,

    /// An outbound event or post was rejected by the pipeline.
    #[error(transparent)]
    Send(#[from] PipelineClosed),

    /// A condition the state machine treats as impossible was observed.
    #[error("internal logic error: {0}")]
    InternalLogic(&'static str),
}

impl CommandServerError {
    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        CommandServerError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}
