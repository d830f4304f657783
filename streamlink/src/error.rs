/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Error taxonomy for streaming members and subscriptions.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure returned by streaming and subscription operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamError {
    /// Wire value read while unset or expired.
    ValueNotSet(String),
    /// Operation not legal for the current role or state.
    InvalidOperation(String),
    /// Bad argument, such as an unknown index or mismatched reliability.
    InvalidArgument(String),
    /// Member, endpoint or subscription does not exist.
    NotFound(String),
    /// Generator or endpoint was forcibly aborted.
    OperationAborted(String),
    /// Generator sequence exhausted.
    StopIteration,
    /// Bounded wait expired.
    Timeout(String),
    /// Connect attempt failed or no connection is available.
    ConnectionFailed(String),
    /// Underlying transport reported an error.
    Transport(String),
}

impl StreamError {
    pub fn value_not_set(message: impl Into<String>) -> Self {
        StreamError::ValueNotSet(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        StreamError::InvalidOperation(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StreamError::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        StreamError::NotFound(message.into())
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        StreamError::OperationAborted(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        StreamError::Timeout(message.into())
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        StreamError::ConnectionFailed(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        StreamError::Transport(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout(_))
    }

    /// Short stable label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::ValueNotSet(_) => "value_not_set",
            StreamError::InvalidOperation(_) => "invalid_operation",
            StreamError::InvalidArgument(_) => "invalid_argument",
            StreamError::NotFound(_) => "not_found",
            StreamError::OperationAborted(_) => "operation_aborted",
            StreamError::StopIteration => "stop_iteration",
            StreamError::Timeout(_) => "timeout",
            StreamError::ConnectionFailed(_) => "connection_failed",
            StreamError::Transport(_) => "transport",
        }
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::ValueNotSet(msg) => write!(f, "value not set: {msg}"),
            StreamError::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            StreamError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            StreamError::NotFound(msg) => write!(f, "not found: {msg}"),
            StreamError::OperationAborted(msg) => write!(f, "operation aborted: {msg}"),
            StreamError::StopIteration => write!(f, "stop iteration"),
            StreamError::Timeout(msg) => write!(f, "timed out: {msg}"),
            StreamError::ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            StreamError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl Error for StreamError {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;
