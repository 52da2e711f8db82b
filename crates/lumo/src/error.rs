// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by the server-side components.

use crate::codec::CodecError;
use crate::message::{ResourcePath, Status};
use thiserror::Error;

/// Operation requested on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Execute,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-request failure. Always converted into a response status; never fatal
/// to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("No resource at {0}")]
    NotFound(ResourcePath),

    #[error("Resource {path} does not allow {operation}")]
    MethodNotAllowed {
        path: ResourcePath,
        operation: Operation,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] CodecError),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Allocation failure: {0}")]
    AllocationFailure(String),
}

impl RequestError {
    /// Response status reported to the requester.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::MethodNotAllowed { .. } => Status::MethodNotAllowed,
            Self::BadRequest(_) | Self::MalformedPayload(_) | Self::AlreadyExists(_) => {
                Status::BadRequest
            }
            Self::AllocationFailure(_) => Status::InternalServerError,
        }
    }

    /// Missing mandatory property.
    pub fn missing(id: impl std::fmt::Display) -> Self {
        Self::BadRequest(format!("missing mandatory property {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RequestError::NotFound(ResourcePath::parse("/x")).status(),
            Status::NotFound
        );
        assert_eq!(
            RequestError::MalformedPayload(CodecError::UnknownTag(9)).status(),
            Status::BadRequest
        );
        assert_eq!(
            RequestError::AlreadyExists("/6/0".into()).status(),
            Status::BadRequest
        );
        assert_eq!(
            RequestError::AllocationFailure("timer".into()).status(),
            Status::InternalServerError
        );
    }

    #[test]
    fn test_display() {
        let err = RequestError::MethodNotAllowed {
            path: ResourcePath::parse("/a/light"),
            operation: Operation::Execute,
        };
        assert_eq!(err.to_string(), "Resource /a/light does not allow execute");
    }
}
