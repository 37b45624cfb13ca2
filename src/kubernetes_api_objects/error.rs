// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
/// APIError is the error vocabulary the reconcilers see for a failed API request.
/// Both the kube-rs client and the executable API server model report failures in these terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum APIError {
    #[error("NotFound")]
    ObjectNotFound,
    #[error("AlreadyExists")]
    ObjectAlreadyExists,
    #[error("BadRequest")]
    BadRequest,
    #[error("Conflict")]
    Conflict,
    #[error("Invalid")]
    Invalid,
    #[error("Forbidden")]
    Forbidden,
    #[error("InternalError")]
    InternalError,
    #[error("Timeout")]
    Timeout,
    #[error("ServerTimeout")]
    ServerTimeout,
    #[error("Other")]
    Other,
}

impl APIError {
    pub fn is_object_not_found(&self) -> bool {
        matches!(self, APIError::ObjectNotFound)
    }

    pub fn is_object_already_exists(&self) -> bool {
        matches!(self, APIError::ObjectAlreadyExists)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, APIError::Conflict)
    }

    /// The reason string the Kubernetes API server attaches to this error.
    pub fn reason(&self) -> &'static str {
        match self {
            APIError::ObjectNotFound => "NotFound",
            APIError::ObjectAlreadyExists => "AlreadyExists",
            APIError::BadRequest => "BadRequest",
            APIError::Conflict => "Conflict",
            APIError::Invalid => "Invalid",
            APIError::Forbidden => "Forbidden",
            APIError::InternalError => "InternalError",
            APIError::Timeout => "Timeout",
            APIError::ServerTimeout => "ServerTimeout",
            APIError::Other => "Other",
        }
    }

    pub fn from_reason(reason: &str) -> APIError {
        match reason {
            "NotFound" => APIError::ObjectNotFound,
            "AlreadyExists" => APIError::ObjectAlreadyExists,
            "BadRequest" => APIError::BadRequest,
            "Conflict" => APIError::Conflict,
            "Invalid" => APIError::Invalid,
            "Forbidden" => APIError::Forbidden,
            "InternalError" => APIError::InternalError,
            "Timeout" => APIError::Timeout,
            "ServerTimeout" => APIError::ServerTimeout,
            _ => APIError::Other,
        }
    }
}
