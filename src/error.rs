// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Mapping of internal failures onto the OCI distribution error schema.

use hyper::{header, Body, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Failures that surface to registry clients.
///
/// Log-record failures and per-entry verification failures never reach this
/// type; they are logged and swallowed where they occur.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry is read-only")]
    Denied,

    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    #[error("got digest {got:?} for tag {tag}, want {want:?}")]
    TagInvalid {
        tag: String,
        want: String,
        got: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Denied => "DENIED",
            RegistryError::NameInvalid(_) => "NAME_INVALID",
            RegistryError::TagInvalid { .. } => "TAG_INVALID",
            RegistryError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RegistryError::Denied => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::NameInvalid(_) | RegistryError::TagInvalid { .. } => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the error as a registry API response body.
    pub fn into_response(self) -> Response<Body> {
        let envelope = ErrorEnvelope {
            errors: vec![ErrorInfo {
                code: self.code().to_string(),
                message: self.to_string(),
            }],
        };
        let body = serde_json::to_string(&envelope)
            .unwrap_or_else(|_| r#"{"errors":[{"code":"INTERNAL_ERROR","message":""}]}"#.into());
        Response::builder()
            .status(self.status())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("static response parts are valid")
    }
}

/// Wire form of a registry error, `{"errors":[{"code":..,"message":..}]}`.
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorInfo>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}
