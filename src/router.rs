// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Top-level request dispatch.

use hyper::{Body, Method, Request, Response, StatusCode};
use log::debug;

use crate::error::RegistryError;
use crate::proxy::ProxyHandler;
use crate::web;

pub const API_VERSION_HEADER: &str = "docker-distribution-api-version";
pub const API_VERSION: &str = "registry/2.0";

pub struct Router {
    proxy: ProxyHandler,
}

impl Router {
    pub fn new(proxy: ProxyHandler) -> Self {
        Self { proxy }
    }

    pub async fn route(&self, req: Request<Body>) -> Response<Body> {
        debug!("handler: {} {}", req.method(), req.uri());
        match req.uri().path() {
            "/" => web::home_page(),
            "/style.css" => web::stylesheet(),
            path if path == "/v2" || path.starts_with("/v2/") => {
                if req.method() != Method::GET && req.method() != Method::HEAD {
                    return RegistryError::Denied.into_response();
                }
                if path == "/v2" || path == "/v2/" {
                    return version_banner();
                }
                match self.proxy.handle(req).await {
                    Ok(resp) => resp,
                    Err(e) => e.into_response(),
                }
            }
            _ => not_found(),
        }
    }
}

fn version_banner() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(API_VERSION_HEADER, API_VERSION)
        .body(Body::empty())
        .expect("static response parts are valid")
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .expect("static response parts are valid")
}
