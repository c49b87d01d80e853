// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The embedded landing page and stylesheet.

use hyper::{header, Body, Response};
use lazy_static::lazy_static;

const HOME_TEMPLATE: &str = include_str!("../static/home.html");
const STYLESHEET: &str = include_str!("../static/style.css");

lazy_static! {
    /// Built once, on first request, shared by all handlers afterwards.
    static ref HOME_HTML: String = HOME_TEMPLATE.replace("{{version}}", env!("CARGO_PKG_VERSION"));
}

pub fn home_page() -> Response<Body> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(HOME_HTML.as_str()))
        .expect("static response parts are valid")
}

pub fn stylesheet() -> Response<Body> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/css")
        .body(Body::from(STYLESHEET))
        .expect("static response parts are valid")
}
