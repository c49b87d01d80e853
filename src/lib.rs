// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! A read-only OCI registry proxy that makes mutable tags transparently
//! immutable: the first time a tag is pulled through the proxy, the
//! `tag -> digest` binding is recorded as a signed attestation in a public
//! transparency log, and every later pull is checked against that record.

pub mod auth;
pub mod config;
pub mod dsse;
pub mod error;
pub mod fulcio;
pub mod metadata;
pub mod proxy;
pub mod reference;
pub mod rekor;
pub mod router;
pub mod tlog;
pub mod verify;
pub mod web;
