// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::info;

use tlogistry::config::TlogConfig;
use tlogistry::metadata::MetadataClient;
use tlogistry::proxy::ProxyHandler;
use tlogistry::router::Router;
use tlogistry::tlog::TlogController;

/// Registry proxy arguments. Everything else comes from the environment.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let config = TlogConfig::from_env()?;

    // The identity is a hard startup dependency: without it the proxy can
    // neither record verifiable bindings nor recognize its own entries.
    let metadata = MetadataClient::default();
    let identity = metadata
        .service_account_email()
        .await
        .context("fetching deployment identity")?;
    info!("Hello, my name is {identity}");

    let tlog = Arc::new(
        TlogController::new(&config, identity, metadata)
            .await
            .context("constructing log controller")?,
    );
    let router = Arc::new(Router::new(ProxyHandler::new(tlog)));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let make_svc = make_service_fn(move |_conn| {
        let router = router.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let router = router.clone();
                async move { Ok::<_, Infallible>(router.route(req).await) }
            }))
        }
    });

    info!("listening on port {}", args.port);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("server error")?;
    Ok(())
}
