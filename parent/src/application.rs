// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::configuration::RouterOptions;
use crate::constants::{REQUEST_BODY_LIMIT, REQUEST_TIMEOUT};
use crate::routes;
use crate::routing::RouteTable;

pub struct AppState {
    pub options: RouterOptions,
    pub table: RouteTable,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

/// Builds the router with the body-limit and timeout layers applied.
/// Rate limiting is added in [`Application::run_until_stopped`] because it
/// keys on the peer address, which only exists on a real listener.
pub fn create_router(options: RouterOptions, table: RouteTable) -> Router {
    let state = Arc::new(AppState { options, table });

    Router::new()
        .route("/attest/fetch", post(routes::attest_fetch))
        .route("/health", get(routes::health))
        .route("/routes", get(routes::routes))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

impl Application {
    pub async fn build(options: RouterOptions) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", options.host, options.port);
        let listener = TcpListener::bind(address).await?;
        let port = listener.local_addr()?.port();

        let table = RouteTable::from_options(&options);
        let router = create_router(options.clone(), table);

        tracing::info!("[router] listening at http://{}:{}", options.host, port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        // Rate limiting: 100 requests per second per IP
        let governor_config = GovernorConfigBuilder::default()
            .per_second(100)
            .burst_size(100)
            .finish()
            .expect("valid governor config");

        let app = self
            .router
            .layer(GovernorLayer::new(Arc::new(governor_config)));

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("[router] received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("[router] received SIGTERM, starting graceful shutdown");
        }
    }
}
