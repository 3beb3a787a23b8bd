use std::net::SocketAddr;

use config::CONFIG;
use controller::create_router;
use log::info;

mod config;
mod controller;
mod database;
mod llm;
mod schema;
mod service;
mod utils;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&CONFIG.log_level))
        .init();
    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    info!("server start at {}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(
        listener,
        axum::Router::new()
            .nest(&CONFIG.base_path, create_router())
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("failed to start server");
}
