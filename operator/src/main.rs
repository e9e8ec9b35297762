pub use controller::*;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use common::OperatorConfig;

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(metrics)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    telemetry::init().await;

    // Start kubernetes controllers
    let config = OperatorConfig::from_env();
    tracing::info!("Starting with primary cell {}", config.primary_cell);
    let (manager, controller_nova, controller_cell, controller_api) = Manager::new(config).await;

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(manager.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind("0.0.0.0:9000")?
    .shutdown_timeout(5);

    tokio::select! {
        _ = controller_nova => tracing::warn!("Nova controller exited"),
        _ = controller_cell => tracing::warn!("NovaCell controller exited"),
        _ = controller_api => tracing::warn!("NovaAPI controller exited"),
        _ = server.run() => tracing::info!("actix exited"),
    }
    Ok(())
}
