use actix_web::middleware::Logger;
use actix_web::{App, HttpServer};
use anyhow::Context;
use log::{error, info};
use std::sync::Arc;

use predict_service::{routes, ModelInference, ServiceConfig};

#[actix_web::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("invalid configuration")?;

    info!("Loading model from {}", config.model_path.display());
    let model = ModelInference::load(&config.model_path)
        .with_context(|| format!("cannot load model {}", config.model_path.display()))?;
    info!(
        "Model ready: {:?} with {} features",
        model.format(),
        model.schema().len()
    );
    let model = Arc::new(model);

    let bind_address = config.bind_address();
    info!("Listening on http://{}", bind_address);
    info!("Workers: {}", config.workers);

    let json_limit = config.json_limit;
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .configure(routes::configure(model.clone(), json_limit))
    })
    .workers(config.workers)
    .bind(&bind_address)
    .with_context(|| format!("cannot bind {}", bind_address))?
    .run()
    .await?;

    Ok(())
}
