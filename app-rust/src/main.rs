use dotenvy::dotenv;
use lumina::{generation::DEFAULT_MODEL_ID, server, AppConfig, BoxedError, Orchestrator};
use lumina_sdk::google::{GoogleModel, GoogleModelOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), BoxedError> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let model = GoogleModel::new(
        DEFAULT_MODEL_ID,
        GoogleModelOptions {
            api_key: config.api_key.clone(),
            ..Default::default()
        },
    );
    let client = lumina::VisualizationClient::new(Arc::new(model));
    let orchestrator = Arc::new(Orchestrator::new(client));

    let mut app = server::router(orchestrator);
    if let Some(app_url) = &config.app_url {
        app = app.layer(server::cors_layer(app_url)?);
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, model = DEFAULT_MODEL_ID, "lumina listening");

    axum::serve(listener, app).await?;
    Ok(())
}
