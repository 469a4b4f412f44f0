mod agents;
mod app;
mod appointments;
mod auth;
mod broadcast;
mod config;
mod crm;
mod dispatch;
mod error;
mod evolution;
mod media;
mod phone;
mod quota;
mod segments;
mod store;
mod templating;
#[cfg(test)]
mod testing;
mod types;
mod uploads;
mod webhook;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return Err(err.into());
        }
    };

    app::run(config).await
}
