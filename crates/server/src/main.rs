use std::sync::Arc;

use oidc_provider::AppResources;
use oidc_provider::api::start_webserver;
use oidc_provider::config::load_config_or_panic;
use oidc_provider::oauth2::OAuth2State;
use oidc_provider::oauth2::keys::SigningKey;
use sea_orm::Database;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "oidc_provider=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    // Load config
    let config = Arc::new(load_config_or_panic());

    // Set up SeaORM database connection
    let db = Arc::new(Database::connect(&config.database_url).await?);

    let oauth2_config = &config.oauth2;
    let signing_key = match &oauth2_config.signing_key_path {
        Some(path) => SigningKey::load(&oauth2_config.signing_key_id, path)?,
        None => {
            tracing::warn!(
                "No oauth2.signing_key_path configured; generated an ephemeral key. \
                 Tokens will not verify after a restart."
            );
            SigningKey::generate(&oauth2_config.signing_key_id)?
        }
    };
    tracing::info!(
        kid = %signing_key.kid(),
        issuer = %oauth2_config.issuer_url,
        "Signing key ready"
    );

    let oauth2_state = OAuth2State::new(db.clone(), oauth2_config, Arc::new(signing_key));
    let resources = AppResources {
        db,
        config: config.clone(),
    };

    // Sweep expired codes, sessions and refresh-token records
    {
        let state = oauth2_state.clone();
        let period = Duration::from_secs(config.oauth2.cleanup_interval);
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = state.cleanup_expired().await {
                    tracing::error!("OAuth2 cleanup failed: {}", e);
                }
            }
        });
    }

    start_webserver(resources, oauth2_state).await
}
