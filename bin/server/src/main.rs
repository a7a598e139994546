use easemail_core::IntegrationId;
use easemail_integration::{
    Catalog, ConnectionBroker, CredentialVault, IntegrationRegistry, RestIntegration,
    TokenRefresher, ValidatorSet,
};
use easemail_server::{config::ServerConfig, db::PgIntegrationStore, routes, state::AppState};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let vault = Arc::new(
        CredentialVault::from_base64(&config.vault.master_key).expect("invalid vault master key"),
    );
    let catalog = Arc::new(Catalog::builtin());

    // Shared by vendor probes and tool calls
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.validator.request_timeout_seconds))
        .build()
        .expect("failed to build HTTP client");

    let mut refresher = TokenRefresher::new().expect("failed to build token refresher");
    for (id, settings) in config.oauth {
        let integration_id = match IntegrationId::parse(&id) {
            Ok(integration_id) if catalog.get(&integration_id).is_some() => integration_id,
            _ => {
                tracing::warn!(integration_id = %id, "ignoring OAuth client for unknown integration");
                continue;
            }
        };
        refresher
            .register(integration_id, settings.into())
            .expect("invalid OAuth client configuration");
    }

    let mut registry = IntegrationRegistry::new();
    for definition in catalog.iter() {
        let integration = RestIntegration::new(definition.clone(), http_client.clone())
            .with_oauth_client(refresher.has_client(&definition.id));
        registry
            .register(Arc::new(integration))
            .expect("failed to register integration");
    }
    registry.initialize_all().await;

    let validators = ValidatorSet::builtin(&catalog, http_client);
    let store = Arc::new(PgIntegrationStore::new(db_pool));
    let broker = ConnectionBroker::new(
        catalog,
        store,
        vault,
        Arc::new(validators),
        config.broker.to_broker_config(),
    )
    .with_refresher(Arc::new(refresher));

    let app_state = Arc::new(AppState::new(broker, Arc::new(registry)));
    let app = routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutting down");
}
