use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{header, Method};
use club_hub::{
    auth::Keys,
    config::Config,
    connect_to_db,
    email::{LogTransport, MailTransport, Mailer, SmtpTransport},
    models::Role,
    realtime::Hub,
    seed_staff_account,
    session::SessionStore,
    uploads::Uploads,
    Services,
};
use envconfig::Envconfig;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use url::Url;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("club_hub=debug,tower_http=debug")),
        )
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;
    let keys = Keys::from_base64_secret(&config.session_secret)
        .context("SESSION_SECRET must be valid base64")?;

    let transport: Arc<dyn MailTransport> = match (&config.email_username, &config.email_password) {
        (Some(username), Some(password)) => Arc::new(SmtpTransport::new(
            &config.smtp_relay,
            username.clone(),
            password.clone(),
        )?),
        _ => {
            tracing::warn!("EMAIL_USERNAME/EMAIL_PASSWORD not set, emails will only be logged");
            Arc::new(LogTransport)
        }
    };
    let mailer = Mailer::new(
        transport,
        config.mail_from.parse().context("MAIL_FROM is not a mailbox")?,
        Url::parse(&config.app_url).context("APP_URL is not a url")?,
    );

    let pool = connect_to_db(&config.db_url)?;
    for (role, email, password, name) in [
        (Role::Admin, &config.admin_email, &config.admin_password, "Super Admin"),
        (Role::Dean, &config.dean_email, &config.dean_password, "Dean"),
    ] {
        match password {
            Some(password) => {
                seed_staff_account(&pool, role, email, password, name).await?;
            }
            None => tracing::info!(%role, "no password configured, skipping account seed"),
        }
    }

    let sessions = SessionStore::new(
        keys,
        config.session_idle_timeout(),
        config.session_lifetime(),
    );
    let hub = Hub::new();
    let (purger, pruner) = (sessions.clone(), hub.clone());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purger.purge_idle().await;
            if purged > 0 {
                tracing::debug!(purged, "dropped idle sessions");
            }
            let pruned = pruner.prune().await;
            if pruned > 0 {
                tracing::debug!(pruned, "dropped unused topics");
            }
        }
    });

    let services = Services {
        pool,
        sessions,
        hub,
        mailer,
        uploads: Uploads::new(&config.upload_dir),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);
    let app = club_hub::app(services).layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
