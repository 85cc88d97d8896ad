//! Tracing and Sentry setup.

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricepulse_client::session::{SessionStore, Subscription};

/// Initialize Sentry (when `SENTRY_DSN` is set) and tracing.
///
/// The returned guard must be kept alive for events to be flushed.
pub fn init() -> Option<sentry::ClientInitGuard> {
    dotenvy::dotenv().ok();

    let guard = std::env::var("SENTRY_DSN")
        .ok()
        .filter(|dsn| !dsn.is_empty())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: std::env::var("SENTRY_ENVIRONMENT")
                        .ok()
                        .map(std::borrow::Cow::Owned),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pricepulse_client=info,pricepulse_cli=info".into());

    let json = std::env::var("PRICEPULSE_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let (plain_layer, json_layer) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_target(false)), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain_layer)
        .with(json_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    guard
}

/// Warnings and errors become Sentry events; info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        tracing::Level::TRACE => sentry_tracing::EventFilter::Ignore,
    }
}

/// Keep the Sentry user in step with the session.
pub fn track_session_user(session: &SessionStore) -> Subscription {
    session.subscribe(|event| {
        let user = event.session().map(|s| sentry::User {
            id: Some(s.identity.id.to_string()),
            email: Some(s.identity.email.to_string()),
            username: s.identity.name.clone(),
            ..Default::default()
        });
        sentry::configure_scope(|scope| scope.set_user(user));
    })
}
