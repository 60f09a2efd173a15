//! Astra is the account core of an art-sharing service: private email
//! storage, account verification and moderation.

#![forbid(unsafe_code)]
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod gallery;
pub mod identity;
pub mod mail;
pub mod moderation;
mod router;
pub mod status;
pub mod telemetry;
pub mod token;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{delete, get, post, put};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::config::{Configuration, Secrets};
use crate::database::Storage;
use crate::identity::IdentityManager;
use crate::mail::Mailer;
use crate::moderation::Moderator;

const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    bearer: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub db: Arc<dyn Storage>,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub mail: Arc<dyn Mailer>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Identity manager over this state's collaborators.
    pub fn identity(&self) -> IdentityManager {
        IdentityManager::new(
            Arc::clone(&self.db),
            Arc::clone(&self.crypto),
            Arc::clone(&self.mail),
        )
    }

    pub fn moderator(&self) -> Moderator {
        Moderator::new(Arc::clone(&self.db))
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    // Write actions, refused to users in timeout.
    let gated = Router::new()
        .route("/art", post(router::art::create))
        .route("/reviews/{art_id}", post(router::reviews::create))
        .route_layer(AxumMiddleware::from_fn(router::gate))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::auth,
        ));

    let account = Router::new()
        .route("/user", get(router::users::me))
        .route("/profile", put(router::users::update))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::auth,
        ));

    let admin = Router::new()
        .route("/users", get(router::admin::list))
        .route("/users/{serial}", delete(router::admin::delete))
        .route("/users/ban/{serial}", post(router::admin::ban))
        .route("/users/unban/{serial}", post(router::admin::unban))
        .route_layer(AxumMiddleware::from_fn(router::admin_only))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::auth,
        ));

    let auth = Router::new()
        // `POST /auth/register` goes to `create`.
        .route("/register", post(router::create::handler))
        .route("/verify-email", post(router::verify::verify))
        .route("/resend-code", post(router::verify::resend))
        .route("/login", post(router::login::handler))
        .route("/user/{serial}", get(router::users::public))
        .merge(account);

    let api = Router::new()
        .route("/art/{id}", get(router::art::get))
        .route("/reviews/{art_id}", get(router::reviews::list))
        .merge(gated)
        .nest("/auth", auth)
        .nest("/admin", admin);

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(status::status))
        .route("/metrics", get(telemetry::metrics))
        .nest("/api/v1", api)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();
    let config = Configuration::default().path(path.into()).read()?;

    let secrets = Secrets::from_env()?;

    let db: Arc<dyn Storage> = match config.postgres {
        Some(ref config) => Arc::new(
            database::PostgresStore::new(
                &config.address,
                config
                    .username
                    .as_deref()
                    .unwrap_or(database::DEFAULT_CREDENTIALS),
                config
                    .password
                    .as_deref()
                    .unwrap_or(database::DEFAULT_CREDENTIALS),
                config
                    .database
                    .as_deref()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?,
        ),
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data is kept in memory"
            );
            Arc::new(database::MemoryStore::default())
        },
    };

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone(), &secrets)?);
    if secrets.admin_passcode.is_none() {
        tracing::warn!("missing `ADMIN_PASSCODE`, administrators cannot log in");
    }

    let token = token::TokenManager::new(
        &config.url,
        secrets.token.as_bytes(),
        config.token.as_ref(),
    );

    // handle mail sender.
    let mail: Arc<dyn Mailer> = if let Some(cfg) = &config.mail {
        Arc::new(mail::MailManager::new(cfg).await?)
    } else {
        tracing::warn!(
            "missing `mail` entry on `config.yaml` file, verification codes will not be delivered"
        );
        Arc::new(mail::MailManager::default())
    };

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        metrics,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::LazyLock;

    use zeroize::Zeroizing;

    use super::*;
    use crate::config::Argon2;
    use crate::crypto::Crypto;
    use crate::database::{MemoryStore, UserKey};
    use crate::mail::tests::Outbox;
    use crate::user::{NewUser, User, Verification};

    pub const PASSCODE: &str = "grandmaster";
    const TOKEN_SECRET: &str = "token-secret";

    static CRYPTO: LazyLock<Arc<Crypto>> = LazyLock::new(|| {
        let secrets = Secrets {
            key: Zeroizing::new("test-key".into()),
            salt: Zeroizing::new("0123456789abcdef".into()),
            token: Zeroizing::new(TOKEN_SECRET.into()),
            admin_passcode: Some(Zeroizing::new(PASSCODE.into())),
        };
        let argon2 = Argon2 {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        };

        Arc::new(Crypto::new(Some(argon2), &secrets).unwrap())
    });

    /// Shared cryptographic manager, its key derivation is slow.
    pub fn crypto() -> Arc<Crypto> {
        Arc::clone(&CRYPTO)
    }

    /// In-memory state with a recording mailer.
    pub fn state() -> (AppState, Arc<Outbox>) {
        let config = Arc::new(Configuration::default());
        let outbox = Arc::new(Outbox::default());
        let state = AppState {
            token: token::TokenManager::new(
                &config.url,
                TOKEN_SECRET.as_bytes(),
                None,
            ),
            config,
            db: Arc::new(MemoryStore::default()),
            crypto: crypto(),
            mail: outbox.clone(),
            metrics: None,
        };

        (state, outbox)
    }

    /// Store a verified user with password `pw123` and open a session.
    pub async fn signed_in(
        state: &AppState,
        username: &str,
        is_admin: bool,
    ) -> (User, String) {
        let email = format!("{username}@example.com");
        let user = state
            .db
            .insert_user(NewUser {
                username: username.into(),
                email: user::EmailState::seal(&email, &state.crypto).unwrap(),
                password: state.crypto.pwd.hash_password("pw123").unwrap(),
                is_admin,
                verification: Verification::Verified,
            })
            .await
            .unwrap();
        let token = state.token.create(user.serial_number.as_str()).unwrap();

        (user, token)
    }

    /// Formatted log lines, shared with the subscriber writing them.
    #[derive(Clone, Default)]
    pub struct Logs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Logs {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for Logs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Record every event of the current thread until the guard drops.
    pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, Logs) {
        let logs = Logs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();

        (tracing::subscriber::set_default(subscriber), logs)
    }

    /// Fresh copy of a stored user.
    pub async fn reload(state: &AppState, user: &User) -> User {
        state
            .db
            .find_user(UserKey::Id(user.id))
            .await
            .unwrap()
            .unwrap()
    }
}
