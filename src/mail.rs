//! Deliver verification codes to users.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, RecoveryConfig,
};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Outbound mail collaborator.
///
/// Delivery is best effort: callers only learn whether the message left.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send `code` to `to`. `false` when the message could not be handed
    /// over.
    async fn deliver(&self, to: &str, code: &str) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid broker address: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported broker scheme `{0}`")]
    Scheme(String),
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("event serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mail templates list.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Six-digit account verification code.
    VerificationCode,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    template: Template,
    code: Cow<'a, str>,
}

/// RabbitMQ publisher of mailing events.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Connect to the broker described by `config`.
    pub async fn new(config: &Mail) -> Result<Self, MailError> {
        let addr = Url::parse(&config.address)?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|_| MailError::Scheme(addr.scheme().to_owned()))?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or_else(|| DEFAULT_AMPQ_VHOST.to_owned()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let recovery_config =
            RecoveryConfig::default().auto_recover_connection();
        let conn_config = ConnectionProperties::default()
            .with_connection_name("astra_mail_client".into())
            .with_experimental_recovery_config(recovery_config);
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, queue = config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: &Connection,
        queue: &str,
    ) -> Result<Channel, MailError> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content<'_>) -> Cloudevent<'_> {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "app.astra.email",
            source: "app.astra.identity",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish a templated event addressed to `email`.
    pub async fn publish_event(
        &self,
        template: Template,
        email: &str,
        code: &str,
    ) -> Result<bool, MailError> {
        let Some(conn) = &self.conn else {
            tracing::warn!(?template, "no mail broker configured, event dropped");
            return Ok(false);
        };
        let channel = Self::create_channel(conn, &self.queue).await?;

        let content = Content {
            to: Cow::from(email),
            template,
            code: Cow::from(code),
        };
        let payload = serde_json::to_string(&Self::create_event(content))?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(?template, "event sent");

        Ok(true)
    }
}

#[async_trait]
impl Mailer for MailManager {
    async fn deliver(&self, to: &str, code: &str) -> bool {
        match self.publish_event(Template::VerificationCode, to, code).await {
            Ok(sent) => sent,
            Err(err) => {
                tracing::error!(error = %err, "verification mail not delivered");
                false
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Mailer keeping every message in memory.
    #[derive(Default)]
    pub struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        offline: AtomicBool,
    }

    impl Outbox {
        /// Make every following delivery fail.
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Last code sent to `to`.
        pub fn last_code(&self, to: &str) -> Option<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(email, _)| email == to)
                .map(|(_, code)| code.clone())
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn deliver(&self, to: &str, code: &str) -> bool {
            if self.offline.load(Ordering::SeqCst) {
                return false;
            }
            self.sent.lock().unwrap().push((to.into(), code.into()));
            true
        }
    }

    #[tokio::test]
    async fn test_no_broker() {
        let manager = MailManager::default();
        assert!(!manager.deliver("artist@example.com", "123456").await);
    }

    #[test]
    fn test_event_shape() {
        let event = MailManager::create_event(Content {
            to: Cow::from("artist@example.com"),
            template: Template::VerificationCode,
            code: Cow::from("123456"),
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["specversion"], "1.0");
        assert_eq!(json["data"]["template"], "verification_code");
        assert_eq!(json["data"]["code"], "123456");
        assert_eq!(json["id"].as_str().unwrap().len(), ID_LENGTH);
    }
}
