//! Change notification sources.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::debug;

use crate::{DbError, DbResult};

/// Raw notification payloads from one channel. The stream ends when the
/// underlying connection is lost.
pub type NotificationStream = BoxStream<'static, DbResult<String>>;

/// Something that can open a notification feed for a named channel.
#[async_trait]
pub trait NotificationSource: Send + Sync + 'static {
    /// Open a dedicated connection and start listening on `channel`.
    async fn connect(&self, channel: &str) -> DbResult<NotificationStream>;
}

/// PostgreSQL `LISTEN` source.
pub struct PgNotificationSource {
    pool: PgPool,
}

impl PgNotificationSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn connect(&self, channel: &str) -> DbResult<NotificationStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        debug!(channel = %channel, "LISTEN issued");

        // `try_recv` yields `Ok(None)` once the connection drops. The stream
        // ends there so the caller owns the reconnect policy.
        let stream = futures::stream::unfold(Some(listener), |state| async move {
            let mut listener = state?;
            match listener.try_recv().await {
                Ok(Some(notification)) => {
                    Some((Ok(notification.payload().to_string()), Some(listener)))
                }
                Ok(None) => None,
                Err(e) => Some((Err(DbError::from(e)), None)),
            }
        });

        Ok(stream.boxed())
    }
}
