//! PostgreSQL store for integration configs and tenant connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use easemail_core::{ConnectionId, IntegrationId, TenantId};
use easemail_integration::error::StoreError;
use easemail_integration::model::ConnectionStatus;
use easemail_integration::{
    Connection, IntegrationConfig, IntegrationMode, IntegrationStore, TenantSnapshot,
};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

const CONNECTION_COLUMNS: &str = r#"
    id, tenant_id, integration_id, name, account_email,
    credentials_encrypted, access_token_encrypted, refresh_token_encrypted,
    token_expires_at, status, last_error, last_used_at, is_active,
    created_at, updated_at
"#;

/// Row type for platform config queries.
#[derive(FromRow)]
struct IntegrationConfigRow {
    integration_id: String,
    mode: String,
    credentials_encrypted: Option<String>,
    markup_percent: f64,
    is_active: bool,
    setup_instructions: Option<String>,
    updated_at: DateTime<Utc>,
}

impl IntegrationConfigRow {
    fn try_into_config(self) -> Result<IntegrationConfig, Report<StoreError>> {
        let integration_id = IntegrationId::parse(&self.integration_id).map_err(invalid_row)?;
        Ok(IntegrationConfig {
            integration_id,
            mode: IntegrationMode::from_str_value(&self.mode),
            credentials_encrypted: self.credentials_encrypted,
            markup_percent: self.markup_percent,
            is_active: self.is_active,
            setup_instructions: self.setup_instructions,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for connection queries.
#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    tenant_id: String,
    integration_id: String,
    name: String,
    account_email: Option<String>,
    credentials_encrypted: Option<String>,
    access_token_encrypted: Option<String>,
    refresh_token_encrypted: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    status: String,
    last_error: Option<String>,
    last_used_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConnectionRow {
    fn try_into_connection(self) -> Result<Connection, Report<StoreError>> {
        Ok(Connection {
            id: ConnectionId::from_str(&self.id).map_err(invalid_row)?,
            tenant_id: TenantId::parse(&self.tenant_id).map_err(invalid_row)?,
            integration_id: IntegrationId::parse(&self.integration_id).map_err(invalid_row)?,
            name: self.name,
            account_email: self.account_email,
            credentials_encrypted: self.credentials_encrypted,
            access_token_encrypted: self.access_token_encrypted,
            refresh_token_encrypted: self.refresh_token_encrypted,
            token_expires_at: self.token_expires_at,
            status: ConnectionStatus::from_str_value(&self.status),
            last_error: self.last_error,
            last_used_at: self.last_used_at,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn query_failed(e: sqlx::Error) -> Report<StoreError> {
    StoreError::QueryFailed {
        details: e.to_string(),
    }
    .into()
}

fn invalid_row(e: impl std::fmt::Display) -> Report<StoreError> {
    StoreError::InvalidRow {
        details: e.to_string(),
    }
    .into()
}

/// [`IntegrationStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgIntegrationStore {
    pool: PgPool,
}

impl PgIntegrationStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationStore for PgIntegrationStore {
    async fn find_config(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationConfig>, Report<StoreError>> {
        let row: Option<IntegrationConfigRow> = sqlx::query_as(
            r#"
            SELECT integration_id, mode, credentials_encrypted, markup_percent,
                   is_active, setup_instructions, updated_at
            FROM integration_configs
            WHERE integration_id = $1
            "#,
        )
        .bind(integration_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        row.map(IntegrationConfigRow::try_into_config).transpose()
    }

    async fn list_configs(&self) -> Result<Vec<IntegrationConfig>, Report<StoreError>> {
        let rows: Vec<IntegrationConfigRow> = sqlx::query_as(
            r#"
            SELECT integration_id, mode, credentials_encrypted, markup_percent,
                   is_active, setup_instructions, updated_at
            FROM integration_configs
            ORDER BY integration_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter()
            .map(IntegrationConfigRow::try_into_config)
            .collect()
    }

    async fn upsert_config(&self, config: &IntegrationConfig) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO integration_configs
                (integration_id, mode, credentials_encrypted, markup_percent,
                 is_active, setup_instructions, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (integration_id)
            DO UPDATE SET mode = $2, credentials_encrypted = $3, markup_percent = $4,
                          is_active = $5, setup_instructions = $6, updated_at = $7
            "#,
        )
        .bind(config.integration_id.as_str())
        .bind(config.mode.as_str())
        .bind(&config.credentials_encrypted)
        .bind(config.markup_percent)
        .bind(config.is_active)
        .bind(&config.setup_instructions)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    async fn list_active_connections(
        &self,
        tenant_id: &TenantId,
        integration_id: Option<&IntegrationId>,
    ) -> Result<Vec<Connection>, Report<StoreError>> {
        let sql = format!(
            r#"
            SELECT {CONNECTION_COLUMNS}
            FROM integration_connections
            WHERE tenant_id = $1 AND is_active
              AND ($2::TEXT IS NULL OR integration_id = $2)
            ORDER BY created_at ASC
            "#
        );
        let rows: Vec<ConnectionRow> = sqlx::query_as(&sql)
            .bind(tenant_id.as_str())
            .bind(integration_id.map(IntegrationId::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        rows.into_iter()
            .map(ConnectionRow::try_into_connection)
            .collect()
    }

    async fn find_connection(
        &self,
        id: ConnectionId,
    ) -> Result<Option<Connection>, Report<StoreError>> {
        let sql = format!(
            r#"
            SELECT {CONNECTION_COLUMNS}
            FROM integration_connections
            WHERE id = $1
            "#
        );
        let row: Option<ConnectionRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        row.map(ConnectionRow::try_into_connection).transpose()
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO integration_connections
                (id, tenant_id, integration_id, name, account_email,
                 credentials_encrypted, access_token_encrypted, refresh_token_encrypted,
                 token_expires_at, status, last_error, last_used_at, is_active,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(connection.id.to_string())
        .bind(connection.tenant_id.as_str())
        .bind(connection.integration_id.as_str())
        .bind(&connection.name)
        .bind(&connection.account_email)
        .bind(&connection.credentials_encrypted)
        .bind(&connection.access_token_encrypted)
        .bind(&connection.refresh_token_encrypted)
        .bind(connection.token_expires_at)
        .bind(connection.status.as_str())
        .bind(&connection.last_error)
        .bind(connection.last_used_at)
        .bind(connection.is_active)
        .bind(connection.created_at)
        .bind(connection.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    async fn update_connection(&self, connection: &Connection) -> Result<(), Report<StoreError>> {
        let result = sqlx::query(
            r#"
            UPDATE integration_connections
            SET name = $2, account_email = $3, credentials_encrypted = $4,
                access_token_encrypted = $5, refresh_token_encrypted = $6,
                token_expires_at = $7, status = $8, last_error = $9,
                is_active = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(connection.id.to_string())
        .bind(&connection.name)
        .bind(&connection.account_email)
        .bind(&connection.credentials_encrypted)
        .bind(&connection.access_token_encrypted)
        .bind(&connection.refresh_token_encrypted)
        .bind(connection.token_expires_at)
        .bind(connection.status.as_str())
        .bind(&connection.last_error)
        .bind(connection.is_active)
        .bind(connection.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::QueryFailed {
                details: format!("connection {} does not exist", connection.id),
            }
            .into());
        }
        Ok(())
    }

    async fn touch_last_used(
        &self,
        id: ConnectionId,
        at: DateTime<Utc>,
    ) -> Result<(), Report<StoreError>> {
        // last_used_at is advisory: concurrent touches are last-write-wins.
        sqlx::query(
            r#"
            UPDATE integration_connections
            SET last_used_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    async fn tenant_snapshot(
        &self,
        tenant_id: &TenantId,
        cancel: CancellationToken,
    ) -> Result<TenantSnapshot, Report<StoreError>> {
        let read = async {
            let configs = self.list_configs().await?;
            let connections = self.list_active_connections(tenant_id, None).await?;
            Ok::<_, Report<StoreError>>(TenantSnapshot {
                configs,
                connections,
            })
        };

        // Dropping the read future aborts the in-flight query.
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(tenant_id = %tenant_id, "tenant snapshot cancelled");
                Err(StoreError::Cancelled.into())
            }
            result = read => result,
        }
    }
}
