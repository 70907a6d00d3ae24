use chatflow::{
    error::StorageError,
    storage::{Profile, ProfileStorageTrait, UserInfo},
};
use serde_json::Value;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use teloxide::types::UserId;

use crate::{
    config::{DB_MAX_CONNECTIONS, DB_MIN_CONNECTIONS},
    message_log::{MessageObserverTrait, MessageRecord, ObserverError},
};

/// Open the pool and make sure the tables exist
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .min_connections(DB_MIN_CONNECTIONS)
        .max_connections(DB_MAX_CONNECTIONS)
        .connect(database_url)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_users (
            user_id BIGINT PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_interaction TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            interaction_count INTEGER NOT NULL DEFAULT 0,
            user_data JSONB NOT NULL DEFAULT '{}'::jsonb,
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        );
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_messages (
            id SERIAL PRIMARY KEY,
            project_id TEXT,
            user_id TEXT NOT NULL,
            message_type TEXT NOT NULL,
            message_text TEXT,
            message_data JSONB,
            node_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

fn db_user_id(user_id: UserId) -> Result<i64, StorageError> {
    i64::try_from(user_id.0)
        .map_err(|_| StorageError::InvalidData(format!("user id {} out of range", user_id)))
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

/// Profiles in the `bot_users` table, answers merged into the `user_data` JSONB column
#[derive(Clone)]
pub struct PgProfileStorage {
    pool: PgPool,
}

impl PgProfileStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileStorageTrait for PgProfileStorage {
    async fn record_interaction(&self, user: &UserInfo) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO bot_users (user_id, username, first_name, last_name, interaction_count)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (user_id) DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                last_interaction = NOW(),
                interaction_count = bot_users.interaction_count + 1,
                is_active = TRUE
            "#,
        )
        .bind(db_user_id(user.id)?)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StorageError> {
        let data = sqlx::query_scalar::<_, Json<Value>>(
            "SELECT user_data FROM bot_users WHERE user_id = $1",
        )
        .bind(db_user_id(user_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match data.map(|Json(value)| value) {
            None | Some(Value::Null) => Ok(Profile::new()),
            Some(Value::Object(profile)) => Ok(profile),
            Some(other) => Err(StorageError::InvalidData(format!(
                "user_data of user {} is not an object: {}",
                user_id, other
            ))),
        }
    }

    async fn set_value(
        &self,
        user_id: UserId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO bot_users (user_id, user_data)
            VALUES ($1, jsonb_build_object($2::text, $3::jsonb))
            ON CONFLICT (user_id) DO UPDATE SET
                user_data = COALESCE(bot_users.user_data, '{}'::jsonb)
                    || jsonb_build_object($2::text, $3::jsonb),
                last_interaction = NOW()
            "#,
        )
        .bind(db_user_id(user_id)?)
        .bind(key)
        .bind(Json(value))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

/// Message records in the `bot_messages` table
#[derive(Clone)]
pub struct PgMessageLog {
    pool: PgPool,
    project_id: Option<String>,
}

impl PgMessageLog {
    pub fn new(pool: PgPool, project_id: Option<String>) -> Self {
        Self { pool, project_id }
    }
}

#[async_trait::async_trait]
impl MessageObserverTrait for PgMessageLog {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn observe(&self, record: &MessageRecord) -> Result<(), ObserverError> {
        sqlx::query(
            r#"
            INSERT INTO bot_messages
                (project_id, user_id, message_type, message_text, message_data, node_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&self.project_id)
        .bind(record.user_id.to_string())
        .bind(record.direction.as_str())
        .bind(&record.text)
        .bind(Json(record.metadata()))
        .bind(&record.node)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
