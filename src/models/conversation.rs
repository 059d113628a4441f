use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Conversation {
            id: Uuid::new_v4(),
            user_id: String::new(),
            title: String::new(),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Conversation {
    /// Returns the conversation if it exists, otherwise creates one with the
    /// given id (or a fresh one when no id was provided). First send in the
    /// client creates the conversation implicitly.
    pub async fn get_or_create(
        pool: &PgPool,
        user_id: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<Self> {
        if let Some(conversation_id) = conversation_id {
            if let Some(conversation) = query_as::<_, Conversation>(
                r#"
                SELECT * FROM conversations
                WHERE id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(conversation_id)
            .fetch_optional(pool)
            .await?
            {
                debug!("Conversation found: {}", conversation.id);
                return Ok(conversation);
            }
        }

        let conversation = Conversation {
            id: conversation_id.unwrap_or_else(Uuid::new_v4),
            user_id: user_id.to_string(),
            title: "New Conversation".to_string(),
            ..Default::default()
        };

        let conversation = query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_one(pool)
        .await?;

        debug!("Conversation created: {}", conversation.id);
        Ok(conversation)
    }

    pub async fn update_title(
        pool: &PgPool,
        conversation_id: Uuid,
        user_id: &str,
        new_title: &str,
    ) -> Result<Self> {
        let conversation = query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET title = $1, updated_at = $2
            WHERE id = $3 AND user_id = $4
            RETURNING *
            "#,
        )
        .bind(new_title)
        .bind(Utc::now())
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        debug!("Conversation renamed: {}", conversation.id);
        Ok(conversation)
    }

    /// Bumps updated_at after a turn lands.
    pub async fn touch(pool: &PgPool, conversation_id: Uuid) -> Result<()> {
        query(
            r#"
            UPDATE conversations
            SET updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Soft delete. Message cleanup cascades at the storage layer.
    pub async fn delete(pool: &PgPool, conversation_id: Uuid, user_id: &str) -> Result<()> {
        query(
            r#"
            UPDATE conversations
            SET deleted_at = $1
            WHERE id = $2 AND user_id = $3
            "#,
        )
        .bind(Utc::now())
        .bind(conversation_id)
        .bind(user_id)
        .execute(pool)
        .await?;

        debug!("Conversation soft-deleted: {}", conversation_id);
        Ok(())
    }
}
