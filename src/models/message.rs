use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{query, query_as, FromRow, PgPool, Type};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, Type)]
#[sqlx(type_name = "role_enum", rename_all = "lowercase")] // SQL value name
#[serde(rename_all = "lowercase")] // JSON value name
pub enum Role {
    Assistant,
    System,
    User,
}

#[derive(Debug, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: String,
    pub content: String,
    pub role: Role,
    /// Retrieval sources attached to assistant messages, stored as JSON.
    pub sources: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            user_id: String::new(),
            content: String::new(),
            role: Role::User,
            sources: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Message {
    pub async fn new(
        pool: &PgPool,
        conversation_id: Uuid,
        user_id: &str,
        content: &str,
        role: Role,
        sources: Option<Value>,
    ) -> Result<Self> {
        let message = Message {
            conversation_id,
            user_id: user_id.to_string(),
            content: content.to_string(),
            role,
            sources,
            ..Default::default()
        };

        query(
            r#"
            INSERT INTO messages (id, conversation_id, user_id, content, role, sources, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.user_id)
        .bind(&message.content)
        .bind(message.role.clone())
        .bind(&message.sources)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(pool)
        .await?;

        Ok(message)
    }

    pub async fn list_for_conversation(
        pool: &PgPool,
        conversation_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<Self>> {
        let messages = query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND user_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    /// Oldest user message text, used to seed conversation auto-renaming.
    pub async fn first_user_text(
        pool: &PgPool,
        conversation_id: Uuid,
        user_id: &str,
    ) -> Result<Option<String>> {
        let text: Option<String> = sqlx::query_scalar(
            r#"
            SELECT content FROM messages
            WHERE conversation_id = $1 AND user_id = $2 AND role = 'user'
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(text)
    }
}
