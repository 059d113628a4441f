use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{query_as, FromRow, PgPool};
use uuid::Uuid;

/// One entry in the advising corpus (course description, degree requirement,
/// policy page). Candidates for the ranking fallback.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub content: String,
    pub department: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Document {
    fn default() -> Self {
        Document {
            id: Uuid::new_v4(),
            code: String::new(),
            title: String::new(),
            content: String::new(),
            department: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Document {
    /// Text body the keyword scorer matches against.
    pub fn searchable_text(&self) -> String {
        format!("{} {} {}", self.code, self.title, self.content)
    }

    /// Retrieval candidates, narrowed by department when one is known.
    pub async fn list_candidates(
        pool: &PgPool,
        department: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Self>> {
        let documents = match department {
            Some(department) => {
                query_as::<_, Document>(
                    r#"
                    SELECT * FROM documents
                    WHERE department = $1
                    ORDER BY code ASC
                    LIMIT $2
                    "#,
                )
                .bind(department)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                query_as::<_, Document>(
                    r#"
                    SELECT * FROM documents
                    ORDER BY code ASC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(documents)
    }
}
