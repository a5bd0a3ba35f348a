use sqlx::PgPool;
use uuid::Uuid;

use crate::llm_client::ChatMessage;
use crate::models::chat::ChatMessageRow;

/// Prior turns replayed into each completion.
pub const HISTORY_LIMIT: i64 = 10;

/// Identifies one conversation in `chat_histories`.
#[derive(Debug, Clone)]
pub struct ChatScope {
    pub chat_id: String,
    pub document_id: Option<Uuid>,
    pub broker_id: Option<Uuid>,
    pub client_session_id: Option<Uuid>,
}

impl ChatScope {
    /// A broker's own conversation, keyed by the client-supplied chat id.
    pub fn broker(chat_id: &str, broker_id: Uuid, document_id: Option<Uuid>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            document_id,
            broker_id: Some(broker_id),
            client_session_id: None,
        }
    }

    /// A client's conversation through a public link. Anonymous clients share
    /// the link-level chat id and get no history replay.
    pub fn public(link_id: Uuid, owner_id: Uuid, document_id: Uuid, session_id: Option<Uuid>) -> Self {
        let chat_id = match session_id {
            Some(session_id) => format!("session:{session_id}"),
            None => format!("link:{link_id}"),
        };
        Self {
            chat_id,
            document_id: Some(document_id),
            broker_id: Some(owner_id),
            client_session_id: session_id,
        }
    }
}

/// The last `limit` messages of the conversation, oldest first.
pub async fn load_recent(
    pool: &PgPool,
    scope: &ChatScope,
    limit: i64,
) -> Result<Vec<ChatMessage>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ChatMessageRow>(
        r#"
        SELECT * FROM (
            SELECT *
            FROM chat_histories
            WHERE chat_id = $1
              AND broker_id IS NOT DISTINCT FROM $2
              AND client_session_id IS NOT DISTINCT FROM $3
            ORDER BY created_at DESC, id DESC
            LIMIT $4
        ) recent
        ORDER BY created_at, id
        "#,
    )
    .bind(&scope.chat_id)
    .bind(scope.broker_id)
    .bind(scope.client_session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(to_message).collect())
}

fn to_message(row: ChatMessageRow) -> ChatMessage {
    match row.role.as_str() {
        "assistant" => ChatMessage::assistant(row.content),
        _ => ChatMessage::user(row.content),
    }
}

/// Stores the user question and the assistant answer as two rows.
pub async fn save_exchange(
    pool: &PgPool,
    scope: &ChatScope,
    user: &str,
    assistant: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO chat_histories (document_id, broker_id, client_session_id, chat_id, role, content)
        VALUES ($1, $2, $3, $4, 'user', $5),
               ($1, $2, $3, $4, 'assistant', $6)
        "#,
    )
    .bind(scope.document_id)
    .bind(scope.broker_id)
    .bind(scope.client_session_id)
    .bind(&scope.chat_id)
    .bind(user)
    .bind(assistant)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_scope_keys() {
        let link = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let session = Uuid::new_v4();

        let anonymous = ChatScope::public(link, owner, doc, None);
        assert_eq!(anonymous.chat_id, format!("link:{link}"));
        assert_eq!(anonymous.client_session_id, None);

        let identified = ChatScope::public(link, owner, doc, Some(session));
        assert_eq!(identified.chat_id, format!("session:{session}"));
        assert_eq!(identified.broker_id, Some(owner));
    }

    #[test]
    fn test_rows_map_to_roles() {
        let row = ChatMessageRow {
            id: 1,
            document_id: None,
            broker_id: None,
            client_session_id: None,
            chat_id: "c".to_string(),
            role: "assistant".to_string(),
            content: "The cap rate is 6.5%.".to_string(),
            created_at: chrono::Utc::now(),
        };
        assert_eq!(to_message(row), ChatMessage::assistant("The cap rate is 6.5%."));
    }
}
