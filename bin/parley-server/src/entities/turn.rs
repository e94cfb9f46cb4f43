use crate::entities::{ConversationTurn, NewTurn, SqliteStore};
use chrono::{DateTime, Utc};
use std::future::Future;

type TurnRow = (i64, String, String, String, String, String);

pub trait TurnStore: Send + Sync + 'static {
    /// Write one turn and return it with its assigned id and timestamps.
    fn append(
        &self,
        turn: NewTurn,
    ) -> impl Future<Output = Result<ConversationTurn, sqlx::Error>> + Send;

    /// Up to `limit` turns of the session, newest first.
    fn load_recent(
        &self,
        session_id: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<ConversationTurn>, sqlx::Error>> + Send;

    /// Every turn of the session, oldest first.
    fn load_all(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<ConversationTurn>, sqlx::Error>> + Send;
}

impl TurnStore for SqliteStore {
    async fn append(&self, turn: NewTurn) -> Result<ConversationTurn, sqlx::Error> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO chat_turns (session_id, role, content, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&turn.session_id)
        .bind(turn.role.to_string())
        .bind(&turn.content)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;
        Ok(ConversationTurn {
            id: result.last_insert_rowid(),
            session_id: turn.session_id,
            role: turn.role.to_string(),
            content: turn.content,
            created_at: now,
            updated_at: now,
        })
    }

    async fn load_recent(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ConversationTurn>, sqlx::Error> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            "SELECT id, session_id, role, content, created_at, updated_at \
             FROM chat_turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn load_all(&self, session_id: &str) -> Result<Vec<ConversationTurn>, sqlx::Error> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            "SELECT id, session_id, role, content, created_at, updated_at \
             FROM chat_turns WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }
}

fn from_row((id, session_id, role, content, created_at, updated_at): TurnRow) -> ConversationTurn {
    ConversationTurn {
        id,
        session_id,
        role,
        content,
        created_at: parse_timestamp(&created_at, "created_at"),
        updated_at: parse_timestamp(&updated_at, "updated_at"),
    }
}

fn parse_timestamp(raw: &str, column: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, column, error = %e, "failed to parse turn timestamp; using now");
        Utc::now()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::Role;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.expect("in-memory sqlite")
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let store = store().await;
        let a = store.append(NewTurn::user("s1", "hello")).await.unwrap();
        let b = store.append(NewTurn::assistant("s1", "hi there")).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.role, "user");
        assert_eq!(b.role, "assistant");
        assert_eq!(a.created_at, a.updated_at);
    }

    #[tokio::test]
    async fn load_recent_is_newest_first_and_bounded() {
        let store = store().await;
        for i in 0..12 {
            store.append(NewTurn::user("s1", format!("m{i}"))).await.unwrap();
        }
        let recent = store.load_recent("s1", 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "m11");
        assert_eq!(recent[9].content, "m2");

        let chronological: Vec<_> = recent.into_iter().rev().collect();
        assert!(chronological.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(chronological.last().map(|t| t.content.as_str()), Some("m11"));
    }

    #[tokio::test]
    async fn load_all_is_oldest_first_and_scoped_to_session() {
        let store = store().await;
        store.append(NewTurn::user("s1", "first")).await.unwrap();
        store.append(NewTurn::user("other", "noise")).await.unwrap();
        store.append(NewTurn::assistant("s1", "second")).await.unwrap();

        let all = store.load_all("s1").await.unwrap();
        let contents: Vec<_> = all.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);
        assert!(all.iter().all(|t| t.session_id == "s1"));
    }

    #[tokio::test]
    async fn unknown_session_yields_empty_sequences() {
        let store = store().await;
        assert!(store.load_recent("missing", 10).await.unwrap().is_empty());
        assert!(store.load_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_content_violates_constraint() {
        let store = store().await;
        let err = store
            .append(NewTurn { session_id: "s1".into(), role: Role::User, content: String::new() })
            .await;
        assert!(err.is_err());
        assert!(store.load_all("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_pool_reports_persistence_failure() {
        let store = store().await;
        store.close().await;
        assert!(store.append(NewTurn::user("s1", "hello")).await.is_err());
    }
}
