use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use valet_agent::history::HistoryStore;
use valet_core::error::{Result, ValetError};
use valet_core::types::{Credential, Message};
use valet_google::CredentialStore;

fn map_err(e: libsql::Error) -> ValetError {
    ValetError::Storage(e.to_string())
}

/// Durable libsql store backing both message history and credentials.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) a local libsql database at the given file path.
    pub async fn new(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(map_err)?;
        let store = Self { db };
        store.init_tables().await?;
        Ok(store)
    }

    /// Get a fresh database connection.
    fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(map_err)
    }

    async fn init_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(map_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS messages_user_idx ON messages(user_id, created_at)",
            (),
        )
        .await
        .map_err(map_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expiry INTEGER NOT NULL,
                scopes TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            )",
            (),
        )
        .await
        .map_err(map_err)?;

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for Store {
    async fn append(&self, message: &Message) -> Result<String> {
        self.conn()?
            .execute(
                "INSERT INTO messages (id, user_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    message.id.clone(),
                    message.user_id.clone(),
                    message.role.clone(),
                    message.content.clone(),
                    message.created_at
                ],
            )
            .await
            .map_err(map_err)?;
        Ok(message.id.clone())
    }

    /// The most recent messages for a user, returned in chronological order.
    /// Ties on created_at break on insertion order.
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT id, user_id, role, content, created_at FROM messages \
                 WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
                libsql::params![user_id.to_string(), limit as i32],
            )
            .await
            .map_err(map_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_err)? {
            messages.push(Message {
                id: row.get::<String>(0).map_err(map_err)?,
                user_id: row.get::<String>(1).map_err(map_err)?,
                role: row.get::<String>(2).map_err(map_err)?,
                content: row.get::<String>(3).map_err(map_err)?,
                created_at: row.get::<i64>(4).map_err(map_err)?,
            });
        }
        messages.reverse();
        Ok(messages)
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM messages WHERE user_id = ?",
                libsql::params![user_id.to_string()],
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Store {
    async fn load(&self, user_id: &str) -> Result<Option<Credential>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT user_id, access_token, refresh_token, expiry, scopes, revoked \
                 FROM credentials WHERE user_id = ?",
                libsql::params![user_id.to_string()],
            )
            .await
            .map_err(map_err)?;

        if let Some(row) = rows.next().await.map_err(map_err)? {
            let scopes_json = row.get::<String>(4).map_err(map_err)?;
            let scopes: Vec<String> = serde_json::from_str(&scopes_json)
                .map_err(|e| ValetError::Storage(format!("bad scopes column: {e}")))?;
            Ok(Some(Credential {
                user_id: row.get::<String>(0).map_err(map_err)?,
                access_token: row.get::<String>(1).map_err(map_err)?,
                refresh_token: row.get::<String>(2).map_err(map_err)?,
                expiry: row.get::<i64>(3).map_err(map_err)?,
                scopes,
                revoked: row.get::<i64>(5).map_err(map_err)? != 0,
            }))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        let scopes_json = serde_json::to_string(&credential.scopes)
            .map_err(|e| ValetError::Storage(e.to_string()))?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO credentials \
                 (user_id, access_token, refresh_token, expiry, scopes, revoked) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    credential.user_id.clone(),
                    credential.access_token.clone(),
                    credential.refresh_token.clone(),
                    credential.expiry,
                    scopes_json,
                    credential.revoked as i64
                ],
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valet_core::types::{new_id, now_unix};

    // Each libsql connection to a local `:memory:` database is an independent
    // empty database, so the per-call `conn()` pattern requires a file-backed
    // database; use a unique temp file per test.
    async fn mem_store() -> Store {
        let path = std::env::temp_dir().join(format!("valet-test-{}.db", new_id()));
        Store::new(path.to_str().unwrap()).await.unwrap()
    }

    fn msg(user_id: &str, role: &str, content: &str, created_at: i64) -> Message {
        Message {
            id: new_id(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_recent_is_bounded_and_chronological() {
        let store = mem_store().await;
        let t = now_unix();
        for i in 0..5 {
            store
                .append(&msg("u1", "user", &format!("m{i}"), t + i))
                .await
                .unwrap();
        }
        store.append(&msg("u2", "user", "other", t)).await.unwrap();

        let recent = store.recent("u1", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_recent_scoped_per_user() {
        let store = mem_store().await;
        let t = now_unix();
        store.append(&msg("u1", "user", "mine", t)).await.unwrap();
        store.append(&msg("u2", "user", "theirs", t)).await.unwrap();

        let recent = store.recent("u1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "mine");
    }

    #[tokio::test]
    async fn test_same_second_messages_keep_insertion_order() {
        let store = mem_store().await;
        let t = now_unix();
        store.append(&msg("u1", "user", "question", t)).await.unwrap();
        store.append(&msg("u1", "assistant", "answer", t)).await.unwrap();

        let recent = store.recent("u1", 10).await.unwrap();
        let roles: Vec<&str> = recent.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }

    #[tokio::test]
    async fn test_clear_removes_only_that_user() {
        let store = mem_store().await;
        let t = now_unix();
        store.append(&msg("u1", "user", "a", t)).await.unwrap();
        store.append(&msg("u2", "user", "b", t)).await.unwrap();

        store.clear("u1").await.unwrap();
        assert!(store.recent("u1", 10).await.unwrap().is_empty());
        assert_eq!(store.recent("u2", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credential_roundtrip_and_overwrite() {
        let store = mem_store().await;
        assert!(store.load("u1").await.unwrap().is_none());

        let cred = Credential {
            user_id: "u1".into(),
            access_token: "at1".into(),
            refresh_token: "rt1".into(),
            expiry: 12345,
            scopes: vec!["gmail".into(), "calendar".into()],
            revoked: false,
        };
        store.save(&cred).await.unwrap();

        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at1");
        assert_eq!(loaded.scopes, vec!["gmail", "calendar"]);
        assert!(!loaded.revoked);

        // Reconnect overwrites in place.
        let cred2 = Credential {
            access_token: "at2".into(),
            refresh_token: "rt2".into(),
            revoked: true,
            ..cred
        };
        store.save(&cred2).await.unwrap();
        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at2");
        assert!(loaded.revoked);
    }
}
