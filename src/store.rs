use crate::entity::{AuthTokens, Credentials, Employee};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

/// Persists the logged-in employee's credentials between runs.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// A private in-memory database. One connection, kept open, so every
    /// query sees the same database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                employee TEXT,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Save or replace the stored credentials.
    pub async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        let employee = credentials
            .employee
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode employee")?;

        sqlx::query(
            r#"
            INSERT INTO credentials (id, access_token, refresh_token, employee, updated_at)
            VALUES (1, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                employee = COALESCE(excluded.employee, credentials.employee),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credentials.tokens.access_token)
        .bind(&credentials.tokens.refresh_token)
        .bind(employee)
        .execute(&self.pool)
        .await
        .context("Failed to save credentials")?;

        Ok(())
    }

    pub async fn load_credentials(&self) -> Result<Option<Credentials>> {
        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, employee
            FROM credentials
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load credentials")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let employee: Option<String> = row.try_get("employee")?;
        let employee = employee
            .map(|json| serde_json::from_str::<Employee>(&json))
            .transpose()
            .context("Stored employee record is corrupt")?;

        Ok(Some(Credentials {
            tokens: AuthTokens {
                access_token: row.try_get("access_token")?,
                refresh_token: row.try_get("refresh_token")?,
            },
            employee,
        }))
    }

    pub async fn clear_credentials(&self) -> Result<()> {
        sqlx::query("DELETE FROM credentials")
            .execute(&self.pool)
            .await
            .context("Failed to clear credentials")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        store
    }

    fn credentials(access: &str, employee: Option<Employee>) -> Credentials {
        Credentials {
            tokens: AuthTokens {
                access_token: access.into(),
                refresh_token: Some("refresh".into()),
            },
            employee,
        }
    }

    #[tokio::test]
    async fn empty_store_has_no_credentials() {
        assert_eq!(store().await.load_credentials().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_load_and_clear() {
        let store = store().await;
        let ada = Employee {
            id: "7".into(),
            name: "Ada".into(),
            email: "ada@corp.io".into(),
        };

        store
            .save_credentials(&credentials("first", Some(ada.clone())))
            .await
            .unwrap();
        // A refresh carries no employee and must not erase it.
        store
            .save_credentials(&credentials("second", None))
            .await
            .unwrap();

        let loaded = store.load_credentials().await.unwrap().unwrap();
        assert_eq!(loaded.tokens.access_token, "second");
        assert_eq!(loaded.tokens.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(loaded.employee, Some(ada));

        store.clear_credentials().await.unwrap();
        assert_eq!(store.load_credentials().await.unwrap(), None);
    }
}
