//! Who is allowed to record expenses, and under which name.
//!
//! Users come from two places: the static `users` map in the config file and
//! the `registered_users` SQLite table filled by `/register`. Static entries
//! win on conflict.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::info;

const MAX_NAME_CHARS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub chat_id: i64,
    pub display_name: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistrationError {
    #[error("you are already registered as {}", .0.display_name)]
    AlreadyRegistered(User),
    #[error("the name '{0}' is already taken")]
    NameTaken(String),
    #[error("names must be 1-32 characters and not start with '/'")]
    InvalidName,
    #[error("registration is closed, ask the admin to add you")]
    Closed,
    #[error("user storage failed: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for RegistrationError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub struct UserRegistry {
    fixed: HashMap<i64, String>,
    registration_open: bool,
    conn: Mutex<Connection>,
}

impl UserRegistry {
    /// Registry whose dynamic users live only in memory.
    pub fn in_memory(fixed: HashMap<i64, String>, registration_open: bool) -> Result<Self, RegistrationError> {
        Self::with_connection(Connection::open_in_memory()?, fixed, registration_open)
    }

    /// Registry persisted at `path` (created if missing).
    pub fn open(path: &Path, fixed: HashMap<i64, String>, registration_open: bool) -> Result<Self, RegistrationError> {
        let registry = Self::with_connection(Connection::open(path)?, fixed, registration_open)?;
        info!(
            "👥 Loaded user registry from {:?} ({} configured, {} registered)",
            path,
            registry.fixed.len(),
            registry.registered_count()
        );
        Ok(registry)
    }

    fn with_connection(
        conn: Connection,
        fixed: HashMap<i64, String>,
        registration_open: bool,
    ) -> Result<Self, RegistrationError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS registered_users (
                chat_id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );
            "#,
        )?;
        let fixed = fixed
            .into_iter()
            .map(|(id, name)| (id, name.trim().to_string()))
            .collect();
        Ok(Self {
            fixed,
            registration_open,
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registration_open(&self) -> bool {
        self.registration_open
    }

    pub fn lookup(&self, chat_id: i64) -> Option<User> {
        if let Some(name) = self.fixed.get(&chat_id) {
            return Some(User {
                chat_id,
                display_name: name.clone(),
            });
        }
        let name: Option<String> = self
            .conn()
            .query_row(
                "SELECT display_name FROM registered_users WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::warn!("User lookup failed for {chat_id}: {e}");
                None
            });
        name.map(|display_name| User { chat_id, display_name })
    }

    pub fn register(&self, chat_id: i64, name: &str) -> Result<User, RegistrationError> {
        if let Some(existing) = self.lookup(chat_id) {
            return Err(RegistrationError::AlreadyRegistered(existing));
        }
        if !self.registration_open {
            return Err(RegistrationError::Closed);
        }

        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_CHARS || name.starts_with('/') {
            return Err(RegistrationError::InvalidName);
        }
        if self.name_taken(name)? {
            return Err(RegistrationError::NameTaken(name.to_string()));
        }

        self.conn().execute(
            "INSERT INTO registered_users (chat_id, display_name, registered_at) VALUES (?1, ?2, ?3)",
            params![chat_id, name, Utc::now().to_rfc3339()],
        )?;
        info!("👤 Registered {} as '{}'", chat_id, name);
        Ok(User {
            chat_id,
            display_name: name.to_string(),
        })
    }

    fn name_taken(&self, name: &str) -> Result<bool, RegistrationError> {
        let lowered = name.to_lowercase();
        if self.fixed.values().any(|n| n.to_lowercase() == lowered) {
            return Ok(true);
        }
        Ok(self.registered_names()?.iter().any(|n| n.to_lowercase() == lowered))
    }

    fn registered_names(&self) -> Result<Vec<String>, RegistrationError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT display_name FROM registered_users")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn registered_count(&self) -> usize {
        self.conn()
            .query_row("SELECT COUNT(*) FROM registered_users", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn family() -> HashMap<i64, String> {
        HashMap::from([(1, "Lisa".to_string()), (2, "Bart".to_string())])
    }

    #[test]
    fn test_static_users_resolve() {
        let registry = UserRegistry::in_memory(family(), false).unwrap();
        assert_eq!(registry.lookup(1).unwrap().display_name, "Lisa");
        assert!(registry.lookup(3).is_none());
    }

    #[test]
    fn test_register_when_closed() {
        let registry = UserRegistry::in_memory(family(), false).unwrap();
        assert_eq!(registry.register(3, "Maggie"), Err(RegistrationError::Closed));
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = UserRegistry::in_memory(family(), true).unwrap();
        let user = registry.register(3, "  Maggie ").unwrap();
        assert_eq!(user.display_name, "Maggie");
        assert_eq!(registry.lookup(3), Some(user));
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let registry = UserRegistry::in_memory(family(), true).unwrap();
        registry.register(3, "Maggie").unwrap();
        assert!(matches!(
            registry.register(3, "Marge"),
            Err(RegistrationError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            registry.register(1, "Someone"),
            Err(RegistrationError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_names_are_unique_ignoring_case() {
        let registry = UserRegistry::in_memory(family(), true).unwrap();
        assert_eq!(
            registry.register(3, "lisa"),
            Err(RegistrationError::NameTaken("lisa".into()))
        );
        registry.register(3, "Maggie").unwrap();
        assert!(matches!(registry.register(4, "MAGGIE"), Err(RegistrationError::NameTaken(_))));
    }

    #[test]
    fn test_invalid_names() {
        let registry = UserRegistry::in_memory(family(), true).unwrap();
        assert_eq!(registry.register(3, "   "), Err(RegistrationError::InvalidName));
        assert_eq!(registry.register(3, "/start"), Err(RegistrationError::InvalidName));
        assert_eq!(registry.register(3, &"x".repeat(33)), Err(RegistrationError::InvalidName));
    }

    #[test]
    fn test_registrations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.db");
        {
            let registry = UserRegistry::open(&path, family(), true).unwrap();
            registry.register(3, "Maggie").unwrap();
        }
        let reopened = UserRegistry::open(&path, family(), false).unwrap();
        assert_eq!(reopened.lookup(3).unwrap().display_name, "Maggie");
    }
}
