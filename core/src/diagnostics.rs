//! Health checks used by the status page, `cookbook status` and `/api/health`.

use serde::Serialize;
use uuid::Uuid;

use crate::db::Database;
use crate::models::NewRecipe;

/// Title prefix of the throwaway row written by [`Database::self_test`].
pub const SELF_TEST_TITLE: &str = "__db_self_test__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub engine: String,
    /// `SQLite` path or masked Postgres DSN.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfTestReport {
    pub ok: bool,
    pub id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub backend: BackendInfo,
    pub ping: bool,
    pub count: Option<i64>,
    pub count_error: Option<String>,
}

impl Database {
    #[must_use]
    pub fn backend_info(&self) -> BackendInfo {
        BackendInfo {
            engine: self.engine().to_string(),
            location: self.location(),
        }
    }

    /// `SELECT 1` against the backend. Never errors.
    #[must_use]
    pub fn ping(&self) -> bool {
        match self.select_one() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "ping failed");
                false
            }
        }
    }

    /// Insert, read back and delete a marker recipe.
    ///
    /// The marker is removed whenever the insert went through, even if reading
    /// it back failed. `ok` requires both the read and the cleanup to succeed.
    #[must_use]
    pub fn self_test(&self) -> SelfTestReport {
        let marker = NewRecipe {
            ingredients: Some(String::new()),
            instructions: Some(String::new()),
            servings: Some(1),
            ..NewRecipe::titled(format!("{SELF_TEST_TITLE}{}", Uuid::new_v4().simple()))
        };
        let id = match self.add(&marker) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "self-test insert failed");
                return SelfTestReport {
                    ok: false,
                    id: None,
                    error: Some(format!("insert failed: {e}")),
                };
            }
        };

        let mut errors = Vec::new();
        let read_ok = match self.get(id) {
            Ok(Some(recipe)) if recipe.id == id => true,
            Ok(_) => {
                errors.push(format!("row {id} could not be read back"));
                false
            }
            Err(e) => {
                errors.push(format!("read failed: {e}"));
                false
            }
        };
        let cleanup_ok = match self.delete(id) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id, error = %e, "self-test cleanup failed");
                errors.push(format!("cleanup failed: {e}"));
                false
            }
        };

        let ok = read_ok && cleanup_ok;
        if !ok {
            tracing::warn!(id, errors = ?errors, "self-test failed");
        }
        SelfTestReport {
            ok,
            id: Some(id),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusReport {
        let (count, count_error) = match self.count() {
            Ok(n) => (Some(n), None),
            Err(e) => (None, Some(e.to_string())),
        };
        StatusReport {
            backend: self.backend_info(),
            ping: self.ping(),
            count,
            count_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ping());
    }

    #[test]
    fn test_backend_info() {
        let db = Database::open_in_memory().unwrap();
        let info = db.backend_info();
        assert_eq!(info.engine, "sqlite");
        assert_eq!(info.location, ":memory:");
    }

    #[test]
    fn test_self_test_leaves_no_trace() {
        let db = Database::open_in_memory().unwrap();
        db.add(&NewRecipe::titled("Pancakes")).unwrap();

        let report = db.self_test();
        assert!(report.ok, "{report:?}");
        assert!(report.id.is_some());
        assert!(report.error.is_none());
        assert_eq!(db.count().unwrap(), 1);
        assert!(
            db.list(Some(SELF_TEST_TITLE), None)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_status() {
        let db = Database::open_in_memory().unwrap();
        db.add(&NewRecipe::titled("Soup")).unwrap();
        let status = db.status();
        assert!(status.ping);
        assert_eq!(status.count, Some(1));
        assert_eq!(status.count_error, None);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["backend"]["engine"], "sqlite");
    }
}
