//! Storage boundary consumed by the core.
//!
//! The engine never owns a persistence format; it talks to storage through
//! these narrow traits and ships a no-op implementation for hosts and tests
//! that do not persist anything.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Root handle to a job storage backend.
pub trait JobStorage: Send + Sync {
    /// Opens a connection scoped to one unit of work.
    fn connect(&self) -> Result<Arc<dyn StorageConnection>>;
}

/// Connection-scoped operations the core consumes.
pub trait StorageConnection: Send + Sync {
    /// Records a server instance and the processes it hosts.
    fn announce_server(&self, server_id: &str, announcement: &ServerAnnouncement) -> Result<()>;

    /// Refreshes the liveness timestamp of a server instance.
    fn heartbeat(&self, server_id: &str) -> Result<()>;

    /// Removes a server instance record.
    fn remove_server(&self, server_id: &str) -> Result<()>;
}

/// Metadata recorded when a server announces itself.
#[derive(Debug, Clone, Serialize)]
pub struct ServerAnnouncement {
    pub process_count: usize,
    pub started_at: DateTime<Utc>,
    pub properties: HashMap<String, JsonValue>,
}

/// Storage that accepts everything and records nothing.
#[derive(Debug, Clone, Default)]
pub struct NoopStorage;

impl JobStorage for NoopStorage {
    fn connect(&self) -> Result<Arc<dyn StorageConnection>> {
        Ok(Arc::new(NoopConnection))
    }
}

struct NoopConnection;

impl StorageConnection for NoopConnection {
    fn announce_server(&self, _server_id: &str, _announcement: &ServerAnnouncement) -> Result<()> {
        Ok(())
    }

    fn heartbeat(&self, _server_id: &str) -> Result<()> {
        Ok(())
    }

    fn remove_server(&self, _server_id: &str) -> Result<()> {
        Ok(())
    }
}
