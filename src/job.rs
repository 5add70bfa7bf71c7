//! Job model: a serialized description of a method call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A method call to be executed later.
///
/// Arguments are kept in their serialized form; resolving them against the
/// target method is the performer's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Type that owns the target method.
    pub type_name: String,
    /// Name of the method to invoke.
    pub method: String,
    /// Serialized arguments, in declaration order.
    pub arguments: Vec<JsonValue>,
}

impl Job {
    pub fn new(
        type_name: impl Into<String>,
        method: impl Into<String>,
        arguments: Vec<JsonValue>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            arguments,
        }
    }
}

/// A job together with its storage identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    /// Identifier assigned by storage.
    pub id: String,
    /// The call to perform.
    pub job: Job,
    /// When the job record was created.
    pub created_at: DateTime<Utc>,
}

impl BackgroundJob {
    pub fn new(id: impl Into<String>, job: Job) -> Self {
        Self {
            id: id.into(),
            job,
            created_at: Utc::now(),
        }
    }
}
