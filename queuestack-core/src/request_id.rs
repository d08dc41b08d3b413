//! Request ID generation

use uuid::Uuid;

/// Per-call request identifier, attached to tracing spans and error reports
#[derive(Debug, Clone)]
pub struct RequestId {
    pub id: String,
}

impl RequestId {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
