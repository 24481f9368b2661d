//! Monotonic timestamps and unique identifiers shared by the registry and
//! coordinator. Kept separate so neither owns id/time policy.
use uuid::Uuid;

pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// 128-bit random task identifier.
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// Opaque token handed to the registry in place of a live socket handle.
pub fn new_channel_token() -> String {
    Uuid::new_v4().to_string()
}
