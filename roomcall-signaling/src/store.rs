pub mod memory;

use roomcall_protocol::RoomDocument;
use serde_json::Value;
use tokio::sync::watch;

/// Atomic access to the admission part of room documents.
#[async_trait::async_trait]
pub trait AdmissionStore: Send + Sync + 'static {
    async fn get(&self, room_id: &str) -> anyhow::Result<Option<RoomDocument>>;

    /// Creates the room document unless it already exists. Returns whether it was created.
    async fn create(&self, room_id: &str, doc: RoomDocument) -> anyhow::Result<bool>;

    /// Sets `field` to `value` if it currently holds `expected` (`Null` for a missing field).
    /// Returns whether the write was applied; a missing document never matches.
    async fn update(
        &self,
        room_id: &str,
        field: &str,
        expected: &Value,
        value: Value,
    ) -> anyhow::Result<bool>;
}

/// The document relay both participants of a room exchange signaling messages through.
#[async_trait::async_trait]
pub trait RelayChannel: Send + Sync + 'static {
    /// Merges `patch` into the room document field by field, creating the document if needed.
    async fn publish(&self, room_id: &str, patch: RoomDocument) -> anyhow::Result<()>;

    /// Watches the room document. The receiver holds the latest full document, or `None` while
    /// the document does not exist. Intermediate states may be skipped.
    async fn subscribe(
        &self,
        room_id: &str,
    ) -> anyhow::Result<watch::Receiver<Option<RoomDocument>>>;

    async fn delete(&self, room_id: &str) -> anyhow::Result<()>;
}
