use crate::store::{AdmissionStore, RelayChannel};
use anyhow::bail;
use dashmap::DashMap;
use roomcall_protocol::RoomDocument;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::instrument;

/// In-process room store, usable as both admission store and relay.
///
/// Each room is kept in a watch channel so subscribers always see the latest document. Every
/// applied write bumps a global revision, which tests use to assert that nothing was written.
#[derive(Debug)]
pub struct MemoryStore {
    rooms: DashMap<String, watch::Sender<Option<RoomDocument>>>,
    revision: AtomicU64,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            rooms: DashMap::new(),
            revision: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of writes applied so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Current content of a room document.
    pub fn document(&self, room_id: &str) -> Option<RoomDocument> {
        self.rooms
            .get(room_id)
            .and_then(|room| room.borrow().clone())
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("Memory store is unavailable");
        }
        Ok(())
    }

    fn applied(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn modify(
        &self,
        room_id: &str,
        modify: impl FnOnce(&mut Option<RoomDocument>) -> bool,
    ) -> bool {
        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        let modified = room.send_if_modified(modify);
        if modified {
            self.applied();
        }
        modified
    }
}

#[async_trait::async_trait]
impl AdmissionStore for MemoryStore {
    #[instrument(level = "trace", skip(self), err)]
    async fn get(&self, room_id: &str) -> anyhow::Result<Option<RoomDocument>> {
        self.ensure_available()?;
        Ok(self.document(room_id))
    }

    #[instrument(level = "trace", skip(self, doc), err)]
    async fn create(&self, room_id: &str, doc: RoomDocument) -> anyhow::Result<bool> {
        self.ensure_available()?;
        let created = self.modify(room_id, |current| {
            if current.is_some() {
                return false;
            }
            *current = Some(doc);
            true
        });
        tracing::trace!(?created, "Create room document");
        Ok(created)
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn update(
        &self,
        room_id: &str,
        field: &str,
        expected: &Value,
        value: Value,
    ) -> anyhow::Result<bool> {
        self.ensure_available()?;
        let updated = self.modify(room_id, |current| {
            let Some(doc) = current else {
                return false;
            };
            if doc.get(field).unwrap_or(&Value::Null) != expected {
                return false;
            }
            doc.insert(field.to_string(), value);
            true
        });
        tracing::trace!(?updated, "Conditional room document update");
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl RelayChannel for MemoryStore {
    #[instrument(level = "trace", skip(self, patch), err)]
    async fn publish(&self, room_id: &str, patch: RoomDocument) -> anyhow::Result<()> {
        self.ensure_available()?;
        self.modify(room_id, |current| {
            let doc = current.get_or_insert_with(RoomDocument::new);
            doc.extend(patch);
            true
        });
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn subscribe(
        &self,
        room_id: &str,
    ) -> anyhow::Result<watch::Receiver<Option<RoomDocument>>> {
        self.ensure_available()?;
        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        Ok(room.subscribe())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn delete(&self, room_id: &str) -> anyhow::Result<()> {
        self.ensure_available()?;
        self.modify(room_id, |current| current.take().is_some());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_log::test;

    fn doc(value: Value) -> RoomDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test(tokio::test)]
    async fn create_if_absent() {
        let store = MemoryStore::new();
        assert!(
            store
                .create("room", doc(json!({"participantCount": 1})))
                .await
                .unwrap()
        );
        assert!(
            !store
                .create("room", doc(json!({"participantCount": 5})))
                .await
                .unwrap()
        );
        assert_eq!(
            store.get("room").await.unwrap(),
            Some(doc(json!({"participantCount": 1})))
        );
        assert_eq!(store.revision(), 1);
    }

    #[test(tokio::test)]
    async fn update_compares_expected_value() {
        let store = MemoryStore::new();
        assert!(
            !store
                .update("room", "participantCount", &Value::Null, json!(1))
                .await
                .unwrap()
        );

        store.publish("room", doc(json!({"sdpOffer": "v=0"}))).await.unwrap();
        assert!(
            store
                .update("room", "participantCount", &Value::Null, json!(1))
                .await
                .unwrap()
        );
        assert!(
            !store
                .update("room", "participantCount", &json!(0), json!(2))
                .await
                .unwrap()
        );
        assert!(
            store
                .update("room", "participantCount", &json!(1), json!(2))
                .await
                .unwrap()
        );
        assert_eq!(
            store.document("room"),
            Some(doc(json!({"sdpOffer": "v=0", "participantCount": 2})))
        );
    }

    #[test(tokio::test)]
    async fn publish_merges_and_notifies() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("room").await.unwrap();
        assert_eq!(*rx.borrow_and_update(), None);

        store
            .publish("room", doc(json!({"type": "offer", "sdpOffer": "v=0"})))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        store
            .publish("room", doc(json!({"sdpOffer": null, "iceOffer": []})))
            .await
            .unwrap();
        rx.changed().await.unwrap();

        assert_eq!(
            *rx.borrow_and_update(),
            Some(doc(json!({"type": "offer", "sdpOffer": null, "iceOffer": []})))
        );

        store.delete("room").await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[test(tokio::test)]
    async fn unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.get("room").await.is_err());
        assert!(store.publish("room", RoomDocument::new()).await.is_err());
        assert!(store.subscribe("room").await.is_err());

        store.set_available(true);
        assert_eq!(store.get("room").await.unwrap(), None);
        assert_eq!(store.revision(), 0);
    }
}
