use crate::codec;
use crate::config::{AdmissionConfig, ROOM_CAPACITY};
use crate::error::AdmissionError;
use crate::store::AdmissionStore;
use anyhow::anyhow;
use roomcall_protocol::{AdmissionFields, PARTICIPANT_COUNT, Role, SignalingMessage};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub role: Role,
    /// Whether the room document existed before this participant joined.
    pub room_existed: bool,
    /// Participant count after admission.
    pub participant_count: u32,
}

/// Admits participants into rooms of at most [`ROOM_CAPACITY`] participants.
///
/// Reads are followed by conditional writes, so two participants joining at the same time never
/// both end up as offerer and never push the counter past capacity. A conflicting write is retried
/// with a fresh read until `max_attempts` is exhausted.
#[derive(Debug)]
pub struct AdmissionController<S: ?Sized> {
    store: Arc<S>,
    config: AdmissionConfig,
}

impl<S: AdmissionStore + ?Sized> AdmissionController<S> {
    pub fn new(store: Arc<S>, config: AdmissionConfig) -> Self {
        Self { store, config }
    }

    #[instrument(level = "debug", skip(self), err)]
    pub async fn admit(&self, room_id: &str) -> Result<Admission, AdmissionError> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            tracing::trace!(?attempt, "Reading room document");
            match self.store.get(room_id).await? {
                None => {
                    let doc = codec::encode(&SignalingMessage::RoomInit {
                        participant_count: 1,
                    });
                    if self.store.create(room_id, doc).await? {
                        tracing::debug!("Created room, admitted as offerer");
                        return Ok(Admission {
                            role: Role::Offerer,
                            room_existed: false,
                            participant_count: 1,
                        });
                    }
                }
                Some(doc) => {
                    let count = AdmissionFields::from_document(&doc).participant_count;
                    if count >= ROOM_CAPACITY {
                        tracing::debug!(?count, "Room is full");
                        return Err(AdmissionError::RoomFull {
                            room_id: room_id.to_string(),
                        });
                    }

                    let expected = doc.get(PARTICIPANT_COUNT).cloned().unwrap_or(Value::Null);
                    if self
                        .store
                        .update(room_id, PARTICIPANT_COUNT, &expected, Value::from(count + 1))
                        .await?
                    {
                        tracing::debug!(
                            participant_count = count + 1,
                            "Joined room, admitted as answerer"
                        );
                        return Ok(Admission {
                            role: Role::Answerer,
                            room_existed: true,
                            participant_count: count + 1,
                        });
                    }
                }
            }

            tracing::debug!(?attempt, "Room changed concurrently, retrying admission");
        }

        Err(anyhow!("Room {room_id} kept changing during {max_attempts} admission attempts").into())
    }
}
