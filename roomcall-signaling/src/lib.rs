pub mod admission;
pub mod codec;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod negotiation;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod subscription;

pub use admission::{Admission, AdmissionController};
pub use lifecycle::{ActiveSession, ReleaseReport, ReleaseStep, SessionManager};
pub use negotiation::{Negotiation, Phase, RoomSession, SessionEvent};
pub use roomcall_protocol as protocol;
pub use store::memory::MemoryStore;
pub use store::{AdmissionStore, RelayChannel};
