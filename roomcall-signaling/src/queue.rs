use roomcall_protocol::{CandidateRecord, Role, SignalingMessage};

/// Where a received remote candidate has to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The remote description is not applied yet, the candidate was queued.
    Queued,
    /// The queue has been drained already, the candidate must be applied right away.
    Apply(CandidateRecord),
}

/// Remote candidates received before the remote description was applied.
///
/// The queue is drained exactly once, when the remote description has been set. Afterwards it
/// stays open and every candidate is handed back for immediate application.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: Vec<CandidateRecord>,
    drained: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, candidate: CandidateRecord) -> Routed {
        if self.drained {
            Routed::Apply(candidate)
        } else {
            self.pending.push(candidate);
            Routed::Queued
        }
    }

    /// Takes all queued candidates in receipt order. Returns `None` on every call but the first.
    pub fn drain(&mut self) -> Option<Vec<CandidateRecord>> {
        if self.drained {
            return None;
        }
        self.drained = true;
        Some(std::mem::take(&mut self.pending))
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Local candidates gathered so far, published as one cumulative bundle.
#[derive(Debug)]
pub struct OutgoingCandidates {
    role: Role,
    gathered: Vec<CandidateRecord>,
}

impl OutgoingCandidates {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            gathered: Vec::new(),
        }
    }

    /// Records a new local candidate and returns the bundle to publish.
    pub fn push(&mut self, candidate: CandidateRecord) -> SignalingMessage {
        self.gathered.push(candidate);
        SignalingMessage::IceBundle {
            role: self.role,
            candidates: self.gathered.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.gathered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gathered.is_empty()
    }
}
