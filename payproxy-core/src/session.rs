use crate::protocol::MessageId;
use num_bigint::BigUint;
use std::collections::HashSet;

/// Per-connection protocol state.
///
/// Owned by the interception task of a single connection and never shared.
#[derive(Debug, Default, Clone)]
pub struct Session {
    address: Option<String>,
    target: Option<BigUint>,
    next_target: Option<BigUint>,
    pending_submits: HashSet<MessageId>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the session to the payout address of an accepted login
    pub fn record_authorize(&mut self, account_id: &str, worker_address: &str) {
        tracing::debug!(account = %account_id, address = %worker_address, "Session authorized");
        self.address = Some(worker_address.to_string());
    }

    /// Stage a target announced by the pool; it applies from the next job
    pub fn stage_next_target(&mut self, value: BigUint) {
        self.next_target = Some(value);
    }

    /// Make the staged target active. Without a staged target nothing changes.
    pub fn promote_target(&mut self) -> bool {
        match &self.next_target {
            Some(next) => {
                self.target = Some(next.clone());
                true
            }
            None => false,
        }
    }

    pub fn mark_submitted(&mut self, id: MessageId) {
        self.pending_submits.insert(id);
    }

    /// Resolve an outstanding submission, removing it so it resolves at most once
    pub fn try_resolve(&mut self, id: &MessageId) -> bool {
        self.pending_submits.remove(id)
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn target(&self) -> Option<&BigUint> {
        self.target.as_ref()
    }

    pub fn next_target(&self) -> Option<&BigUint> {
        self.next_target.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_submits.len()
    }
}
