use crate::protocol::{Direction, MessageId, MessageKind, StratumMessage};
use crate::session::Session;
use crate::{Error, Result};
use tracing::{debug, info};

/// Higher-level events raised while observing traffic
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The miner logged in against the configured pool account
    Authorized { address: String },
    /// The pool staged a new share target
    TargetStaged,
    /// A new job made the staged target active
    TargetRotated,
    /// A share submission is awaiting the pool's verdict
    SubmissionOutstanding(MessageId),
    /// The pool accepted an outstanding submission
    SubmissionResolved(MessageId),
}

/// Observes decoded messages from both directions and updates the session.
///
/// Policy violations are returned as errors; the caller tears the
/// connection down.
#[derive(Debug, Clone)]
pub struct Interceptor {
    pool_account: String,
}

impl Interceptor {
    pub fn new(pool_account: impl Into<String>) -> Self {
        Self { pool_account: pool_account.into() }
    }

    pub fn pool_account(&self) -> &str {
        &self.pool_account
    }

    pub fn inspect(
        &self,
        direction: Direction,
        session: &mut Session,
        message: &StratumMessage,
    ) -> Result<Option<SessionEvent>> {
        let kind = message.kind()?;
        match direction {
            Direction::ClientToUpstream => self.on_client_message(session, kind),
            Direction::UpstreamToClient => self.on_upstream_message(session, kind),
        }
    }

    fn on_client_message(&self, session: &mut Session, kind: MessageKind) -> Result<Option<SessionEvent>> {
        match kind {
            MessageKind::Submit { id: Some(id) } => {
                session.mark_submitted(id.clone());
                Ok(Some(SessionEvent::SubmissionOutstanding(id)))
            }
            MessageKind::Submit { id: None } => {
                debug!("Submission without correlation id cannot be tracked");
                Ok(None)
            }
            MessageKind::Authorize { login } => {
                let address = self.authorize(&login)?;
                session.record_authorize(&self.pool_account, &address);
                info!(address = %address, "Miner authorized");
                Ok(Some(SessionEvent::Authorized { address }))
            }
            _ => Ok(None),
        }
    }

    fn on_upstream_message(&self, session: &mut Session, kind: MessageKind) -> Result<Option<SessionEvent>> {
        match kind {
            MessageKind::SetTarget { target } => {
                debug!(target = %format!("{:x}", target), "Target staged");
                session.stage_next_target(target);
                Ok(Some(SessionEvent::TargetStaged))
            }
            MessageKind::Notify => {
                if session.promote_target() {
                    Ok(Some(SessionEvent::TargetRotated))
                } else {
                    Ok(None)
                }
            }
            MessageKind::Response { id, error } => {
                if !session.try_resolve(&id) {
                    return Ok(None);
                }
                if let Some(error) = error {
                    return Err(Error::Policy(format!("Submission {} rejected by pool: {}", id, error)));
                }
                Ok(Some(SessionEvent::SubmissionResolved(id)))
            }
            _ => Ok(None),
        }
    }

    /// Split `<account>.<address>[.<rig>...]` and check the account
    fn authorize(&self, login: &str) -> Result<String> {
        let mut parts = login.splitn(3, '.');
        let account = parts.next().unwrap_or_default();
        let address = parts.next().unwrap_or_default();

        if account != self.pool_account {
            return Err(Error::Policy(format!(
                "Login {} does not mine on pool account {}",
                login, self.pool_account
            )));
        }
        if address.is_empty() {
            return Err(Error::Policy(format!("Login {} carries no payout address", login)));
        }

        Ok(address.to_string())
    }
}
