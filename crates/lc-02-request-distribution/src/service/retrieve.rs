//! # Retrieval Manager
//!
//! Turns a request plus a validator into a single verified answer, retrying
//! across peers until one answers validly or none are left.

use shared_types::LesMessage;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::distributor::Distributor;
use crate::domain::{DistributionEvent, RetrieveError};

/// Validating front end of the [`Distributor`].
pub struct RetrieveManager {
    distributor: Arc<Distributor>,
    default_deadline: Option<Duration>,
}

impl RetrieveManager {
    pub fn new(distributor: Arc<Distributor>, default_deadline: Option<Duration>) -> Self {
        Self {
            distributor,
            default_deadline,
        }
    }

    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    /// Retrieve a validated answer within `deadline` (or the default one).
    ///
    /// Deadline expiry reports `Cancelled` and frees the request's slot.
    pub async fn retrieve<T, E, F>(
        &self,
        request: LesMessage,
        deadline: Option<Duration>,
        validate: F,
    ) -> Result<T, RetrieveError>
    where
        F: FnMut(&LesMessage) -> Result<T, E> + Send,
        E: fmt::Display,
    {
        match deadline.or(self.default_deadline) {
            Some(deadline) => tokio::time::timeout(deadline, self.run(request, validate))
                .await
                .unwrap_or_else(|_| {
                    debug!("[lc-02] Retrieval deadline of {:?} passed", deadline);
                    Err(RetrieveError::Cancelled)
                }),
            None => self.run(request, validate).await,
        }
    }

    /// Retrieve a validated answer until `token` is cancelled.
    pub async fn retrieve_with_token<T, E, F>(
        &self,
        request: LesMessage,
        token: &CancellationToken,
        validate: F,
    ) -> Result<T, RetrieveError>
    where
        F: FnMut(&LesMessage) -> Result<T, E> + Send,
        E: fmt::Display,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(RetrieveError::Cancelled),
            result = self.run(request, validate) => result,
        }
    }

    async fn run<T, E, F>(&self, request: LesMessage, mut validate: F) -> Result<T, RetrieveError>
    where
        F: FnMut(&LesMessage) -> Result<T, E> + Send,
        E: fmt::Display,
    {
        let kind = request.kind();
        // Dropping the ticket (deadline, token) cancels the request.
        let mut ticket = self.distributor.queue(request).await?;

        loop {
            match ticket.next_event().await {
                DistributionEvent::Answered {
                    peer,
                    response,
                    elapsed,
                } => match validate(&response) {
                    Ok(value) => {
                        debug!(
                            "[lc-02] {} answered by {} in {:?}",
                            kind.as_str(),
                            peer,
                            elapsed
                        );
                        ticket.accept(peer, elapsed);
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(
                            "[lc-02] Invalid {} response from {}: {}",
                            kind.as_str(),
                            peer,
                            e
                        );
                        ticket.reject(peer);
                    }
                },
                DistributionEvent::Exhausted { tried } => {
                    return Err(RetrieveError::Exhausted { tried })
                }
                DistributionEvent::Closed => return Err(RetrieveError::Closed),
            }
        }
    }
}
