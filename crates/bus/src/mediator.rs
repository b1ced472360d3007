//! # Correlation Mediator
//!
//! Generic request/response/cancel broker over two [`TopicBus`]es.
//!
//! - `request` mints a fresh pair of topics, arms the response listener and
//!   dispatches the message.
//! - `await_cancel` arms the cancel listener named by a received message.
//! - `respond` / `cancel` publish on the topic named by a message; they are
//!   no-ops for messages without correlation context.
//!
//! Delivering the response retires the cancel topic as well, so no state
//! outlives an answered request.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::topic::{Delivery, TopicBus, TopicError};

/// Errors from mediator operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediatorError {
    /// Topic registration failed
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// The destination no longer accepts messages
    #[error("Destination closed")]
    DestinationClosed,
}

/// The pair of single-use topics attached to one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationContext {
    response_topic: String,
    cancel_topic: String,
}

impl CorrelationContext {
    fn mint() -> Self {
        Self {
            response_topic: Uuid::new_v4().to_string(),
            cancel_topic: Uuid::new_v4().to_string(),
        }
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    pub fn cancel_topic(&self) -> &str {
        &self.cancel_topic
    }
}

/// A message body together with the correlation context of its request.
#[derive(Debug, Clone)]
pub struct Correlated<M> {
    pub body: M,
    correlation: Option<CorrelationContext>,
}

impl<M> Correlated<M> {
    /// Wrap a message that expects no answer.
    pub fn uncorrelated(body: M) -> Self {
        Self {
            body,
            correlation: None,
        }
    }

    pub fn correlation(&self) -> Option<&CorrelationContext> {
        self.correlation.as_ref()
    }
}

/// Where requests are delivered.
pub trait Destination<M>: Send + Sync {
    fn dispatch(&self, message: Correlated<M>) -> Result<(), MediatorError>;
}

impl<M: Send> Destination<M> for mpsc::UnboundedSender<Correlated<M>> {
    fn dispatch(&self, message: Correlated<M>) -> Result<(), MediatorError> {
        self.send(message)
            .map_err(|_| MediatorError::DestinationClosed)
    }
}

impl<M: Send> Destination<M> for mpsc::Sender<Correlated<M>> {
    fn dispatch(&self, message: Correlated<M>) -> Result<(), MediatorError> {
        self.try_send(message)
            .map_err(|_| MediatorError::DestinationClosed)
    }
}

struct Topics<R, C> {
    responses: TopicBus<R>,
    cancels: TopicBus<C>,
}

/// Request/response/cancel broker. Cloning shares the underlying topics.
pub struct CorrelationMediator<R, C = ()> {
    topics: Arc<Topics<R, C>>,
}

impl<R, C> Clone for CorrelationMediator<R, C> {
    fn clone(&self) -> Self {
        Self {
            topics: self.topics.clone(),
        }
    }
}

impl<R, C> fmt::Debug for CorrelationMediator<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationMediator")
            .field("pending_responses", &self.topics.responses.open_topics())
            .field("pending_cancels", &self.topics.cancels.open_topics())
            .finish()
    }
}

impl<R, C> Default for CorrelationMediator<R, C>
where
    R: Send + 'static,
    C: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R, C> CorrelationMediator<R, C>
where
    R: Send + 'static,
    C: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Topics {
                responses: TopicBus::new(),
                cancels: TopicBus::new(),
            }),
        }
    }

    /// Send `body` to `destination` and call `on_response` with its answer.
    ///
    /// `on_response` runs at most once, on whichever thread publishes the
    /// response.
    pub fn request<M, D, F>(
        &self,
        body: M,
        destination: &D,
        on_response: F,
    ) -> Result<PendingRequest<R, C>, MediatorError>
    where
        D: Destination<M> + ?Sized,
        F: FnOnce(R) + Send + 'static,
    {
        let context = CorrelationContext::mint();
        self.topics.responses.open(&context.response_topic)?;
        if let Err(e) = self.topics.cancels.open(&context.cancel_topic) {
            self.topics.responses.close(&context.response_topic);
            return Err(e.into());
        }

        let topics = self.topics.clone();
        let cancel_topic = context.cancel_topic.clone();
        self.topics.responses.listen(&context.response_topic, move |response| {
            topics.cancels.close(&cancel_topic);
            on_response(response);
        })?;

        let message = Correlated {
            body,
            correlation: Some(context.clone()),
        };
        if let Err(e) = destination.dispatch(message) {
            warn!(topic = %context.response_topic, error = %e, "Request dispatch failed");
            self.retire(&context);
            return Err(e);
        }

        debug!(topic = %context.response_topic, "Request dispatched");
        Ok(PendingRequest {
            mediator: self.clone(),
            context,
        })
    }

    /// Call `on_cancel` once if the request behind `original` is canceled.
    ///
    /// Returns false when `original` carries no correlation context or its
    /// request is already answered.
    pub fn await_cancel<M, F>(
        &self,
        original: &Correlated<M>,
        on_cancel: F,
    ) -> Result<bool, MediatorError>
    where
        F: FnOnce(C) + Send + 'static,
    {
        let Some(context) = original.correlation() else {
            return Ok(false);
        };
        Ok(self.topics.cancels.listen(&context.cancel_topic, on_cancel)?)
    }

    /// Answer the request behind `original`.
    pub fn respond<M>(&self, original: &Correlated<M>, payload: R) -> Delivery {
        match original.correlation() {
            Some(context) => self.topics.responses.publish(&context.response_topic, payload),
            None => Delivery::Dropped,
        }
    }

    /// Cancel the request behind `original`.
    pub fn cancel<M>(&self, original: &Correlated<M>, payload: C) -> Delivery {
        match original.correlation() {
            Some(context) => self.cancel_context(context, payload),
            None => Delivery::Dropped,
        }
    }

    fn cancel_context(&self, context: &CorrelationContext, payload: C) -> Delivery {
        self.topics.cancels.publish(&context.cancel_topic, payload)
    }

    fn retire(&self, context: &CorrelationContext) {
        self.topics.responses.close(&context.response_topic);
        self.topics.cancels.close(&context.cancel_topic);
    }

    /// Requests still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.topics.responses.open_topics()
    }
}

/// Requester-side handle of one outstanding request.
pub struct PendingRequest<R, C = ()> {
    mediator: CorrelationMediator<R, C>,
    context: CorrelationContext,
}

impl<R, C> fmt::Debug for PendingRequest<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("context", &self.context)
            .finish()
    }
}

impl<R, C> PendingRequest<R, C>
where
    R: Send + 'static,
    C: Send + 'static,
{
    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Ask the responder to abandon the request.
    pub fn cancel(&self, payload: C) -> Delivery {
        self.mediator.cancel_context(&self.context, payload)
    }
}
