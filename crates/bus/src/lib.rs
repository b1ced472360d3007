//! # Keyward Bus
//!
//! Lets a requester and an asynchronous responder that hold no reference to
//! each other exchange exactly one response, and optionally one
//! cancellation, per request.
//!
//! Each request mints two single-use topics (response, cancel) and travels
//! to its destination wrapped in [`Correlated`]. The responder answers with
//! [`CorrelationMediator::respond`] and can watch for cancellation with
//! [`CorrelationMediator::await_cancel`]; the requester cancels through the
//! [`PendingRequest`] handle returned by [`CorrelationMediator::request`].

pub mod mediator;
pub mod topic;

pub use mediator::{
    Correlated, CorrelationContext, CorrelationMediator, Destination, MediatorError,
    PendingRequest,
};
pub use topic::{Delivery, TopicBus, TopicError};
