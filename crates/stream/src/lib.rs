//! Keyward Stream
//!
//! Watches the remote event store for challenges addressed to paired
//! devices and answers them through the presence-gated signing service.
//!
//! One [`ChallengeProcessor`] task runs per watched device. It claims each
//! new challenge exactly once, purges stale and future-dated entries,
//! verifies the peer signature and only then asks the holder to sign. The
//! [`StreamSupervisor`] owns the processor tasks.

pub mod error;
pub mod processor;
pub mod remote;
pub mod service;

pub use error::{StreamError, StreamResult};
pub use processor::{classify_age, ChallengeDisposition, ChallengeProcessor, Freshness, StreamContext};
pub use remote::{ChildEvent, ChildEvents, InMemoryRemoteStore, RemoteEventStore};
pub use service::StreamSupervisor;
