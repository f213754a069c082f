//! # Deployment Pipeline
//!
//! Asynchronous deployment pipeline over broker streams with consumer
//! groups.
//!
//! HTTP handlers hand validated requests to the [`producer::Producer`],
//! which appends one envelope per submission to the stream for its kind.
//! One [`consumer::ConsumerLoop`] per stream reclaims pending entries on
//! startup, then reads new ones, dispatching each envelope to an
//! [`executor::Executor`] under a bounded worker pool and acking terminal
//! outcomes.
//!
//! ## Delivery contract
//!
//! At-least-once: an envelope can be observed more than once, so executors
//! are idempotent on `(owner, request_id)`. Delivery is FIFO per stream;
//! completion order is not guaranteed unless the pool size is 1. Streams
//! are isolated, so a stalled VM loop never blocks cluster work.
//!
//! ## What is deliberately not here
//!
//! No exactly-once, no cross-kind ordering, no priority scheduling, and no
//! synchronous result channel: submitters learn outcomes from the account
//! store.

pub mod accounts;
pub mod broker;
pub mod codec;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod model;
pub mod producer;
pub mod topics;

pub use error::{Error, Result};
