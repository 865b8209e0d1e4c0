//! Core engine of the federation broker.
//!
//! This crate composes the order repository, the scheduling loop, the
//! federation forwarding protocol with its timeout reconciliation, the
//! post-provision benchmark flow and the reconciliation monitors behind the
//! [`BrokerController`] facade. All collaborators are injected through the
//! [`BrokerBuilder`]; nothing in here reaches for ambient global state.

pub mod benchmark;
pub mod controller;
pub mod monitors;
pub mod repository;
pub mod requirements;
pub mod scheduling;
pub mod timer;
pub mod userdata;

#[cfg(test)]
pub(crate) mod testkit;

pub use benchmark::{NoopRemoteExec, RemoteExecInterface};
pub use controller::{BrokerBuilder, BrokerContext, BrokerController};
pub use repository::{FailedBatches, ForwardedOrders, OrderRepository};
pub use timer::PeriodicTask;
