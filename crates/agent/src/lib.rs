//! Agent management for parley.
//!
//! Application code addresses chat endpoints by agent name. The
//! [`AgentManager`] turns a name into a client by asking the agent's
//! factory for a base client and wrapping it with the middleware the
//! current pipeline selects:
//!
//! ```text
//! caller → L[0] → L[1] → … → L[n-1] → base client → provider
//! ```
//!
//! The pipeline is read on every resolution, so reordering it (or
//! reloading it from disk) affects the next call.

pub mod bootstrap;
pub mod factory;
pub mod manager;
pub mod pipeline;

pub use bootstrap::{Bootstrapped, Collaborators, build_manager, retry_policy};
pub use factory::{CachingAgentFactory, ClientBuilder};
pub use manager::AgentManager;
pub use pipeline::{NamedMiddleware, compose, resolve_order};
