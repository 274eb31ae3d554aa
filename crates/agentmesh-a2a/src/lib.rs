//! A2A (Agent-to-Agent) protocol support for agentmesh
//!
//! Agents advertise a card at `/.well-known/agent-card.json` and accept
//! JSON-RPC `message/send` calls at their root path. This crate provides the
//! client side (discovery and peer connections), the capability dispatcher
//! that routes inbound messages, and an axum server exposing it.

pub mod builtins;
pub mod capability;
pub mod context;
pub mod discovery;
pub mod dispatcher;
pub mod peer;
pub mod protocol;
pub mod server;

pub use capability::{CapabilityHandler, CapabilityRegistry, FnCapability};
pub use context::{AgentContext, QueryTier};
pub use discovery::DiscoveryClient;
pub use dispatcher::{AsyncPolicy, Dispatcher, DispatcherBuilder};
pub use peer::PeerConnection;
pub use protocol::{Message, Part, Payload, Role};
pub use server::A2aServer;
