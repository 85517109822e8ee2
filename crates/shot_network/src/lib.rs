//! Shot Network: Gossip mesh for shotnet nodes.
//!
//! This crate provides the networking core for a shotnet node: it accepts
//! inbound messages, keeps a partial view of the mesh, and spreads
//! announcements, chat, resources and knowledge updates by bounded flooding.
//!
//! # Architecture
//!
//! - **Transport**: one length-prefixed JSON frame per short-lived TCP
//!   connection. Nothing is ever written back.
//! - **Flooding**: every message carries a hop budget (`ttl`). Receivers
//!   dedup by message id in a bounded [`SeenSet`](seen::SeenSet) and forward
//!   with one less hop, skipping the origin and the relay.
//! - **Routing**: a tagged table of async handlers keyed by [`MessageKind`].
//!   Unhandled messages land on an inbound queue for the application.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use shot_network::{BootstrapPeer, NetworkConfig, Node};
//!
//! # async fn example() -> Result<(), shot_network::NetworkError> {
//! let mut node = Node::named("node1", NetworkConfig::default());
//! let addr = node.start().await?;
//! println!("listening on {addr}");
//!
//! node.discover(&["node2@127.0.0.1:50001".parse::<BootstrapPeer>().unwrap()])
//!     .await?;
//! node.send_chat("hello mesh").await?;
//!
//! node.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod payload;
pub mod peer;
pub mod resource;
pub mod router;
pub mod seen;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use config::{BootstrapPeer, NetworkConfig};
pub use error::{HandlerError, NetworkError};
pub use identity::{NodeIdentity, PeerId};
pub use message::{Message, MessageKind};
pub use node::{BroadcastReport, Node, NodeHandle, NodeState, SendStatus};
pub use peer::{PeerRecord, PeerTable};
pub use resource::{Resource, ResourceCatalog};
pub use router::{DispatchOutcome, MessageHandler, handler};
