//! Provider Streams
//!
//! Resilient multiplexed realtime connections, one per provider.

pub mod heartbeat;
pub mod manager;
pub mod memory;
pub mod reconnect;
pub mod settings;
pub mod timer;
pub mod websocket;

pub use manager::{ConnectionEvent, ConnectionManager, ConnectionStats, SubscriptionHandle};
pub use memory::{ConnectBehavior, MemoryConnector, MemoryServer, ServerSession, memory_transport};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use settings::ConnectionSettings;
pub use websocket::WebSocketConnector;
