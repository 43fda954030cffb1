//! Bridge layer: wire codec, transports, and the connection pool that the
//! tool layer talks through.

pub mod pool;
pub mod transport;
pub mod wire;

pub use pool::{connect_pool, BridgeExecutor, BridgePool, ConnectionPool, PoolConfig, PoolStats};
pub use transport::{BridgeClient, BridgeConnector, BridgeTransport, Connection, Connector};
pub use wire::{Request, MAX_FRAME_SIZE};
