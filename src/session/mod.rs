pub mod pool;

pub use pool::{PooledSession, SessionPool};
