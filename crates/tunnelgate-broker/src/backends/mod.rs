//! Broker implementations

pub mod mock;
pub mod nps;

pub use mock::MockBroker;
pub use nps::NpsBroker;
