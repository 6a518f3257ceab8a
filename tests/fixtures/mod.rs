//! Test fixtures shared by the integration suites.

pub mod raw_peer;
pub mod storage;
pub mod two_peer;

pub use raw_peer::RawPeer;
pub use storage::{FaultyStorage, Faults};
pub use two_peer::TwoPeerFixture;
