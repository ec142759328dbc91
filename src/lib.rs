//! Client for an encrypted treasure hunt on a 10x10 grid.
//!
//! A player picks a cell, the coordinate is encrypted through an FHE oracle
//! and submitted to the game contract, and the answer arrives later as a
//! contract event once the coprocessor has decrypted the comparison. If no
//! answer shows up within the fallback window the attempt is settled
//! locally as an assumed miss.
//!
//! The external collaborators (wallet, contract transport, FHE relayer) are
//! traits; [`sim`] provides in-process implementations of all three.

pub mod client;
pub mod config;
pub mod creator;
pub mod encryption;
pub mod error;
pub mod format;
pub mod grid;
pub mod ledger;
pub mod resolver;
pub mod session;
pub mod sim;
pub mod store;

pub use client::{Command, QuestClient, Update};
pub use config::QuestConfig;
pub use error::QuestError;
pub use fhe_quest_protocol::{Address, Coordinate, Wei};
pub use resolver::{AttemptStatus, Outcome, OutcomeKind, Provenance, Resolver};
pub use session::Session;

/// Seconds since the Unix epoch, or 0 if the clock is before it.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
