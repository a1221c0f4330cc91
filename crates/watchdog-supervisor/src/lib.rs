//! Watchdog Supervisor
//!
//! The supervision state machine on top of `watchdog-core`:
//! - Spawn every registry entry and announce it on the request channel
//! - Reap terminated children and relaunch watched ones
//! - Drain identifiers registered by other producers
//! - Cooperative shutdown: kill, reap everything, release the channel

pub mod hook;
pub mod restart;
pub mod supervisor;

pub use hook::ChannelReady;
pub use restart::{RestartDecision, RestartStrategy};
pub use supervisor::{IterationReport, Relaunch, SupervisorContext, SupervisorState};
