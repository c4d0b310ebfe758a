//! Rolling upgrade core: decide which member goes next, replace it, wait.
//!
//! The controller drives one cycle at a time:
//! resolve outdated set -> select oldest -> terminate -> poll until stable.

pub mod controller;
pub mod executor;
pub mod planner;
pub mod poller;
pub mod probe;
pub mod resolver;

pub use controller::{Controller, ControllerState, CycleRecord, UpgradeSummary};
pub use poller::{PollOutcome, PollSettings};
pub use probe::ReadinessProbe;
