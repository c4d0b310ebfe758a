//! AWS SDK plumbing shared by the fleet adapters.

pub mod client;
pub mod retry;

pub use client::AwsClients;
pub use retry::Backoff;
