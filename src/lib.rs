mod alarm;
mod config;
mod coordinator;
mod delivery;
mod error;
mod heap;
mod output;
mod queue;

#[cfg(test)]
mod tests;

pub use self::{
    config::{DeliveryMode, DueQueueConfig},
    error::{BuildError, CancelledError},
    output::Output,
    queue::DueQueue,
};
pub use tokio_util::sync::CancellationToken;
