pub mod agent;
pub mod autoscaler;
pub mod change;
pub mod metrics;
pub mod planner;
pub mod pools;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use scheduler::{Scheduler, SchedulerConfig, TickReport};
