pub mod agent;
pub mod invocation;
pub mod step;
pub mod task;
pub mod turn;
