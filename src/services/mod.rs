pub mod batch;
pub mod cache;
pub mod executor;
pub mod fetch;
pub mod health;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod single_flight;
pub mod storage;
pub mod worker;
