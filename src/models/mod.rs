pub mod api;
pub mod batch;
pub mod job;
pub mod request;
