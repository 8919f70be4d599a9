pub mod error;
pub mod executor;
pub mod flow;
pub mod handler;
pub mod observer;
pub mod report;
pub mod retry;
