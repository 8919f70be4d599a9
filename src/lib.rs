pub mod actions;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod runtime;
pub mod store;
