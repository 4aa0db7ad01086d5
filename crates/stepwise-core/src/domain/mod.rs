/// Instance aggregate and value objects
pub mod instance;

/// Durable log records
pub mod log;

/// Workflow definitions and step contracts
pub mod workflow;

/// Domain events
pub mod events;

/// Durable log interface
pub mod repository;
