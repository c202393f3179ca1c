//! Builders to construct broker components from configuration.

pub mod server_builder;

pub use server_builder::QueueServerBuilder;
