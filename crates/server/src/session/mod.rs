//! Client session state and the registry that owns it.

pub mod client;
pub mod registry;

pub use client::ClientSession;
pub use registry::SessionRegistry;
