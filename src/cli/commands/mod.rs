/// Context broker hosting.
pub mod broker;
/// Configuration inspection.
pub mod config;
/// Installed layer inspection.
pub mod layers;
/// Reading and writing values.
pub mod value;
