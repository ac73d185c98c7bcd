//! Value Space - a hierarchical key/value namespace shared between processes.
//!
//! Independent processes publish and subscribe to named attributes such as
//! `/Device/Network/Interfaces/eth0/Status` without sharing memory. Values
//! live in pluggable backend layers (a TOML configuration store, volatile and
//! non-volatile registry hives, a session-bus context broker and a JSON
//! document service); reads merge them by priority and change notifications
//! from every layer are folded into one stream per subscriber.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use valuespace::{LayerRegistry, Publisher, Subscriber, Value, config::ValueSpaceConfig};
//!
//! let config = ValueSpaceConfig::load_default()?;
//! let registry = LayerRegistry::from_config(&config)?;
//!
//! let publisher = Publisher::new(registry.clone(), "/Device");
//! publisher.set_value("State", "Running");
//! publisher.sync();
//!
//! let subscriber = Subscriber::new(registry, "/Device");
//! assert_eq!(subscriber.value("State", ""), Value::from("Running"));
//! # Ok::<(), valuespace::ValueSpaceError>(())
//! ```

/// Configuration schema definitions and loading.
pub mod config;

/// Core error types and result aliases.
pub mod core;

/// Command-line interface.
pub mod cli;

/// Backend layers and the contract they implement.
pub mod layer;

/// Hierarchical paths.
pub mod path;

/// Write-side facade.
pub mod publisher;

/// Installed layer set and worker relocation.
pub mod registry;

/// Read-side facade and change aggregation.
pub mod subscriber;

/// Logging setup.
pub mod tracing_config;

/// Primitive value type.
pub mod value;

/// File watching and atomic persistence shared by file-backed layers.
pub mod watch;

pub use core::{Result, ValueSpaceError};
pub use path::{Path, PathEncoding};
pub use publisher::Publisher;
pub use registry::LayerRegistry;
pub use subscriber::Subscriber;
pub use value::Value;
