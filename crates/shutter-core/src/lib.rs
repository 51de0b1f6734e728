pub mod condition;
pub mod config;
pub mod controller;
pub mod deadline;
pub mod driver;
pub mod engine;
pub mod error;
pub mod io;
pub mod machine;
pub mod meta;
pub mod selector;
pub mod store;
pub mod types;

pub use error::{Result, ShutterError};
