mod conn;
mod driver;
mod error;
mod group;
mod managed_conn;
mod observer;
mod redact;
mod registry;
mod strategy;
mod transaction;
mod value;

pub use ::anyhow::Context;
pub use conn::*;
pub use driver::*;
pub use error::*;
pub use group::*;
pub use managed_conn::*;
pub use observer::*;
pub use redact::*;
pub use registry::*;
pub use strategy::*;
pub use transaction::*;
pub use value::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
