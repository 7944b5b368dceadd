//! Hot-reload of database connection strings without application restarts.
//!
//! A hotswap connection string names a watch strategy (its scheme), the
//! database driver being wrapped (its host) and the location the strategy
//! watches (its path), e.g. `fsnotify://postgres/etc/app/dsn.txt`. When the
//! watched value changes, existing connections are drained or killed and new
//! connections pick up the new value, so credential rotation is invisible to
//! application code.
//!
//! ```no_run
//! use hotswap::{HotswapDriver, Registry};
//! use std::sync::Arc;
//!
//! # struct PgDriver;
//! # #[async_trait::async_trait]
//! # impl hotswap::SqlDriver for PgDriver {
//! #     async fn open(&self, _: &str) -> hotswap::Result<Box<dyn hotswap::Conn>> {
//! #         unimplemented!()
//! #     }
//! # }
//! # async fn example() -> hotswap::Result<()> {
//! let registry = Arc::new(Registry::new());
//! hotswap_fsnotify::register(&registry);
//! registry.register_sql_driver("postgres", Arc::new(PgDriver));
//!
//! let driver = HotswapDriver::new(registry);
//! let conn = driver.open("fsnotify://postgres/etc/app/dsn.txt").await?;
//! conn.exec("UPDATE t SET a = 1", &[]).await?;
//! # Ok(())
//! # }
//! ```

pub use hotswap_core::*;
