mod filewatcher;

pub use filewatcher::*;

use hotswap_core::Registry;
use std::sync::Arc;

/// Scheme under which this strategy is conventionally registered, making
/// connection strings look like `fsnotify://postgres/etc/app/dsn.txt`.
pub const SCHEME: &str = "fsnotify";

/// Registers a fresh [`FsNotifyStrategy`] under [`SCHEME`].
pub fn register(registry: &Registry) {
    registry.register_strategy(SCHEME, Arc::new(FsNotifyStrategy::new()));
}
