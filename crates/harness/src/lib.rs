mod catalog;
pub mod fixtures;
mod gateway;
mod object_store;

pub use catalog::TestCatalog;
pub use gateway::{CallKind, GatewayCall, MockGateway};
pub use object_store::MemoryObjectStore;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. `RUST_LOG` controls the
/// filter; nothing is printed by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .compact()
            .try_init();
    });
}
