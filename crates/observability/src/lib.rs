//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide tracing from `RUST_LOG` (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide tracing with an explicit filter directive,
/// e.g. `"tessera_infra=debug,info"`.
pub fn init_with_filter(directives: &str) {
    tracing::init_with_filter(directives);
}

/// Subscriber configuration (filters, layers).
pub mod tracing;
