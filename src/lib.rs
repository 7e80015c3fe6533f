//! Library exports for the daemon binary, benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// Cooperative cancellation shared by every thread.
pub mod cancel;
/// YAML configuration model and loading.
pub mod config;
/// Process wiring, supervision and reload.
pub mod daemon;
/// Retrying, verified filesystem primitives.
pub mod fsops;
/// Tracing subscriber setup.
pub mod logging;
/// Single-slot job hand-off between watcher and worker.
pub mod mailbox;
/// Cron-driven promotion and capacity pruning.
pub mod retention;
/// Snapshot descriptors and timestamp naming.
pub mod snapshot;
/// Change detection for the source directory.
pub mod watcher;
/// Atomic archival of detected snapshots.
pub mod worker;
#[cfg(test)]
pub(crate) mod test_support;
