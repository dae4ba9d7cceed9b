//! AEGIS DNSSEC Key Rollover
//!
//! Scheduled orchestration of signing-key rollovers for zones served by the
//! AEGIS authoritative DNS server. Each invocation moves every zone at most
//! one step through its lifecycle; the server itself generates keys and signs.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler (cron/systemd timer) → aegis-dnssec-rollover
//!                                        ↓
//!                 KeyInventory → zones with active keys
//!                                        ↓ per zone
//!        MetadataStore → RolloverMetadata → Phase::decide
//!                                        ↓
//!                  RolloverEngine → KeyManagementClient (DNS server API)
//!                                        ↓                    ↓
//!                                  CleanupSweep           AuditSink
//!                                        ↓
//!                                   RunSummary
//! ```
//!
//! ## Components
//!
//! - `rollover_types`: zones, keys, algorithm/keytype parsing, marker record
//! - `rollover_config`: policy parameters and API settings (env + TOML)
//! - `rollover_persistence`: SQLite key inventory, marker store and audit log
//! - `key_client`: HTTP client for the server's cryptokey endpoints
//! - `audit`: audit event model and sink trait
//! - `phase`: pure phase decision
//! - `engine`: phase actions and dry-run handling
//! - `cleanup`: grace-period deletion of retired keys
//! - `summary`: per-item outcomes and run counters
//! - `orchestrator`: one complete invocation

pub mod rollover_types;
pub mod rollover_config;
pub mod rollover_persistence;
pub mod key_client;
pub mod audit;
pub mod phase;
pub mod engine;
pub mod cleanup;
pub mod summary;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use rollover_types::*;
pub use rollover_config::*;
pub use rollover_persistence::*;
pub use key_client::*;
pub use audit::*;
pub use phase::*;
pub use engine::*;
pub use cleanup::*;
pub use summary::*;
pub use orchestrator::*;
