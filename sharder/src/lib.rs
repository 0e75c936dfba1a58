//! Adaptive shard allocation.
//!
//! Each tenant gets a policy object that maps its observed write rate to a
//! shard count in `[min, max]`. Scale-out is immediate and multiplicative;
//! scale-in holds the high watermark for a burst window and then decays
//! linearly, so short lulls do not collapse a tenant's fan-out.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

use std::collections::HashMap;

use parking_lot::Mutex;

mod allocator;

pub use allocator::{ShardAllocator, ShardAllocatorConfig};

/// A registry of per-tenant shard allocators sharing one configuration.
#[derive(Debug)]
pub struct TenantShards {
    config: ShardAllocatorConfig,
    tenants: Mutex<HashMap<String, ShardAllocator>>,
}

impl TenantShards {
    pub fn new(config: ShardAllocatorConfig) -> Self {
        Self {
            config,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Observe a tenant's usage at time `now` and return its shard count.
    ///
    /// `usage` and `now` use whatever units the caller's usage tracker
    /// produces, as long as `now` shares units with the configured windows.
    pub fn observe(&self, tenant: &str, usage: u64, now: i64) -> usize {
        let mut tenants = self.tenants.lock();
        tenants
            .entry(tenant.to_string())
            .or_insert_with(|| ShardAllocator::new(self.config.clone()))
            .observe(usage, now)
    }
}
