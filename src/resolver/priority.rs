//! Dispatch priority computation
//!
//! Smaller values are served first. The base value depends on the entity
//! family and its timing variant:
//!
//! | Family          | Scheduled | Smart | Interval |
//! |-----------------|-----------|-------|----------|
//! | Catalog         | 0         | 1     | 2        |
//! | Target          | 10        | 11    | 12       |
//! | Restock target  | 20        | 21    | 22       |
//!
//! Targets add their reuse counter (modulo the cap) and are clamped to the
//! ceiling, so requeued work drifts back but never past fresh catalogs.

use crate::config::ResolverConfig;
use crate::models::{Catalog, Target, Task, Timing};

const CATALOG_BASE: u32 = 0;
const TARGET_BASE: u32 = 10;
const RESTOCK_BASE: u32 = 20;

fn timing_rank(timing: &Timing) -> u32 {
    match timing {
        Timing::Scheduled { .. } => 0,
        Timing::Smart { .. } => 1,
        Timing::Interval { .. } => 2,
    }
}

/// Priority table plus reuse escalation bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityPolicy {
    reuse_cap: u32,
    ceiling: u32,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default())
    }
}

impl PriorityPolicy {
    /// Reuse wraps at `reuse_cap` (minimum 1); results never exceed `ceiling`
    pub fn new(reuse_cap: u32, ceiling: u32) -> Self {
        Self {
            reuse_cap: reuse_cap.max(1),
            ceiling,
        }
    }

    /// Build from resolver settings
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(config.reuse_cap, config.priority_ceiling)
    }

    /// Priority of a catalog
    pub fn catalog(&self, catalog: &Catalog) -> u32 {
        (CATALOG_BASE + timing_rank(&catalog.timing)).min(self.ceiling)
    }

    /// Priority of a target, escalated by its reuse counter
    pub fn target(&self, target: &Target) -> u32 {
        let base = if target.is_restock() {
            RESTOCK_BASE
        } else {
            TARGET_BASE
        };
        let escalation = target.reuse % self.reuse_cap;
        (base + timing_rank(&target.timing) + escalation).min(self.ceiling)
    }

    /// Priority of any task
    pub fn task(&self, task: &Task) -> u32 {
        match task {
            Task::Catalog(catalog) => self.catalog(catalog),
            Task::Target(target) => self.target(target),
        }
    }

    /// Reuse counter for a target returned by its own execution
    pub fn next_reuse(&self, reuse: u32) -> u32 {
        (reuse % self.reuse_cap + 1) % self.reuse_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_reuse(reuse: u32) -> Target {
        let mut target = Target::page("shop", "p", Timing::interval(5.0));
        target.reuse = reuse;
        target
    }

    #[test]
    fn test_base_table() {
        let policy = PriorityPolicy::new(10, 99);
        assert_eq!(policy.catalog(&Catalog::new("a", Timing::scheduled(1.0))), 0);
        assert_eq!(policy.catalog(&Catalog::new("a", Timing::interval(1.0))), 2);
        assert_eq!(policy.target(&Target::page("a", "p", Timing::scheduled(1.0))), 10);
        assert_eq!(policy.target(&Target::page("a", "p", Timing::interval(1.0))), 12);
        assert_eq!(policy.target(&Target::restock("a", 1, Timing::scheduled(1.0))), 20);
        assert_eq!(policy.target(&Target::restock("a", 1, Timing::interval(1.0))), 22);
    }

    #[test]
    fn test_reuse_escalates_then_wraps() {
        let policy = PriorityPolicy::new(4, 99);
        let priorities: Vec<u32> = (0..6)
            .map(|r| policy.target(&target_with_reuse(r)))
            .collect();
        assert_eq!(priorities, vec![12, 13, 14, 15, 12, 13]);
    }

    #[test]
    fn test_ceiling_clamps() {
        let policy = PriorityPolicy::new(50, 20);
        assert_eq!(policy.target(&target_with_reuse(30)), 20);
    }

    #[test]
    fn test_next_reuse_wraps_at_cap() {
        let policy = PriorityPolicy::new(3, 99);
        assert_eq!(policy.next_reuse(0), 1);
        assert_eq!(policy.next_reuse(1), 2);
        assert_eq!(policy.next_reuse(2), 0);
    }
}
