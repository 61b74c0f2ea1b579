//! Per-turn tool budgets split across trust tiers.
//!
//! Exhausting one pool never touches the others: a turn that burns all of
//! its read budget can still perform its single hard-confirm write.

use maitred_config::TierBudgets;
use maitred_core::TrustTier;

#[derive(Debug, Clone, Copy)]
struct Pool {
    initial: u32,
    remaining: u32,
}

/// One budget pool per trust tier, rebuilt fresh at the start of every turn.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    read: Pool,
    soft_write: Pool,
    hard_write: Pool,
}

impl BudgetTracker {
    pub fn new(budgets: TierBudgets) -> Self {
        let pool = |initial: u32| Pool {
            initial,
            remaining: initial,
        };
        Self {
            read: pool(budgets.read),
            soft_write: pool(budgets.soft_write),
            hard_write: pool(budgets.hard_write),
        }
    }

    fn pool(&self, tier: TrustTier) -> &Pool {
        match tier {
            TrustTier::Auto => &self.read,
            TrustTier::SoftConfirm => &self.soft_write,
            TrustTier::HardConfirm => &self.hard_write,
        }
    }

    fn pool_mut(&mut self, tier: TrustTier) -> &mut Pool {
        match tier {
            TrustTier::Auto => &mut self.read,
            TrustTier::SoftConfirm => &mut self.soft_write,
            TrustTier::HardConfirm => &mut self.hard_write,
        }
    }

    /// Spend one unit from the tier's pool. Returns false without mutating
    /// anything when the pool is already empty.
    pub fn consume(&mut self, tier: TrustTier) -> bool {
        let pool = self.pool_mut(tier);
        if pool.remaining == 0 {
            return false;
        }
        pool.remaining -= 1;
        true
    }

    pub fn remaining(&self, tier: TrustTier) -> u32 {
        self.pool(tier).remaining
    }

    pub fn used(&self, tier: TrustTier) -> u32 {
        let pool = self.pool(tier);
        pool.initial - pool.remaining
    }

    /// Restore every pool to its initial allocation.
    pub fn reset(&mut self) {
        for tier in [TrustTier::Auto, TrustTier::SoftConfirm, TrustTier::HardConfirm] {
            let pool = self.pool_mut(tier);
            pool.remaining = pool.initial;
        }
    }
}
