//! Flow accounting.
//!
//! [`FlowController`] tracks the summed [`FlowToken`] cost of records a link
//! holds. [`CreditWindow`] decides how much link credit a receiver advertises.

use courier_core::CreditMode;

use crate::record::FlowToken;

/// Cost accounting against an optional window.
#[derive(Debug, Clone, Default)]
pub struct FlowController {
    window: Option<u64>,
    in_use: u64,
    peak: u64,
}

impl FlowController {
    /// Create a controller. `None` disables the window.
    pub const fn new(window: Option<u64>) -> Self {
        Self {
            window,
            in_use: 0,
            peak: 0,
        }
    }

    /// Account for a record entering the link.
    pub fn reserve(&mut self, token: FlowToken) {
        self.in_use = self.in_use.saturating_add(token.cost());
        self.peak = self.peak.max(self.in_use);
    }

    /// Return a record's cost.
    pub fn release(&mut self, token: FlowToken) {
        self.in_use = self.in_use.saturating_sub(token.cost());
    }

    /// Cost currently held.
    pub const fn in_use(&self) -> u64 {
        self.in_use
    }

    /// Highest cost held at once.
    pub const fn peak(&self) -> u64 {
        self.peak
    }

    /// True when held cost has reached the window.
    pub fn is_saturated(&self) -> bool {
        self.window.is_some_and(|window| self.in_use >= window)
    }
}

/// Receiver link credit under a prefetch bound.
#[derive(Debug, Clone)]
pub struct CreditWindow {
    prefetch: u32,
    credit: u32,
    mode: CreditMode,
}

impl CreditWindow {
    /// Start with credit equal to `prefetch`.
    pub const fn new(prefetch: u32, mode: CreditMode) -> Self {
        Self {
            prefetch,
            credit: prefetch,
            mode,
        }
    }

    pub const fn prefetch(&self) -> u32 {
        self.prefetch
    }

    pub const fn credit(&self) -> u32 {
        self.credit
    }

    /// Spend one unit for an arriving transfer. Returns false when the peer
    /// sent without credit.
    pub fn consume(&mut self) -> bool {
        match self.credit.checked_sub(1) {
            Some(remaining) => {
                self.credit = remaining;
                true
            }
            None => false,
        }
    }

    /// Recompute credit after a delivery completed. Returns the new credit
    /// when it changed and must be advertised.
    pub fn replenish(&mut self, outstanding: usize, saturated: bool) -> Option<u32> {
        if saturated {
            return None;
        }
        let outstanding = u32::try_from(outstanding).unwrap_or(u32::MAX);
        let target = self.prefetch.saturating_sub(outstanding);
        let next = match self.mode {
            CreditMode::Incremental => target,
            CreditMode::DrainAndRefill if self.credit == 0 && outstanding == 0 => self.prefetch,
            CreditMode::DrainAndRefill => return None,
        };
        if next > self.credit {
            self.credit = next;
            Some(next)
        } else {
            None
        }
    }
}
