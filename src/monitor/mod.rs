//! Fixed-size pool of hardware monitors.
//!
//! Every monitor is bound once, at initialization, to the pool's target
//! counter. Monitors cycle `Free -> Active -> PendingCollection -> Free`;
//! the free list is a LIFO stack and the pending set is kept separately so
//! a harvest pass can work from a snapshot of it.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::counter::TargetCounter;
pub use crate::driver::MonitorHandle;
use crate::driver::PerfMonitorDriver;

/// Lifecycle state of a pooled monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    Free,
    /// Currently bracketing GPU work.
    Active,
    /// Bracket closed and submitted; result not yet collected.
    PendingCollection,
}

impl MonitorState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Active => "active",
            Self::PendingCollection => "pending",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool contract violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("monitor pool size must be positive")]
    Empty,

    #[error("driver generated {got} monitors, requested {requested}")]
    ShortAllocation { requested: usize, got: usize },

    #[error("no free monitor available")]
    Exhausted,

    #[error("monitor {handle} does not belong to the pool")]
    UnknownMonitor { handle: MonitorHandle },

    #[error("monitor {handle} is {state}, expected {expected}")]
    InvalidTransition {
        handle: MonitorHandle,
        state: MonitorState,
        expected: MonitorState,
    },
}

/// Number of monitors in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub free: usize,
    pub active: usize,
    pub pending: usize,
}

impl PoolCounts {
    pub const fn total(&self) -> usize {
        self.free + self.active + self.pending
    }
}

pub struct MonitorPool {
    target: TargetCounter,
    states: HashMap<MonitorHandle, MonitorState>,
    free: Vec<MonitorHandle>,
    pending: Vec<MonitorHandle>,
    active: usize,
}

impl MonitorPool {
    /// Generate `size` monitors and bind each to `target`.
    pub fn initialize<D>(
        driver: &mut D,
        size: usize,
        target: TargetCounter,
    ) -> Result<Self, PoolError>
    where
        D: PerfMonitorDriver + ?Sized,
    {
        if size == 0 {
            return Err(PoolError::Empty);
        }

        let handles = driver.gen_monitors(size);
        let states: HashMap<MonitorHandle, MonitorState> = handles
            .iter()
            .map(|&handle| (handle, MonitorState::Free))
            .collect();

        // Duplicate names count as missing monitors.
        if states.len() != size {
            let mut unique: Vec<MonitorHandle> = states.into_keys().collect();
            unique.sort_unstable();
            driver.delete_monitors(&unique);
            return Err(PoolError::ShortAllocation {
                requested: size,
                got: unique.len(),
            });
        }

        let counters = [target.id.counter];
        for &handle in &handles {
            driver.select_counters(handle, target.id.group, &counters);
        }

        debug!(size, target = %target.id, "monitor pool initialized");

        Ok(Self {
            target,
            states,
            free: handles,
            pending: Vec::with_capacity(size),
            active: 0,
        })
    }

    /// The counter every monitor is bound to.
    pub fn target(&self) -> &TargetCounter {
        &self.target
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn state(&self, handle: MonitorHandle) -> Option<MonitorState> {
        self.states.get(&handle).copied()
    }

    pub fn counts(&self) -> PoolCounts {
        PoolCounts {
            free: self.free.len(),
            active: self.active,
            pending: self.pending.len(),
        }
    }

    /// Take the most recently released free monitor and mark it Active.
    pub fn acquire(&mut self) -> Result<MonitorHandle, PoolError> {
        let handle = self.free.pop().ok_or(PoolError::Exhausted)?;
        self.states.insert(handle, MonitorState::Active);
        self.active += 1;
        Ok(handle)
    }

    /// Active -> PendingCollection, once the bracketed work is submitted.
    pub fn mark_pending(&mut self, handle: MonitorHandle) -> Result<(), PoolError> {
        self.transition(handle, MonitorState::Active, MonitorState::PendingCollection)?;
        self.active -= 1;
        self.pending.push(handle);
        Ok(())
    }

    /// Snapshot of every monitor awaiting collection.
    pub fn pending_monitors(&self) -> Vec<MonitorHandle> {
        self.pending.clone()
    }

    /// PendingCollection -> Free.
    pub fn release(&mut self, handle: MonitorHandle) -> Result<(), PoolError> {
        self.transition(handle, MonitorState::PendingCollection, MonitorState::Free)?;
        if let Some(pos) = self.pending.iter().position(|&h| h == handle) {
            self.pending.swap_remove(pos);
        }
        self.free.push(handle);
        Ok(())
    }

    /// Delete every monitor through the driver.
    pub fn destroy<D>(self, driver: &mut D)
    where
        D: PerfMonitorDriver + ?Sized,
    {
        let mut handles: Vec<MonitorHandle> = self.states.into_keys().collect();
        handles.sort_unstable();
        driver.delete_monitors(&handles);
        debug!(count = handles.len(), "monitor pool destroyed");
    }

    fn transition(
        &mut self,
        handle: MonitorHandle,
        expected: MonitorState,
        next: MonitorState,
    ) -> Result<(), PoolError> {
        let state = self
            .states
            .get_mut(&handle)
            .ok_or(PoolError::UnknownMonitor { handle })?;
        if *state != expected {
            return Err(PoolError::InvalidTransition {
                handle,
                state: *state,
                expected,
            });
        }
        *state = next;
        Ok(())
    }
}
