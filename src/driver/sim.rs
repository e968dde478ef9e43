//! In-memory counter monitor driver.
//!
//! Models the asynchronous contract of the real extension: a closed bracket
//! only produces a readable result after the next `finish`. Used for
//! `--simulate` runs on machines without the extension, and by tests and
//! benches.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use super::{
    FrameTarget, GroupCounters, MonitorHandle, PerfMonitorDriver, GL_FLOAT, GL_PERCENTAGE_AMD,
    GL_UNSIGNED_INT, GL_UNSIGNED_INT64_AMD, PERFORMANCE_MONITOR_EXTENSION,
};

/// Base value reported by simulated clock counters.
const SIM_CLOCKS_BASE: u64 = 1_048_576;

#[derive(Debug, Clone)]
struct SimCounter {
    id: u32,
    name: String,
    raw_type: u32,
}

#[derive(Debug, Clone)]
struct SimGroup {
    id: u32,
    name: String,
    max_active: i32,
    counters: Vec<SimCounter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BracketState {
    Idle,
    Open,
    /// Closed; the value becomes readable after the next `finish`.
    Submitted { sequence: u64 },
    Complete { sequence: u64 },
}

#[derive(Debug, Clone)]
struct SimMonitor {
    selection: Option<(u32, Vec<u32>)>,
    bracket: BracketState,
}

/// Simulated driver with a configurable counter catalog.
#[derive(Debug, Default)]
pub struct SimDriver {
    extensions: HashSet<String>,
    groups: Vec<SimGroup>,
    monitors: HashMap<MonitorHandle, SimMonitor>,
    next_handle: u32,
    sequence: u64,
    empty_results: bool,
    duplicate_handles: bool,
    finish_calls: u64,
    deleted: Vec<MonitorHandle>,
}

impl SimDriver {
    /// A driver without extensions or counters.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            ..Default::default()
        }
    }

    /// A driver advertising the extension with a small catalog that mirrors
    /// the layout of a real GPU, including a `GRBM_000` clock counter.
    pub fn with_default_catalog() -> Self {
        Self::new()
            .with_extension(PERFORMANCE_MONITOR_EXTENSION)
            .with_group(
                0,
                "GRBM",
                &[
                    (0, "GRBM_000", GL_UNSIGNED_INT64_AMD),
                    (1, "GRBM_001", GL_UNSIGNED_INT64_AMD),
                ],
            )
            .with_group(
                1,
                "GPU Busy",
                &[(0, "GPU_BUSY", GL_PERCENTAGE_AMD), (1, "SHADER_BUSY", GL_FLOAT)],
            )
            .with_group(2, "SQ", &[(0, "SQ_WAVES", GL_UNSIGNED_INT)])
    }

    /// Advertise an extension name.
    pub fn with_extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_string());
        self
    }

    /// Append a counter group of `(id, name, GL counter type)` entries.
    pub fn with_group(mut self, id: u32, name: &str, counters: &[(u32, &str, u32)]) -> Self {
        self.groups.push(SimGroup {
            id,
            name: name.to_string(),
            max_active: counters.len() as i32,
            counters: counters
                .iter()
                .map(|&(id, name, raw_type)| SimCounter {
                    id,
                    name: name.to_string(),
                    raw_type,
                })
                .collect(),
        });
        self
    }

    /// Make every result read back as zero bytes.
    pub fn with_empty_results(mut self) -> Self {
        self.empty_results = true;
        self
    }

    /// Make `gen_monitors` hand out its first name twice in place of the
    /// last one.
    pub fn with_duplicate_handles(mut self) -> Self {
        self.duplicate_handles = true;
        self
    }

    /// Number of `finish` calls so far.
    pub fn finish_calls(&self) -> u64 {
        self.finish_calls
    }

    /// Handles deleted through `delete_monitors`.
    pub fn deleted_monitors(&self) -> &[MonitorHandle] {
        &self.deleted
    }

    /// Number of live monitor objects.
    pub fn live_monitors(&self) -> usize {
        self.monitors.len()
    }

    /// Counters selected on a monitor, as `(group, counters)`.
    pub fn selection(&self, monitor: MonitorHandle) -> Option<(u32, &[u32])> {
        self.monitors
            .get(&monitor)?
            .selection
            .as_ref()
            .map(|(group, counters)| (*group, counters.as_slice()))
    }

    /// Value a simulated counter reports for the bracket with `sequence`.
    pub fn simulated_clocks(sequence: u64) -> u64 {
        SIM_CLOCKS_BASE + sequence * 4_096
    }

    fn find_counter(&self, group: u32, counter: u32) -> Option<&SimCounter> {
        self.groups
            .iter()
            .find(|g| g.id == group)?
            .counters
            .iter()
            .find(|c| c.id == counter)
    }

    /// Encode the result layout of the extension: group, counter, value.
    fn encode_result(&self, monitor: MonitorHandle) -> Vec<u8> {
        if self.empty_results {
            return Vec::new();
        }

        let Some(state) = self.monitors.get(&monitor) else {
            return Vec::new();
        };
        let BracketState::Complete { sequence } = state.bracket else {
            return Vec::new();
        };
        let Some((group, counters)) = &state.selection else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(16 * counters.len());
        for &counter in counters {
            let Some(info) = self.find_counter(*group, counter) else {
                continue;
            };
            out.extend_from_slice(&group.to_ne_bytes());
            out.extend_from_slice(&counter.to_ne_bytes());
            match info.raw_type {
                GL_UNSIGNED_INT64_AMD => {
                    out.extend_from_slice(&Self::simulated_clocks(sequence).to_ne_bytes())
                }
                GL_UNSIGNED_INT => out.extend_from_slice(&(sequence as u32).to_ne_bytes()),
                GL_PERCENTAGE_AMD | GL_FLOAT => {
                    out.extend_from_slice(&((sequence % 100) as f32).to_ne_bytes())
                }
                _ => out.extend_from_slice(&sequence.to_ne_bytes()),
            }
        }
        out
    }
}

impl PerfMonitorDriver for SimDriver {
    fn extensions(&self) -> HashSet<String> {
        self.extensions.clone()
    }

    fn groups(&self) -> Vec<u32> {
        self.groups.iter().map(|g| g.id).collect()
    }

    fn group_name(&self, group: u32) -> String {
        self.groups
            .iter()
            .find(|g| g.id == group)
            .map(|g| g.name.clone())
            .unwrap_or_default()
    }

    fn counters(&self, group: u32) -> GroupCounters {
        self.groups
            .iter()
            .find(|g| g.id == group)
            .map(|g| GroupCounters {
                counters: g.counters.iter().map(|c| c.id).collect(),
                max_active: g.max_active,
            })
            .unwrap_or_default()
    }

    fn counter_name(&self, group: u32, counter: u32) -> String {
        self.find_counter(group, counter)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn counter_type(&self, group: u32, counter: u32) -> u32 {
        self.find_counter(group, counter)
            .map(|c| c.raw_type)
            .unwrap_or(0)
    }

    fn gen_monitors(&mut self, count: usize) -> Vec<MonitorHandle> {
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            let handle = MonitorHandle(self.next_handle.max(1));
            self.next_handle = handle.0 + 1;
            self.monitors.insert(
                handle,
                SimMonitor {
                    selection: None,
                    bracket: BracketState::Idle,
                },
            );
            handles.push(handle);
        }
        if self.duplicate_handles && handles.len() > 1 {
            let last = handles.len() - 1;
            self.monitors.remove(&handles[last]);
            handles[last] = handles[0];
        }
        handles
    }

    fn delete_monitors(&mut self, monitors: &[MonitorHandle]) {
        for monitor in monitors {
            if self.monitors.remove(monitor).is_some() {
                self.deleted.push(*monitor);
            }
        }
    }

    fn select_counters(&mut self, monitor: MonitorHandle, group: u32, counters: &[u32]) {
        if let Some(state) = self.monitors.get_mut(&monitor) {
            state.selection = Some((group, counters.to_vec()));
        }
    }

    fn begin_monitor(&mut self, monitor: MonitorHandle) {
        if let Some(state) = self.monitors.get_mut(&monitor) {
            state.bracket = BracketState::Open;
        }
    }

    fn end_monitor(&mut self, monitor: MonitorHandle) {
        if let Some(state) = self.monitors.get_mut(&monitor) {
            if state.bracket == BracketState::Open {
                self.sequence += 1;
                state.bracket = BracketState::Submitted {
                    sequence: self.sequence,
                };
            }
        }
    }

    fn finish(&mut self) {
        self.finish_calls += 1;
        for state in self.monitors.values_mut() {
            if let BracketState::Submitted { sequence } = state.bracket {
                state.bracket = BracketState::Complete { sequence };
            }
        }
    }

    fn result_available(&self, monitor: MonitorHandle) -> bool {
        self.monitors
            .get(&monitor)
            .is_some_and(|m| matches!(m.bracket, BracketState::Complete { .. }))
    }

    fn result_size(&self, monitor: MonitorHandle) -> usize {
        self.encode_result(monitor).len()
    }

    fn read_result(&mut self, monitor: MonitorHandle, out: &mut Vec<u8>) {
        out.clear();
        out.extend_from_slice(&self.encode_result(monitor));
    }
}

/// Frame target that only counts submitted work.
#[derive(Debug, Default)]
pub struct NullFrame {
    clears: u64,
    presents: u64,
}

impl NullFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clears(&self) -> u64 {
        self.clears
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }
}

impl FrameTarget for NullFrame {
    fn clear(&mut self, _color: [f32; 4]) {
        self.clears += 1;
    }

    fn present(&mut self) -> Result<()> {
        self.presents += 1;
        Ok(())
    }
}
