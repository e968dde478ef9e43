pub mod gl;
pub mod sim;
pub mod surface;

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;

/// Extension that exposes the hardware counter monitor entry points.
pub const PERFORMANCE_MONITOR_EXTENSION: &str = "GL_AMD_performance_monitor";

// Enum values from the GL_AMD_performance_monitor extension spec.
pub const GL_COUNTER_TYPE_AMD: u32 = 0x8BC0;
pub const GL_UNSIGNED_INT64_AMD: u32 = 0x8BC2;
pub const GL_PERCENTAGE_AMD: u32 = 0x8BC3;
pub const GL_PERFMON_RESULT_AVAILABLE_AMD: u32 = 0x8BC4;
pub const GL_PERFMON_RESULT_SIZE_AMD: u32 = 0x8BC5;
pub const GL_PERFMON_RESULT_AMD: u32 = 0x8BC6;
pub const GL_UNSIGNED_INT: u32 = 0x1405;
pub const GL_FLOAT: u32 = 0x1406;

/// Driver-side name of a performance monitor object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorHandle(pub u32);

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counters advertised by one counter group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupCounters {
    pub counters: Vec<u32>,
    /// Maximum number of counters of this group a single monitor may select.
    pub max_active: i32,
}

/// Hardware counter monitor primitives consumed from the graphics driver.
///
/// Calls that only enqueue commands (`begin_monitor`, `end_monitor`) return
/// immediately. Results become readable once `finish` has returned after the
/// corresponding bracket was closed.
pub trait PerfMonitorDriver {
    /// Extension names advertised by the driver.
    fn extensions(&self) -> HashSet<String>;

    /// Counter group ids in driver-reported order.
    fn groups(&self) -> Vec<u32>;

    /// Human-readable name of a counter group.
    fn group_name(&self, group: u32) -> String;

    /// Counter ids of a group in driver-reported order.
    fn counters(&self, group: u32) -> GroupCounters;

    /// Human-readable name of a counter.
    fn counter_name(&self, group: u32, counter: u32) -> String;

    /// Raw `GL_COUNTER_TYPE_AMD` value of a counter.
    fn counter_type(&self, group: u32, counter: u32) -> u32;

    /// Generate `count` monitor objects.
    fn gen_monitors(&mut self, count: usize) -> Vec<MonitorHandle>;

    /// Delete monitor objects.
    fn delete_monitors(&mut self, monitors: &[MonitorHandle]);

    /// Enable `counters` of `group` on `monitor`.
    fn select_counters(&mut self, monitor: MonitorHandle, group: u32, counters: &[u32]);

    /// Open a collection bracket.
    fn begin_monitor(&mut self, monitor: MonitorHandle);

    /// Close a collection bracket.
    fn end_monitor(&mut self, monitor: MonitorHandle);

    /// Block until every submitted command has completed.
    fn finish(&mut self);

    /// Whether the monitor's result can be read without stalling.
    fn result_available(&self, monitor: MonitorHandle) -> bool;

    /// Size in bytes of the monitor's result.
    fn result_size(&self, monitor: MonitorHandle) -> usize;

    /// Read the monitor's result into `out`, replacing its contents.
    /// `out.len()` afterwards is the number of bytes the driver wrote.
    fn read_result(&mut self, monitor: MonitorHandle, out: &mut Vec<u8>);
}

impl<D: PerfMonitorDriver + ?Sized> PerfMonitorDriver for &mut D {
    fn extensions(&self) -> HashSet<String> {
        (**self).extensions()
    }

    fn groups(&self) -> Vec<u32> {
        (**self).groups()
    }

    fn group_name(&self, group: u32) -> String {
        (**self).group_name(group)
    }

    fn counters(&self, group: u32) -> GroupCounters {
        (**self).counters(group)
    }

    fn counter_name(&self, group: u32, counter: u32) -> String {
        (**self).counter_name(group, counter)
    }

    fn counter_type(&self, group: u32, counter: u32) -> u32 {
        (**self).counter_type(group, counter)
    }

    fn gen_monitors(&mut self, count: usize) -> Vec<MonitorHandle> {
        (**self).gen_monitors(count)
    }

    fn delete_monitors(&mut self, monitors: &[MonitorHandle]) {
        (**self).delete_monitors(monitors)
    }

    fn select_counters(&mut self, monitor: MonitorHandle, group: u32, counters: &[u32]) {
        (**self).select_counters(monitor, group, counters)
    }

    fn begin_monitor(&mut self, monitor: MonitorHandle) {
        (**self).begin_monitor(monitor)
    }

    fn end_monitor(&mut self, monitor: MonitorHandle) {
        (**self).end_monitor(monitor)
    }

    fn finish(&mut self) {
        (**self).finish()
    }

    fn result_available(&self, monitor: MonitorHandle) -> bool {
        (**self).result_available(monitor)
    }

    fn result_size(&self, monitor: MonitorHandle) -> usize {
        (**self).result_size(monitor)
    }

    fn read_result(&mut self, monitor: MonitorHandle, out: &mut Vec<u8>) {
        (**self).read_result(monitor, out)
    }
}

/// Frame submission collaborator: the GPU work being measured.
pub trait FrameTarget {
    /// Clear the color and depth buffers.
    fn clear(&mut self, color: [f32; 4]);

    /// Present the current frame.
    fn present(&mut self) -> Result<()>;
}
