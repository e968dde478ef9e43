//! OpenGL implementation of the counter monitor primitives.
//!
//! Core GL calls go through `glow`. The `GL_AMD_performance_monitor` entry
//! points are not part of glow's bindings, so they are resolved through the
//! context's loader once the extension has been confirmed.

use std::collections::HashSet;
use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

use glow::HasContext;
use thiserror::Error;
use tracing::debug;

use super::{
    GroupCounters, MonitorHandle, PerfMonitorDriver, GL_COUNTER_TYPE_AMD, GL_PERFMON_RESULT_AMD,
    GL_PERFMON_RESULT_AVAILABLE_AMD, GL_PERFMON_RESULT_SIZE_AMD,
};

type GetPerfMonitorGroupsAmd = unsafe extern "system" fn(*mut i32, i32, *mut u32);
type GetPerfMonitorCountersAmd = unsafe extern "system" fn(u32, *mut i32, *mut i32, i32, *mut u32);
type GetPerfMonitorGroupStringAmd = unsafe extern "system" fn(u32, i32, *mut i32, *mut u8);
type GetPerfMonitorCounterStringAmd = unsafe extern "system" fn(u32, u32, i32, *mut i32, *mut u8);
type GetPerfMonitorCounterInfoAmd = unsafe extern "system" fn(u32, u32, u32, *mut c_void);
type GenPerfMonitorsAmd = unsafe extern "system" fn(i32, *mut u32);
type DeletePerfMonitorsAmd = unsafe extern "system" fn(i32, *mut u32);
type SelectPerfMonitorCountersAmd = unsafe extern "system" fn(u32, u8, u32, i32, *mut u32);
type BeginPerfMonitorAmd = unsafe extern "system" fn(u32);
type EndPerfMonitorAmd = unsafe extern "system" fn(u32);
type GetPerfMonitorCounterDataAmd = unsafe extern "system" fn(u32, u32, i32, *mut u32, *mut i32);

const GL_TRUE: u8 = 1;

/// Errors raised while resolving extension entry points.
#[derive(Error, Debug)]
pub enum GlLoadError {
    #[error("missing GL entry point: {0}")]
    MissingEntryPoint(&'static str),
}

struct AmdPerfMonitorFns {
    get_groups: GetPerfMonitorGroupsAmd,
    get_counters: GetPerfMonitorCountersAmd,
    get_group_string: GetPerfMonitorGroupStringAmd,
    get_counter_string: GetPerfMonitorCounterStringAmd,
    get_counter_info: GetPerfMonitorCounterInfoAmd,
    gen_monitors: GenPerfMonitorsAmd,
    delete_monitors: DeletePerfMonitorsAmd,
    select_counters: SelectPerfMonitorCountersAmd,
    begin: BeginPerfMonitorAmd,
    end: EndPerfMonitorAmd,
    get_counter_data: GetPerfMonitorCounterDataAmd,
}

impl AmdPerfMonitorFns {
    fn load(loader: &mut dyn FnMut(&str) -> *const c_void) -> Result<Self, GlLoadError> {
        // Safety: every symbol is cast to the signature the extension spec defines for it.
        unsafe {
            Ok(Self {
                get_groups: load_fn(loader, "glGetPerfMonitorGroupsAMD")?,
                get_counters: load_fn(loader, "glGetPerfMonitorCountersAMD")?,
                get_group_string: load_fn(loader, "glGetPerfMonitorGroupStringAMD")?,
                get_counter_string: load_fn(loader, "glGetPerfMonitorCounterStringAMD")?,
                get_counter_info: load_fn(loader, "glGetPerfMonitorCounterInfoAMD")?,
                gen_monitors: load_fn(loader, "glGenPerfMonitorsAMD")?,
                delete_monitors: load_fn(loader, "glDeletePerfMonitorsAMD")?,
                select_counters: load_fn(loader, "glSelectPerfMonitorCountersAMD")?,
                begin: load_fn(loader, "glBeginPerfMonitorAMD")?,
                end: load_fn(loader, "glEndPerfMonitorAMD")?,
                get_counter_data: load_fn(loader, "glGetPerfMonitorCounterDataAMD")?,
            })
        }
    }
}

/// Resolve `name` and reinterpret it as the function pointer type `F`.
///
/// # Safety
///
/// `F` must be an `extern "system"` function pointer matching the symbol's
/// real signature.
unsafe fn load_fn<F: Copy>(
    loader: &mut dyn FnMut(&str) -> *const c_void,
    name: &'static str,
) -> Result<F, GlLoadError> {
    let ptr = loader(name);
    if ptr.is_null() {
        return Err(GlLoadError::MissingEntryPoint(name));
    }
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
    Ok(std::mem::transmute_copy::<*const c_void, F>(&ptr))
}

/// Extension names advertised by the current context.
pub fn advertised_extensions(gl: &glow::Context) -> HashSet<String> {
    gl.supported_extensions().clone()
}

/// Counter monitor driver backed by a current OpenGL context.
pub struct GlDriver {
    gl: Rc<glow::Context>,
    fns: AmdPerfMonitorFns,
    scratch: Vec<u32>,
}

impl GlDriver {
    /// Resolve the extension entry points. The context must be current and
    /// must advertise [`super::PERFORMANCE_MONITOR_EXTENSION`].
    pub fn load(
        gl: Rc<glow::Context>,
        mut loader: impl FnMut(&str) -> *const c_void,
    ) -> Result<Self, GlLoadError> {
        let fns = AmdPerfMonitorFns::load(&mut loader)?;
        debug!("resolved GL_AMD_performance_monitor entry points");

        Ok(Self {
            gl,
            fns,
            scratch: Vec::new(),
        })
    }

    fn monitor_data_u32(&self, monitor: MonitorHandle, pname: u32) -> u32 {
        let mut value = 0u32;
        // Safety: the query writes a single GLuint into `value`.
        unsafe {
            (self.fns.get_counter_data)(
                monitor.0,
                pname,
                std::mem::size_of::<u32>() as i32,
                &mut value,
                ptr::null_mut(),
            );
        }
        value
    }
}

/// Run a two-pass GL string query: length first, then contents.
fn query_string(query: impl Fn(i32, *mut i32, *mut u8)) -> String {
    let mut len = 0i32;
    query(0, &mut len, ptr::null_mut());

    let capacity = usize::try_from(len).unwrap_or(0) + 1;
    let mut buf = vec![0u8; capacity];
    let mut written = 0i32;
    query(capacity as i32, &mut written, buf.as_mut_ptr());

    let written = usize::try_from(written).unwrap_or(0).min(capacity);
    buf.truncate(written);
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

impl PerfMonitorDriver for GlDriver {
    fn extensions(&self) -> HashSet<String> {
        advertised_extensions(&self.gl)
    }

    fn groups(&self) -> Vec<u32> {
        let mut count = 0i32;
        // Safety: a zero-sized query only writes the group count.
        unsafe { (self.fns.get_groups)(&mut count, 0, ptr::null_mut()) };

        let mut groups = vec![0u32; usize::try_from(count).unwrap_or(0)];
        // Safety: `groups` holds `count` elements.
        unsafe { (self.fns.get_groups)(&mut count, groups.len() as i32, groups.as_mut_ptr()) };
        groups.truncate(usize::try_from(count).unwrap_or(0));
        groups
    }

    fn group_name(&self, group: u32) -> String {
        // Safety: `query_string` passes a buffer of at least `buf_size` bytes.
        query_string(|buf_size, len, buf| unsafe {
            (self.fns.get_group_string)(group, buf_size, len, buf)
        })
    }

    fn counters(&self, group: u32) -> GroupCounters {
        let mut count = 0i32;
        let mut max_active = 0i32;
        // Safety: a zero-sized query only writes the counts.
        unsafe {
            (self.fns.get_counters)(group, &mut count, &mut max_active, 0, ptr::null_mut())
        };

        let mut counters = vec![0u32; usize::try_from(count).unwrap_or(0)];
        // Safety: `counters` holds `count` elements.
        unsafe {
            (self.fns.get_counters)(
                group,
                &mut count,
                &mut max_active,
                counters.len() as i32,
                counters.as_mut_ptr(),
            )
        };
        counters.truncate(usize::try_from(count).unwrap_or(0));

        GroupCounters {
            counters,
            max_active,
        }
    }

    fn counter_name(&self, group: u32, counter: u32) -> String {
        // Safety: `query_string` passes a buffer of at least `buf_size` bytes.
        query_string(|buf_size, len, buf| unsafe {
            (self.fns.get_counter_string)(group, counter, buf_size, len, buf)
        })
    }

    fn counter_type(&self, group: u32, counter: u32) -> u32 {
        let mut raw = 0u32;
        // Safety: GL_COUNTER_TYPE_AMD writes a single GLenum.
        unsafe {
            (self.fns.get_counter_info)(
                group,
                counter,
                GL_COUNTER_TYPE_AMD,
                (&mut raw as *mut u32).cast::<c_void>(),
            )
        };
        raw
    }

    fn gen_monitors(&mut self, count: usize) -> Vec<MonitorHandle> {
        let mut names = vec![0u32; count];
        // Safety: `names` holds `count` elements.
        unsafe { (self.fns.gen_monitors)(names.len() as i32, names.as_mut_ptr()) };
        names.into_iter().map(MonitorHandle).collect()
    }

    fn delete_monitors(&mut self, monitors: &[MonitorHandle]) {
        let mut names: Vec<u32> = monitors.iter().map(|m| m.0).collect();
        // Safety: `names` holds `monitors.len()` elements.
        unsafe { (self.fns.delete_monitors)(names.len() as i32, names.as_mut_ptr()) };
    }

    fn select_counters(&mut self, monitor: MonitorHandle, group: u32, counters: &[u32]) {
        let mut list = counters.to_vec();
        // Safety: `list` holds `counters.len()` elements and is only read.
        unsafe {
            (self.fns.select_counters)(
                monitor.0,
                GL_TRUE,
                group,
                list.len() as i32,
                list.as_mut_ptr(),
            )
        };
    }

    fn begin_monitor(&mut self, monitor: MonitorHandle) {
        // Safety: plain command submission on the current context.
        unsafe { (self.fns.begin)(monitor.0) };
    }

    fn end_monitor(&mut self, monitor: MonitorHandle) {
        // Safety: plain command submission on the current context.
        unsafe { (self.fns.end)(monitor.0) };
    }

    fn finish(&mut self) {
        // Safety: glFinish has no preconditions beyond a current context.
        unsafe { self.gl.finish() };
    }

    fn result_available(&self, monitor: MonitorHandle) -> bool {
        self.monitor_data_u32(monitor, GL_PERFMON_RESULT_AVAILABLE_AMD) != 0
    }

    fn result_size(&self, monitor: MonitorHandle) -> usize {
        self.monitor_data_u32(monitor, GL_PERFMON_RESULT_SIZE_AMD) as usize
    }

    fn read_result(&mut self, monitor: MonitorHandle, out: &mut Vec<u8>) {
        out.clear();

        let size = self.result_size(monitor);
        if size == 0 {
            return;
        }

        // The driver writes through a GLuint pointer, so read into aligned words.
        self.scratch.clear();
        self.scratch.resize(size.div_ceil(4), 0);

        let mut written = 0i32;
        // Safety: `scratch` holds at least `size` bytes.
        unsafe {
            (self.fns.get_counter_data)(
                monitor.0,
                GL_PERFMON_RESULT_AMD,
                size as i32,
                self.scratch.as_mut_ptr(),
                &mut written,
            )
        };

        for word in &self.scratch {
            out.extend_from_slice(&word.to_ne_bytes());
        }
        out.truncate(usize::try_from(written).unwrap_or(0).min(size));
    }
}
