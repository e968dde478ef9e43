//! Line-oriented report stream.
//!
//! These lines are the program's primary output and keep a fixed format;
//! diagnostics go through `tracing` instead.

use std::io::{self, Write};

use crate::counter::decode::SampleResult;
use crate::counter::CounterDescriptor;

/// Writes report lines to any byte sink (stdout in the binary).
pub struct Report<W> {
    out: W,
}

impl Report<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Report<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// `group:<name>(<id>)\tcounter:<name>(<id>)\ttype:(<type>)`
    pub fn counter(&mut self, descriptor: &CounterDescriptor) -> io::Result<()> {
        writeln!(
            self.out,
            "group:{}({})\tcounter:{}({})\ttype:({})",
            descriptor.group_name,
            descriptor.id.group,
            descriptor.display_name,
            descriptor.id.counter,
            descriptor.declared_type,
        )
    }

    /// `clocks: <value>`
    pub fn sample(&mut self, sample: &SampleResult) -> io::Result<()> {
        writeln!(self.out, "clocks: {}", sample.value)
    }

    pub fn no_data(&mut self) -> io::Result<()> {
        writeln!(self.out, "WARN: no data from counter")
    }

    pub fn unsupported_platform(&mut self) -> io::Result<()> {
        writeln!(self.out, "ERROR: unsupported platform")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
