pub mod decode;

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};

use tracing::{debug, info};

use crate::driver::{
    PerfMonitorDriver, GL_FLOAT, GL_PERCENTAGE_AMD, GL_UNSIGNED_INT, GL_UNSIGNED_INT64_AMD,
    PERFORMANCE_MONITOR_EXTENSION,
};
use crate::report::Report;

/// Declared data type of a hardware counter.
/// Known values match the `GL_COUNTER_TYPE_AMD` enums of the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterType {
    UnsignedInt64,
    Percentage,
    UnsignedInt,
    Float,
    /// A type tag outside the four the extension defines.
    Unknown(u32),
}

impl CounterType {
    /// Convert from a raw `GL_COUNTER_TYPE_AMD` value.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            GL_UNSIGNED_INT64_AMD => Self::UnsignedInt64,
            GL_PERCENTAGE_AMD => Self::Percentage,
            GL_UNSIGNED_INT => Self::UnsignedInt,
            GL_FLOAT => Self::Float,
            other => Self::Unknown(other),
        }
    }

    /// The raw GL enum value.
    pub const fn raw(self) -> u32 {
        match self {
            Self::UnsignedInt64 => GL_UNSIGNED_INT64_AMD,
            Self::Percentage => GL_PERCENTAGE_AMD,
            Self::UnsignedInt => GL_UNSIGNED_INT,
            Self::Float => GL_FLOAT,
            Self::Unknown(raw) => raw,
        }
    }

    /// GL enum name; empty for unknown types.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsignedInt64 => "GL_UNSIGNED_INT64_AMD",
            Self::Percentage => "GL_PERCENTAGE_AMD",
            Self::UnsignedInt => "GL_UNSIGNED_INT",
            Self::Float => "GL_FLOAT",
            Self::Unknown(_) => "",
        }
    }

    /// Width in bytes of a value of this type inside a result buffer.
    pub const fn value_width(self) -> Option<usize> {
        match self {
            Self::UnsignedInt64 => Some(8),
            Self::Percentage | Self::UnsignedInt | Self::Float => Some(4),
            Self::Unknown(_) => None,
        }
    }

    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A counter's address: group id plus counter id within the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CounterId {
    pub group: u32,
    pub counter: u32,
}

impl CounterId {
    /// Identifiers left in place when no counter matched the target name.
    pub const UNSET: Self = Self {
        group: 0,
        counter: 0,
    };

    pub const fn new(group: u32, counter: u32) -> Self {
        Self { group, counter }
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.counter)
    }
}

/// One discovered hardware counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDescriptor {
    pub id: CounterId,
    pub group_name: String,
    pub display_name: String,
    pub declared_type: CounterType,
}

/// The counter every monitor in the pool is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCounter {
    pub id: CounterId,
    pub declared_type: CounterType,
    /// Number of discovered counters carrying the requested name.
    pub matches: usize,
}

impl TargetCounter {
    /// Target used when the requested name matched nothing.
    pub const fn unresolved() -> Self {
        Self {
            id: CounterId::UNSET,
            declared_type: CounterType::Unknown(0),
            matches: 0,
        }
    }

    pub const fn is_resolved(&self) -> bool {
        self.matches > 0
    }
}

/// Returns whether the driver's capability set includes counter monitoring.
pub fn check_capability(capabilities: &HashSet<String>) -> bool {
    capabilities.contains(PERFORMANCE_MONITOR_EXTENSION)
}

/// Every counter the driver exposes, in driver-reported order.
#[derive(Debug, Clone, Default)]
pub struct CounterCatalog {
    descriptors: Vec<CounterDescriptor>,
}

impl CounterCatalog {
    /// Enumerate all groups and their counters, writing one report line per
    /// counter as it is discovered.
    pub fn discover<D, W>(driver: &D, report: &mut Report<W>) -> io::Result<Self>
    where
        D: PerfMonitorDriver + ?Sized,
        W: Write,
    {
        let mut descriptors = Vec::new();

        for group in driver.groups() {
            let group_name = driver.group_name(group);
            let group_counters = driver.counters(group);
            debug!(
                group,
                name = %group_name,
                counters = group_counters.counters.len(),
                max_active = group_counters.max_active,
                "enumerated counter group",
            );

            for counter in group_counters.counters {
                let descriptor = CounterDescriptor {
                    id: CounterId::new(group, counter),
                    group_name: group_name.clone(),
                    display_name: driver.counter_name(group, counter),
                    declared_type: CounterType::from_raw(driver.counter_type(group, counter)),
                };
                report.counter(&descriptor)?;
                descriptors.push(descriptor);
            }
        }

        info!(counters = descriptors.len(), "counter discovery complete");

        Ok(Self { descriptors })
    }

    /// Build a catalog from already-discovered descriptors.
    pub fn from_descriptors(descriptors: Vec<CounterDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[CounterDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Resolve the counter whose display name equals `exact_name`.
    ///
    /// Every descriptor is scanned; when several share the name, the one
    /// enumerated last wins. With no match the target stays on the
    /// [`CounterId::UNSET`] slot and takes the declared type of whatever
    /// counter lives there, so monitors bound to it still decode.
    pub fn select_target(&self, exact_name: &str) -> TargetCounter {
        let mut target = TargetCounter::unresolved();

        for descriptor in &self.descriptors {
            if descriptor.display_name != exact_name {
                continue;
            }
            if target.is_resolved() {
                debug!(
                    name = exact_name,
                    previous = %target.id,
                    replacement = %descriptor.id,
                    "later counter with the same name overrides target",
                );
            }
            target = TargetCounter {
                id: descriptor.id,
                declared_type: descriptor.declared_type,
                matches: target.matches + 1,
            };
        }

        if !target.is_resolved() {
            if let Some(slot) = self.descriptors.iter().find(|d| d.id == CounterId::UNSET) {
                target.declared_type = slot.declared_type;
            }
        }

        target
    }
}
