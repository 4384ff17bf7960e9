// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance-sizing specifications.

use std::fmt::Display;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The sizing dimensions of a candidate instance. Memory and per-disk sizes
/// are in mebibytes; the remaining dimensions are plain counts.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize,
         JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct InstanceSpec {
    pub memory_size: u64,
    pub cpu_count: u64,
    pub disk_count: u64,
    pub disk_size: u64,
    pub nic_count: u64,
    pub spindle_use: u64,
}

impl InstanceSpec {
    pub fn get(&self, dimension: SpecDimension) -> u64 {
        match dimension {
            SpecDimension::MemorySize => self.memory_size,
            SpecDimension::CpuCount => self.cpu_count,
            SpecDimension::DiskCount => self.disk_count,
            SpecDimension::DiskSize => self.disk_size,
            SpecDimension::NicCount => self.nic_count,
            SpecDimension::SpindleUse => self.spindle_use,
        }
    }
}

/// One dimension of an [`InstanceSpec`], for iterating over all dimensions
/// and for naming them in diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize,
         JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpecDimension {
    MemorySize,
    CpuCount,
    DiskCount,
    DiskSize,
    NicCount,
    SpindleUse,
}

impl SpecDimension {
    pub const ALL: [SpecDimension; 6] = [
        SpecDimension::MemorySize,
        SpecDimension::CpuCount,
        SpecDimension::DiskCount,
        SpecDimension::DiskSize,
        SpecDimension::NicCount,
        SpecDimension::SpindleUse,
    ];

    /// The key naming this dimension in parameter tables and configuration
    /// data.
    pub fn key(&self) -> &'static str {
        match self {
            SpecDimension::MemorySize => "memory-size",
            SpecDimension::CpuCount => "cpu-count",
            SpecDimension::DiskCount => "disk-count",
            SpecDimension::DiskSize => "disk-size",
            SpecDimension::NicCount => "nic-count",
            SpecDimension::SpindleUse => "spindle-use",
        }
    }
}

impl Display for SpecDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpecDimension::MemorySize => "memory_size",
            SpecDimension::CpuCount => "cpu_count",
            SpecDimension::DiskCount => "disk_count",
            SpecDimension::DiskSize => "disk_size",
            SpecDimension::NicCount => "nic_count",
            SpecDimension::SpindleUse => "spindle_use",
        };
        write!(f, "{}", name)
    }
}
