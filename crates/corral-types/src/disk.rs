// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Disk templates and their storage capabilities.
//!
//! A disk template selects the storage backing and replication strategy for
//! an instance's disks. The capability predicates in this module are static
//! facts about each template; callers never see an error path because an
//! unrecognized template cannot be constructed in the first place.

use std::fmt::Display;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The kind of storage backing a disk template.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Deserialize,
         Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    Block,
    Diskless,
    Ext,
    File,
    LvmPv,
    LvmVg,
    Rados,
}

/// A disk template identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, JsonSchema)]
pub enum DiskTemplate {
    /// A plain logical volume, local to one node.
    Plain,
    /// A DRBD8 device mirroring a logical volume across two nodes.
    Drbd8,
    /// A file on a node-local file system.
    File,
    /// A file on a file system shared between nodes.
    SharedFile,
    /// A pre-existing block device, adopted rather than created.
    Block,
    /// A RADOS block device in a Ceph pool.
    Rbd,
    /// A device managed by an external storage provider.
    Ext,
    /// No disks at all.
    Diskless,
}

impl DiskTemplate {
    pub const ALL: [DiskTemplate; 8] = [
        DiskTemplate::Plain,
        DiskTemplate::Drbd8,
        DiskTemplate::File,
        DiskTemplate::SharedFile,
        DiskTemplate::Block,
        DiskTemplate::Rbd,
        DiskTemplate::Ext,
        DiskTemplate::Diskless,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiskTemplate::Plain => "plain",
            DiskTemplate::Drbd8 => "drbd8",
            DiskTemplate::File => "file",
            DiskTemplate::SharedFile => "sharedfile",
            DiskTemplate::Block => "blockdev",
            DiskTemplate::Rbd => "rbd",
            DiskTemplate::Ext => "ext",
            DiskTemplate::Diskless => "diskless",
        }
    }

    /// The storage backing this template allocates from.
    pub fn storage_type(&self) -> StorageType {
        match self {
            DiskTemplate::Plain | DiskTemplate::Drbd8 => StorageType::LvmVg,
            DiskTemplate::File | DiskTemplate::SharedFile => StorageType::File,
            DiskTemplate::Block => StorageType::Block,
            DiskTemplate::Rbd => StorageType::Rados,
            DiskTemplate::Ext => StorageType::Ext,
            DiskTemplate::Diskless => StorageType::Diskless,
        }
    }

    /// Whether disks of this template can be grown after creation.
    pub fn is_growable(&self) -> bool {
        matches!(
            self,
            DiskTemplate::Plain
                | DiskTemplate::Drbd8
                | DiskTemplate::File
                | DiskTemplate::SharedFile
                | DiskTemplate::Rbd
                | DiskTemplate::Ext
        )
    }

    /// Whether this template permits adopting pre-existing volumes.
    pub fn may_adopt(&self) -> bool {
        matches!(self, DiskTemplate::Plain | DiskTemplate::Block)
    }

    /// Whether this template only works by adopting pre-existing volumes.
    pub fn must_adopt(&self) -> bool {
        matches!(self, DiskTemplate::Block)
    }

    /// Whether the template mirrors data between nodes itself.
    pub fn is_internally_mirrored(&self) -> bool {
        matches!(self, DiskTemplate::Drbd8)
    }

    /// Whether the backing storage provides the redundancy (SAN, NAS, or
    /// trivially so for diskless instances).
    pub fn is_externally_mirrored(&self) -> bool {
        matches!(
            self,
            DiskTemplate::Diskless
                | DiskTemplate::SharedFile
                | DiskTemplate::Block
                | DiskTemplate::Rbd
                | DiskTemplate::Ext
        )
    }

    /// Whether instances using this template can migrate between nodes.
    pub fn is_mirrored(&self) -> bool {
        self.is_internally_mirrored() || self.is_externally_mirrored()
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, DiskTemplate::File | DiskTemplate::SharedFile)
    }

    /// Whether disks of this template can be moved by copying. Requires that
    /// the backing is neither shared between nodes nor accessed externally.
    pub fn is_copyable(&self) -> bool {
        matches!(self, DiskTemplate::File | DiskTemplate::Plain)
    }

    /// Whether the template works on nodes with exclusive storage enabled.
    pub fn supports_exclusive_storage(&self) -> bool {
        matches!(self, DiskTemplate::Plain)
    }

    /// Whether free-space checks are skipped when allocating disks of this
    /// template.
    pub fn skips_free_space_check(&self) -> bool {
        matches!(
            self,
            DiskTemplate::File
                | DiskTemplate::SharedFile
                | DiskTemplate::Rbd
                | DiskTemplate::Ext
        )
    }
}

impl FromStr for DiskTemplate {
    type Err = std::io::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter().find(|t| t.as_str() == s).copied().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown disk template {:?}", s),
            )
        })
    }
}

impl Display for DiskTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for DiskTemplate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'d> Deserialize<'d> for DiskTemplate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}
