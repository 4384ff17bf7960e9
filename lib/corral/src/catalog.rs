// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The built-in parameter catalogue.
//!
//! Every function here builds a fresh [`ParameterSpace`] (or policy) value:
//! the catalogue is data the engine consumes, not state it holds, and
//! callers that want a shared copy can wrap one in an `Arc` themselves.
//! Construction goes through `ParameterSpace::new` so the compiled-in
//! defaults are checked against the declared types like any other input.

use std::collections::{BTreeMap, BTreeSet};

use corral_types::{
    ByteSize, DiskTemplate, HypervisorKind, InstanceSpec, NicMode,
    ParamValue, ValueType,
};

use crate::params::{EntityKind, ParameterSpace};
use crate::policy::{InstancePolicy, PolicyBracket};

/// Default vcpu-to-physical-cpu overcommit limit.
pub const DEFAULT_VCPU_RATIO: f64 = 4.0;

/// Default spindle overcommit limit.
pub const DEFAULT_SPINDLE_RATIO: f64 = 32.0;

fn string(s: &str) -> ParamValue {
    ParamValue::String(s.to_string())
}

fn absent() -> ParamValue {
    ParamValue::MaybeString(None)
}

fn size_mib(mib: u64) -> ParamValue {
    ParamValue::Size(ByteSize::from_mebibytes(mib))
}

/// Assembles a space from `(key, type, default)` rows. The built-in tables
/// are written by hand, so a consistency failure here is a bug in this
/// module, not bad input.
fn space(
    kind: EntityKind,
    rows: &[(&str, ValueType, ParamValue)],
    globals: &[&str],
) -> ParameterSpace {
    let types: BTreeMap<String, ValueType> =
        rows.iter().map(|(k, t, _)| (k.to_string(), *t)).collect();
    let defaults: BTreeMap<String, ParamValue> =
        rows.iter().map(|(k, _, d)| (k.to_string(), d.clone())).collect();
    let globals: BTreeSet<String> =
        globals.iter().map(|k| k.to_string()).collect();
    ParameterSpace::new(kind, types, globals, defaults)
        .expect("the built-in tables are consistent")
}

/// Backend parameters: the resources an instance is entitled to regardless
/// of which hypervisor runs it.
pub fn backend_params() -> ParameterSpace {
    space(
        EntityKind::Backend,
        &[
            ("maxmem", ValueType::Size, size_mib(128)),
            ("minmem", ValueType::Size, size_mib(128)),
            ("vcpus", ValueType::Int, ParamValue::Int(1)),
            ("auto_balance", ValueType::Bool, ParamValue::Bool(true)),
            ("always_failover", ValueType::Bool, ParamValue::Bool(false)),
            ("spindle_use", ValueType::Int, ParamValue::Int(1)),
        ],
        &[],
    )
}

/// Node parameters. `exclusive_storage` changes the meaning of free-space
/// accounting everywhere at once, so it can only be set cluster-wide.
pub fn node_params() -> ParameterSpace {
    space(
        EntityKind::Node,
        &[
            ("oob_program", ValueType::String, string("")),
            ("spindle_count", ValueType::Int, ParamValue::Int(1)),
            ("exclusive_storage", ValueType::Bool, ParamValue::Bool(false)),
            ("ovs", ValueType::Bool, ParamValue::Bool(false)),
            (
                "ovs_name",
                ValueType::MaybeString,
                ParamValue::MaybeString(Some("switch1".to_string())),
            ),
            (
                "ovs_link",
                ValueType::MaybeString,
                ParamValue::MaybeString(Some(String::new())),
            ),
        ],
        &["exclusive_storage"],
    )
}

/// NIC parameters.
pub fn nic_params() -> ParameterSpace {
    space(
        EntityKind::Nic,
        &[
            ("mode", ValueType::String, string(NicMode::Bridged.as_str())),
            ("link", ValueType::String, string("br0")),
            ("vlan", ValueType::MaybeString, absent()),
        ],
        &[],
    )
}

/// Hypervisor parameters for `kind`. The key set varies per hypervisor; the
/// migration settings are cluster-global for every kind that has them,
/// since both ends of a migration must agree on them.
pub fn hypervisor_params(kind: HypervisorKind) -> ParameterSpace {
    const MIGRATION_GLOBALS: &[&str] =
        &["migration_port", "migration_bandwidth", "migration_mode"];
    let entity = EntityKind::Hypervisor(kind);
    match kind {
        HypervisorKind::Kvm => space(
            entity,
            &[
                ("kernel_path", ValueType::String, string("/boot/vmlinuz-kvmU")),
                ("kernel_args", ValueType::String, string("ro")),
                ("initrd_path", ValueType::String, string("")),
                ("root_path", ValueType::MaybeString,
                 ParamValue::MaybeString(Some("/dev/vda1".to_string()))),
                ("acpi", ValueType::Bool, ParamValue::Bool(true)),
                ("serial_console", ValueType::Bool, ParamValue::Bool(true)),
                ("serial_speed", ValueType::Int, ParamValue::Int(38400)),
                ("boot_order", ValueType::String, string("disk")),
                ("nic_type", ValueType::String, string("paravirtual")),
                ("disk_type", ValueType::String, string("paravirtual")),
                ("disk_cache", ValueType::String, string("default")),
                ("vnc_bind_address", ValueType::String, string("")),
                ("use_chroot", ValueType::Bool, ParamValue::Bool(false)),
                ("mem_path", ValueType::String, string("")),
                ("cpu_mask", ValueType::String, string("all")),
                ("migration_port", ValueType::Int, ParamValue::Int(8102)),
                ("migration_bandwidth", ValueType::Int, ParamValue::Int(32)),
                ("migration_downtime", ValueType::Int, ParamValue::Int(30)),
                ("migration_mode", ValueType::String, string("live")),
            ],
            MIGRATION_GLOBALS,
        ),
        HypervisorKind::XenPvm => space(
            entity,
            &[
                ("use_bootloader", ValueType::Bool, ParamValue::Bool(false)),
                ("bootloader_path", ValueType::String, string("/usr/bin/pygrub")),
                ("bootloader_args", ValueType::String, string("")),
                ("kernel_path", ValueType::String, string("/boot/vmlinuz-xenU")),
                ("kernel_args", ValueType::String, string("ro")),
                ("initrd_path", ValueType::String, string("")),
                ("root_path", ValueType::MaybeString,
                 ParamValue::MaybeString(Some("/dev/xvda1".to_string()))),
                ("blockdev_prefix", ValueType::String, string("sd")),
                ("cpu_mask", ValueType::String, string("all")),
                ("cpu_cap", ValueType::Int, ParamValue::Int(0)),
                ("cpu_weight", ValueType::Int, ParamValue::Int(256)),
                ("migration_port", ValueType::Int, ParamValue::Int(8002)),
                ("migration_mode", ValueType::String, string("live")),
            ],
            &["migration_port", "migration_mode"],
        ),
        HypervisorKind::XenHvm => space(
            entity,
            &[
                ("boot_order", ValueType::String, string("cd")),
                ("cdrom_image_path", ValueType::String, string("")),
                ("nic_type", ValueType::String, string("rtl8139")),
                ("disk_type", ValueType::String, string("paravirtual")),
                ("vnc_bind_address", ValueType::String, string("0.0.0.0")),
                ("acpi", ValueType::Bool, ParamValue::Bool(true)),
                ("pae", ValueType::Bool, ParamValue::Bool(true)),
                ("kernel_path", ValueType::String,
                 string("/usr/lib/xen/boot/hvmloader")),
                ("device_model", ValueType::String,
                 string("/usr/lib/xen/bin/qemu-dm")),
                ("use_localtime", ValueType::Bool, ParamValue::Bool(false)),
                ("blockdev_prefix", ValueType::String, string("hd")),
                ("cpu_mask", ValueType::String, string("all")),
                ("cpu_cap", ValueType::Int, ParamValue::Int(0)),
                ("cpu_weight", ValueType::Int, ParamValue::Int(256)),
                ("migration_port", ValueType::Int, ParamValue::Int(8002)),
                ("migration_mode", ValueType::String, string("non-live")),
            ],
            &["migration_port", "migration_mode"],
        ),
        HypervisorKind::Lxc => space(
            entity,
            &[("cpu_mask", ValueType::String, string(""))],
            &[],
        ),
    }
}

/// Disk parameters for `template`. Templates without tunables get an empty
/// space; resolution over one still succeeds and yields an empty map.
pub fn disk_params(template: DiskTemplate) -> ParameterSpace {
    let entity = EntityKind::Disk(template);
    match template {
        DiskTemplate::Plain => space(
            entity,
            &[("stripes", ValueType::Int, ParamValue::Int(1))],
            &[],
        ),
        DiskTemplate::Drbd8 => space(
            entity,
            &[
                ("resync-rate", ValueType::Int, ParamValue::Int(61440)),
                ("data-stripes", ValueType::Int, ParamValue::Int(1)),
                ("meta-stripes", ValueType::Int, ParamValue::Int(1)),
                ("disk-barriers", ValueType::String, string("n")),
                ("meta-barriers", ValueType::Bool, ParamValue::Bool(false)),
                ("metavg", ValueType::String, string("xenvg")),
                ("disk-custom", ValueType::String, string("")),
                ("net-custom", ValueType::String, string("")),
                ("protocol", ValueType::String, string("C")),
                ("dynamic-resync", ValueType::Bool, ParamValue::Bool(false)),
                ("c-plan-ahead", ValueType::Int, ParamValue::Int(20)),
                ("c-fill-target", ValueType::Int, ParamValue::Int(0)),
                ("c-delay-target", ValueType::Int, ParamValue::Int(1)),
                ("c-max-rate", ValueType::Int, ParamValue::Int(61440)),
                ("c-min-rate", ValueType::Int, ParamValue::Int(4096)),
            ],
            &[],
        ),
        DiskTemplate::Rbd => space(
            entity,
            &[("pool", ValueType::String, string("rbd"))],
            &[],
        ),
        DiskTemplate::File
        | DiskTemplate::SharedFile
        | DiskTemplate::Block
        | DiskTemplate::Ext
        | DiskTemplate::Diskless => space(entity, &[], &[]),
    }
}

/// The instance-spec dimension table. All dimensions are plain integers;
/// sizes are expressed in mebibytes rather than as suffixed size values.
pub fn instance_spec_params() -> ParameterSpace {
    space(
        EntityKind::InstanceSpec,
        &[
            ("memory-size", ValueType::Int, ParamValue::Int(128)),
            ("cpu-count", ValueType::Int, ParamValue::Int(1)),
            ("disk-count", ValueType::Int, ParamValue::Int(1)),
            ("disk-size", ValueType::Int, ParamValue::Int(1024)),
            ("nic-count", ValueType::Int, ParamValue::Int(1)),
            ("spindle-use", ValueType::Int, ParamValue::Int(1)),
        ],
        &[],
    )
}

/// The built-in instance policy: one wide bracket, a minimal standard spec,
/// every disk template allowed, and the default overcommit ratios. There
/// are no universally good sizing limits; sites are expected to override
/// this wholesale.
pub fn default_instance_policy() -> InstancePolicy {
    let min = InstanceSpec {
        memory_size: 128,
        cpu_count: 1,
        disk_count: 1,
        disk_size: 1024,
        nic_count: 1,
        spindle_use: 1,
    };
    let max = InstanceSpec {
        memory_size: 32768,
        cpu_count: 8,
        disk_count: 16,
        disk_size: 1024 * 1024,
        nic_count: 8,
        spindle_use: 12,
    };
    InstancePolicy::new(
        vec![PolicyBracket { min, max }],
        min,
        DiskTemplate::ALL.into_iter().collect(),
        DEFAULT_VCPU_RATIO,
        DEFAULT_SPINDLE_RATIO,
    )
    .expect("the built-in policy is consistent")
}

#[cfg(test)]
mod test {
    use super::*;

    fn all_spaces() -> Vec<ParameterSpace> {
        let mut spaces = vec![
            backend_params(),
            node_params(),
            nic_params(),
            instance_spec_params(),
        ];
        spaces.extend(HypervisorKind::ALL.into_iter().map(hypervisor_params));
        spaces.extend(DiskTemplate::ALL.into_iter().map(disk_params));
        spaces
    }

    #[test]
    fn every_built_in_default_revalidates_as_text() {
        // Formatting a default and re-parsing it with the declared type must
        // reproduce the default, for every table in the catalogue.
        for space in all_spaces() {
            for (key, default) in space.defaults() {
                let declared = space.value_type(key).unwrap();
                let reparsed = declared
                    .parse(&format!("{}", default))
                    .unwrap_or_else(|e| {
                        panic!(
                            "default for {} key {:?} fails validation: {}",
                            space.kind(),
                            key,
                            e
                        )
                    });
                assert_eq!(&reparsed, default);
            }
        }
    }

    #[test]
    fn global_keys_are_declared() {
        for space in all_spaces() {
            for key in space.keys() {
                if space.is_global(key) {
                    assert!(space.value_type(key).is_some());
                }
            }
        }
    }

    #[test]
    fn migration_settings_are_global_where_present() {
        for kind in HypervisorKind::ALL {
            let space = hypervisor_params(kind);
            if space.value_type("migration_port").is_some() {
                assert!(
                    space.is_global("migration_port"),
                    "{} migration_port should be cluster-global",
                    kind
                );
                assert!(space.is_global("migration_mode"));
            }
        }
    }

    #[test]
    fn default_policy_standard_spec_is_admissible() {
        let policy = default_instance_policy();
        let admission = policy.evaluate(
            &policy.std(),
            DiskTemplate::Plain,
            None,
        );
        assert!(admission.is_accepted());
    }
}
