// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TOML description of cluster parameter overrides and instance policies.
//!
//! The file format mirrors the engine's scope model: a `[cluster.*]` table
//! per entity kind, optional `[group.<name>.*]` tables layered on top, and a
//! `[policy]` block describing the instance policy. All override values are
//! raw strings; validation happens in the engine when a scope chain is
//! resolved against a parameter space, and in the policy constructor when
//! the `[policy]` block is converted.
//!
//! ```toml
//! [cluster.backend]
//! vcpus = "2"
//! maxmem = "4g"
//!
//! [cluster.hypervisor.kvm]
//! migration_port = "8200"
//!
//! [group.rack1.nic]
//! mode = "routed"
//!
//! [policy]
//! disk-templates = ["plain", "drbd8"]
//! vcpu-ratio = 4.0
//! spindle-ratio = 32.0
//!
//! [policy.std]
//! memory-size = 2048
//! cpu-count = 2
//! disk-count = 1
//! disk-size = 10240
//! nic-count = 1
//! spindle-use = 1
//!
//! [[policy.minmax]]
//! [policy.minmax.min]
//! memory-size = 128
//! # ...
//! [policy.minmax.max]
//! memory-size = 32768
//! # ...
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use corral::params::{Scope, ScopedOverrides};
use corral::policy::{InstancePolicy, PolicyBracket, PolicyError};
use corral_types::{DiskTemplate, HypervisorKind, InstanceSpec};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// A cluster configuration file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub cluster: ScopeTable,

    #[serde(default, rename = "group")]
    pub groups: BTreeMap<String, ScopeTable>,

    #[serde(default)]
    pub policy: Option<PolicyConfig>,
}

impl Config {
    /// The cluster-then-group override chain for backend parameters, in
    /// ascending precedence order, ready for
    /// [`corral::ParameterSpace::resolve_effective`].
    pub fn backend_chain(&self, group: Option<&str>) -> Vec<ScopedOverrides> {
        self.chain(group, |t| &t.backend)
    }

    pub fn node_chain(&self, group: Option<&str>) -> Vec<ScopedOverrides> {
        self.chain(group, |t| &t.node)
    }

    pub fn nic_chain(&self, group: Option<&str>) -> Vec<ScopedOverrides> {
        self.chain(group, |t| &t.nic)
    }

    pub fn hypervisor_chain(
        &self,
        kind: HypervisorKind,
        group: Option<&str>,
    ) -> Vec<ScopedOverrides> {
        self.nested_chain(group, kind.as_str(), |t| &t.hypervisor)
    }

    pub fn disk_chain(
        &self,
        template: DiskTemplate,
        group: Option<&str>,
    ) -> Vec<ScopedOverrides> {
        self.nested_chain(group, template.as_str(), |t| &t.disk)
    }

    fn chain(
        &self,
        group: Option<&str>,
        select: impl Fn(&ScopeTable) -> &BTreeMap<String, String>,
    ) -> Vec<ScopedOverrides> {
        let mut scopes = vec![ScopedOverrides {
            scope: Scope::Cluster,
            values: select(&self.cluster).clone(),
        }];
        if let Some(table) = group.and_then(|g| self.groups.get(g)) {
            scopes.push(ScopedOverrides {
                scope: Scope::NodeGroup,
                values: select(table).clone(),
            });
        }
        scopes
    }

    fn nested_chain(
        &self,
        group: Option<&str>,
        variant: &str,
        select: impl Fn(&ScopeTable) -> &NestedOverrides,
    ) -> Vec<ScopedOverrides> {
        self.chain(group, |t| {
            select(t).get(variant).unwrap_or(&EMPTY_OVERRIDES)
        })
    }
}

static EMPTY_OVERRIDES: BTreeMap<String, String> = BTreeMap::new();

/// Raw overrides keyed by hypervisor kind or disk template name.
pub type NestedOverrides = BTreeMap<String, BTreeMap<String, String>>;

/// The per-entity override tables one scope may carry.
#[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ScopeTable {
    #[serde(default)]
    pub backend: BTreeMap<String, String>,

    #[serde(default)]
    pub node: BTreeMap<String, String>,

    #[serde(default)]
    pub nic: BTreeMap<String, String>,

    #[serde(default)]
    pub hypervisor: NestedOverrides,

    #[serde(default)]
    pub disk: NestedOverrides,
}

/// The `[policy]` block. Brackets and the standard spec reuse the engine's
/// hyphenated dimension names directly.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(rename = "minmax")]
    pub brackets: Vec<BracketConfig>,

    pub std: InstanceSpec,

    /// Omitting the list allows every disk template.
    #[serde(default, rename = "disk-templates")]
    pub disk_templates: Option<Vec<String>>,

    #[serde(default = "default_vcpu_ratio", rename = "vcpu-ratio")]
    pub vcpu_ratio: f64,

    #[serde(default = "default_spindle_ratio", rename = "spindle-ratio")]
    pub spindle_ratio: f64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BracketConfig {
    pub min: InstanceSpec,
    pub max: InstanceSpec,
}

fn default_vcpu_ratio() -> f64 {
    corral::catalog::DEFAULT_VCPU_RATIO
}

fn default_spindle_ratio() -> f64 {
    corral::catalog::DEFAULT_SPINDLE_RATIO
}

impl PolicyConfig {
    /// Converts the block into an engine policy, delegating invariant
    /// checking to the policy constructor.
    pub fn build(&self) -> Result<InstancePolicy, BuildError> {
        let templates = match &self.disk_templates {
            None => DiskTemplate::ALL.into_iter().collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    DiskTemplate::from_str(name).map_err(|_| {
                        BuildError::UnknownDiskTemplate(name.clone())
                    })
                })
                .collect::<Result<_, _>>()?,
        };
        let brackets = self
            .brackets
            .iter()
            .map(|b| PolicyBracket { min: b.min, max: b.max })
            .collect();
        Ok(InstancePolicy::new(
            brackets,
            self.std,
            templates,
            self.vcpu_ratio,
            self.spindle_ratio,
        )?)
    }
}

/// Errors which may be returned when parsing a cluster configuration file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors which may be returned when converting a parsed `[policy]` block.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("unknown disk template {0:?}")]
    UnknownDiskTemplate(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let cfg = toml::from_str::<Config>(&contents)?;
    Ok(cfg)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_can_be_serialized_as_toml() {
        let dummy_config = Config { ..Default::default() };
        let serialized = toml::ser::to_string(&dummy_config).unwrap();
        let deserialized: Config = toml::de::from_str(&serialized).unwrap();
        assert_eq!(dummy_config, deserialized);
    }

    #[test]
    fn parse_scope_tables() {
        let raw = r#"
[cluster.backend]
vcpus = "2"
maxmem = "4g"

[cluster.hypervisor.kvm]
migration_port = "8200"

[group.rack1.backend]
vcpus = "4"

[group.rack1.nic]
mode = "routed"
"#;
        let config: Config = toml::from_str(raw).unwrap();

        let chain = config.backend_chain(Some("rack1"));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].scope, Scope::Cluster);
        assert_eq!(chain[0].values["maxmem"], "4g");
        assert_eq!(chain[1].scope, Scope::NodeGroup);
        assert_eq!(chain[1].values["vcpus"], "4");

        // An unknown group contributes no layer.
        assert_eq!(config.backend_chain(Some("rack9")).len(), 1);

        let chain =
            config.hypervisor_chain(HypervisorKind::Kvm, Some("rack1"));
        assert_eq!(chain[0].values["migration_port"], "8200");
        assert!(chain[1].values.is_empty());

        // The chains feed straight into the engine.
        let space = corral::catalog::backend_params();
        let effective = space
            .resolve_effective(&config.backend_chain(Some("rack1")))
            .unwrap();
        assert_eq!(
            format!("{}", effective["maxmem"]),
            "4g".to_string()
        );
        assert_eq!(format!("{}", effective["vcpus"]), "4".to_string());
    }

    #[test]
    fn parse_policy_block() {
        let raw = r#"
[policy]
disk-templates = ["plain", "drbd8"]
vcpu-ratio = 4.0

[policy.std]
memory-size = 2048
cpu-count = 2
disk-count = 1
disk-size = 10240
nic-count = 1
spindle-use = 1

[[policy.minmax]]
[policy.minmax.min]
memory-size = 128
cpu-count = 1
disk-count = 1
disk-size = 1024
nic-count = 1
spindle-use = 1

[policy.minmax.max]
memory-size = 32768
cpu-count = 8
disk-count = 16
disk-size = 1048576
nic-count = 8
spindle-use = 12
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let policy = config.policy.as_ref().unwrap().build().unwrap();

        assert_eq!(policy.brackets().len(), 1);
        assert_eq!(policy.std().memory_size, 2048);
        assert_eq!(policy.allowed_disk_templates().len(), 2);
        assert_eq!(policy.vcpu_ratio(), 4.0);
        // Left to its default.
        assert_eq!(
            policy.spindle_ratio(),
            corral::catalog::DEFAULT_SPINDLE_RATIO
        );
    }

    #[test]
    fn policy_block_rejects_misspelled_keys() {
        // An underscore where the file format uses a hyphen must fail
        // loudly rather than leave the ratio at its default.
        let raw = r#"
[policy]
vcpu_ratio = 4.0

[policy.std]
memory-size = 128
cpu-count = 1
disk-count = 1
disk-size = 1024
nic-count = 1
spindle-use = 1

[[policy.minmax]]
[policy.minmax.min]
memory-size = 128
cpu-count = 1
disk-count = 1
disk-size = 1024
nic-count = 1
spindle-use = 1

[policy.minmax.max]
memory-size = 32768
cpu-count = 8
disk-count = 16
disk-size = 1048576
nic-count = 8
spindle-use = 12
"#;
        assert!(toml::from_str::<Config>(raw).is_err());
    }

    #[test]
    fn unknown_disk_template_is_rejected() {
        let raw = r#"
[policy]
disk-templates = ["floppy"]

[policy.std]
memory-size = 128
cpu-count = 1
disk-count = 1
disk-size = 1024
nic-count = 1
spindle-use = 1

[[policy.minmax]]
[policy.minmax.min]
memory-size = 128
cpu-count = 1
disk-count = 1
disk-size = 1024
nic-count = 1
spindle-use = 1

[policy.minmax.max]
memory-size = 32768
cpu-count = 8
disk-count = 16
disk-size = 1048576
nic-count = 8
spindle-use = 12
"#;
        let config: Config = toml::from_str(raw).unwrap();
        match config.policy.as_ref().unwrap().build() {
            Err(BuildError::UnknownDiskTemplate(name)) => {
                assert_eq!(name, "floppy");
            }
            other => panic!("expected an unknown template error, got {:?}", other),
        }
    }
}
