// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parameter spaces and effective-value resolution.
//!
//! A [`ParameterSpace`] is the immutable declaration of the legal parameters
//! for one entity kind: each key's value type, the subset of keys that are
//! cluster-global, and a complete set of typed defaults. Resolution layers
//! per-scope override maps on top of the defaults, validating every override
//! along the way, and always yields a value for every declared key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use corral_types::{
    DiskTemplate, HypervisorKind, ParamValue, ValueError, ValueType,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The entity kinds that carry parameter tables. Hypervisor and disk tables
/// vary per hypervisor kind and disk template; the rest are flat.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntityKind {
    Hypervisor(HypervisorKind),
    Backend,
    Node,
    Nic,
    Disk(DiskTemplate),
    InstanceSpec,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Hypervisor(hv) => write!(f, "{} hypervisor", hv),
            EntityKind::Backend => write!(f, "backend"),
            EntityKind::Node => write!(f, "node"),
            EntityKind::Nic => write!(f, "nic"),
            EntityKind::Disk(t) => write!(f, "{} disk", t),
            EntityKind::InstanceSpec => write!(f, "instance spec"),
        }
    }
}

/// A precedence level at which parameter overrides may be supplied, from
/// widest to narrowest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Deserialize,
         Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Cluster,
    NodeGroup,
    Object,
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scope::Cluster => "cluster",
            Scope::NodeGroup => "node group",
            Scope::Object => "object",
        };
        write!(f, "{}", name)
    }
}

/// One scope's worth of raw overrides, as handed over by the configuration
/// store or a request payload.
#[derive(Clone, Debug)]
pub struct ScopedOverrides {
    pub scope: Scope,
    pub values: BTreeMap<String, String>,
}

impl ScopedOverrides {
    pub fn new<K, V>(
        scope: Scope,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            scope,
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Errors detected while constructing a [`ParameterSpace`]. These indicate
/// inconsistent table data, not bad caller input.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SpaceError {
    #[error("default supplied for undeclared parameter {0:?}")]
    UndeclaredDefault(String),

    #[error("default for parameter {key:?} is a {actual}, not a {declared}")]
    IllTypedDefault { key: String, declared: ValueType, actual: ValueType },

    #[error("declared parameter {0:?} has no default")]
    MissingDefault(String),

    #[error("global parameter {0:?} is not declared")]
    UndeclaredGlobal(String),
}

/// Errors returned to callers whose overrides fail validation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("unknown parameter {key:?}")]
    UnknownParameter { key: String },

    #[error("invalid value for {expected} parameter {key:?}: {source}")]
    InvalidValueType {
        key: String,
        expected: ValueType,
        #[source]
        source: ValueError,
    },

    #[error(
        "parameter {key:?} holds one value cluster-wide and cannot be \
         overridden at {scope} scope"
    )]
    GlobalParameterOverride { key: String, scope: Scope },
}

/// The immutable parameter declaration for one entity kind.
#[derive(Clone, Debug)]
pub struct ParameterSpace {
    kind: EntityKind,
    types: BTreeMap<String, ValueType>,
    globals: BTreeSet<String>,
    defaults: BTreeMap<String, ParamValue>,
}

impl ParameterSpace {
    /// Builds a space from its declaration tables, checking that the global
    /// set and the defaults are consistent with the type table. Every
    /// declared key must carry a well-typed default so that resolution can
    /// always produce a complete map.
    pub fn new(
        kind: EntityKind,
        types: BTreeMap<String, ValueType>,
        globals: BTreeSet<String>,
        defaults: BTreeMap<String, ParamValue>,
    ) -> Result<Self, SpaceError> {
        for key in &globals {
            if !types.contains_key(key) {
                return Err(SpaceError::UndeclaredGlobal(key.clone()));
            }
        }
        for (key, value) in &defaults {
            let declared = types
                .get(key)
                .ok_or_else(|| SpaceError::UndeclaredDefault(key.clone()))?;
            if value.value_type() != *declared {
                return Err(SpaceError::IllTypedDefault {
                    key: key.clone(),
                    declared: *declared,
                    actual: value.value_type(),
                });
            }
        }
        for key in types.keys() {
            if !defaults.contains_key(key) {
                return Err(SpaceError::MissingDefault(key.clone()));
            }
        }
        Ok(Self { kind, types, globals, defaults })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The declared type of `key`, if `key` is part of this space.
    pub fn value_type(&self, key: &str) -> Option<ValueType> {
        self.types.get(key).copied()
    }

    pub fn is_global(&self, key: &str) -> bool {
        self.globals.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn defaults(&self) -> &BTreeMap<String, ParamValue> {
        &self.defaults
    }

    /// Resolves the effective value of every declared parameter, starting
    /// from the defaults and applying `scopes` in ascending precedence
    /// order. Each override is checked against the declaration before it is
    /// applied; the first failure aborts resolution, so callers never see a
    /// partially-updated map.
    pub fn resolve_effective(
        &self,
        scopes: &[ScopedOverrides],
    ) -> Result<BTreeMap<String, ParamValue>, ResolveError> {
        let mut effective = self.defaults.clone();
        for layer in scopes {
            for (key, raw) in &layer.values {
                let declared = self.types.get(key).ok_or_else(|| {
                    ResolveError::UnknownParameter { key: key.clone() }
                })?;
                let value = declared.parse(raw).map_err(|e| {
                    ResolveError::InvalidValueType {
                        key: key.clone(),
                        expected: *declared,
                        source: e,
                    }
                })?;
                if self.globals.contains(key) && layer.scope != Scope::Cluster
                {
                    return Err(ResolveError::GlobalParameterOverride {
                        key: key.clone(),
                        scope: layer.scope,
                    });
                }
                effective.insert(key.clone(), value);
            }
        }
        Ok(effective)
    }
}
