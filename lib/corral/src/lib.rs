// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parameter-schema validation and instance-policy admission for a cluster
//! of virtual machine instances.
//!
//! The engine is split into three parts:
//!
//! - [`params`] declares parameter spaces (the legal keys for an entity kind
//!   and each key's value type, plus typed defaults) and resolves effective
//!   values across layered override scopes.
//! - [`catalog`] carries the built-in parameter spaces for hypervisors,
//!   backends, nodes, NICs, disks, and instance-spec dimensions, along with
//!   the built-in instance policy.
//! - [`policy`] decides whether a candidate instance specification is
//!   admissible under a node group's sizing policy.
//!
//! Every table here is an immutable value object: a configuration change
//! builds a new table rather than editing one in place, so concurrent
//! readers of a snapshot never observe a partial update. The surrounding
//! configuration store, RPC transport, and daemon plumbing are all outside
//! this crate; they hand in raw key/value data and receive typed maps or
//! admission decisions back.

pub mod catalog;
pub mod params;
pub mod policy;

pub use params::{
    EntityKind, ParameterSpace, ResolveError, Scope, ScopedOverrides,
};
pub use policy::{
    Admission, Admitter, Decision, GroupUtilization, InstancePolicy,
    PolicyBracket, PolicyError, RejectReason,
};
