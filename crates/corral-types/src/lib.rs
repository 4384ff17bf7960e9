// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fundamental types shared by other Corral crates.
//!
//! This crate defines the basic vocabulary of the cluster parameter engine:
//! the small lattice of value types every declared parameter is checked
//! against, byte-size quantities with their textual unit notation, disk
//! templates and their storage capabilities, and instance-sizing
//! specifications. It is deliberately free of any engine logic so that the
//! library, configuration, and (future) client crates can all share these
//! types without layering oddities.

use std::fmt::Display;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod disk;
pub mod ispec;

pub use disk::{DiskTemplate, StorageType};
pub use ispec::{InstanceSpec, SpecDimension};

/// The textual sentinel accepted by [`ValueType::MaybeString`] to denote an
/// explicitly absent value. Distinct from the empty string, which is a
/// present-but-empty value.
pub const VALUE_NONE: &str = "none";

/// Errors arising from parsing a raw textual value against a [`ValueType`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("{0:?} is not a boolean (expected true/false/yes/no)")]
    NotBool(String),

    #[error("{0:?} is not an integer")]
    NotInt(String),

    #[error("{0:?} is not a size (expected an integer with an optional m/g/t suffix)")]
    NotSize(String),

    #[error("sizes cannot be negative: {0:?}")]
    NegativeSize(String),
}

/// The type a declared parameter's values must satisfy.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    /// Any text, accepted unchanged.
    String,
    /// Text, or the [`VALUE_NONE`] sentinel denoting an absent value.
    MaybeString,
    /// `true`/`false`, with `yes`/`no` accepted as synonyms.
    Bool,
    /// A byte quantity with an optional binary unit suffix; see [`ByteSize`].
    Size,
    /// An optionally-signed decimal integer.
    Int,
}

impl ValueType {
    /// Validates `raw` against this type, producing the typed value.
    ///
    /// This is a pure function: it neither consults nor mutates any state
    /// outside its arguments.
    pub fn parse(&self, raw: &str) -> Result<ParamValue, ValueError> {
        match self {
            ValueType::String => Ok(ParamValue::String(raw.to_string())),
            ValueType::MaybeString => {
                if raw == VALUE_NONE {
                    Ok(ParamValue::MaybeString(None))
                } else {
                    Ok(ParamValue::MaybeString(Some(raw.to_string())))
                }
            }
            ValueType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(ParamValue::Bool(true)),
                "false" | "no" => Ok(ParamValue::Bool(false)),
                _ => Err(ValueError::NotBool(raw.to_string())),
            },
            ValueType::Size => Ok(ParamValue::Size(raw.parse()?)),
            ValueType::Int => raw
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| ValueError::NotInt(raw.to_string())),
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::MaybeString => "maybe-string",
            ValueType::Bool => "bool",
            ValueType::Size => "size",
            ValueType::Int => "int",
        };
        write!(f, "{}", name)
    }
}

/// A parameter value that has passed validation against its declared
/// [`ValueType`].
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ParamValue {
    String(String),
    MaybeString(Option<String>),
    Bool(bool),
    Size(ByteSize),
    Int(i64),
}

impl ParamValue {
    /// The [`ValueType`] this value satisfies.
    pub fn value_type(&self) -> ValueType {
        match self {
            ParamValue::String(_) => ValueType::String,
            ParamValue::MaybeString(_) => ValueType::MaybeString,
            ParamValue::Bool(_) => ValueType::Bool,
            ParamValue::Size(_) => ValueType::Size,
            ParamValue::Int(_) => ValueType::Int,
        }
    }
}

impl Display for ParamValue {
    /// Formats the value in the textual form [`ValueType::parse`] accepts, so
    /// that every value round-trips through its own display output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{}", s),
            ParamValue::MaybeString(None) => write!(f, "{}", VALUE_NONE),
            ParamValue::MaybeString(Some(s)) => write!(f, "{}", s),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Size(s) => write!(f, "{}", s),
            ParamValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// A byte quantity held as a whole number of mebibytes. Supports conversion
/// from a string formatted as an unsigned integer with an optional
/// case-insensitive unit suffix: `m` (mebibytes, the default), `g`
/// (gibibytes), or `t` (tebibytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, JsonSchema)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn from_mebibytes(mib: u64) -> Self {
        Self(mib)
    }

    pub const fn from_gibibytes(gib: u64) -> Self {
        match gib.checked_mul(1024) {
            Some(mib) => Self(mib),
            None => panic!("gibibyte count overflows the mebibyte range"),
        }
    }

    pub const fn from_tebibytes(tib: u64) -> Self {
        match tib.checked_mul(1024 * 1024) {
            Some(mib) => Self(mib),
            None => panic!("tebibyte count overflows the mebibyte range"),
        }
    }

    #[inline]
    pub fn mebibytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = ValueError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(ValueError::NegativeSize(s.to_string()));
        }

        let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => s.split_at(idx),
            None => (s, ""),
        };

        let magnitude = u64::from_str(digits)
            .map_err(|_| ValueError::NotSize(s.to_string()))?;

        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "m" => 1,
            "g" => 1024,
            "t" => 1024 * 1024,
            _ => return Err(ValueError::NotSize(s.to_string())),
        };

        // A parseable magnitude can still overflow once the unit is applied.
        magnitude
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| ValueError::NotSize(s.to_string()))
    }
}

impl Display for ByteSize {
    /// Formats with the largest unit that divides the quantity evenly, so
    /// that parsing the output reproduces the identical quantity.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const GIB: u64 = 1024;
        const TIB: u64 = 1024 * 1024;
        if self.0 != 0 && self.0 % TIB == 0 {
            write!(f, "{}t", self.0 / TIB)
        } else if self.0 != 0 && self.0 % GIB == 0 {
            write!(f, "{}g", self.0 / GIB)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{}", self).as_str())
    }
}

impl<'d> Deserialize<'d> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

/// The hypervisors instances may run under. Supports conversion from the
/// lowercase names used in configuration data ("kvm", "xen-pvm", "xen-hvm",
/// "lxc").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, JsonSchema)]
pub enum HypervisorKind {
    Kvm,
    XenPvm,
    XenHvm,
    Lxc,
}

impl HypervisorKind {
    pub const ALL: [HypervisorKind; 4] = [
        HypervisorKind::Kvm,
        HypervisorKind::XenPvm,
        HypervisorKind::XenHvm,
        HypervisorKind::Lxc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorKind::Kvm => "kvm",
            HypervisorKind::XenPvm => "xen-pvm",
            HypervisorKind::XenHvm => "xen-hvm",
            HypervisorKind::Lxc => "lxc",
        }
    }
}

impl FromStr for HypervisorKind {
    type Err = std::io::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unknown hypervisor kind {:?}", s),
                )
            })
    }
}

impl Display for HypervisorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for HypervisorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'d> Deserialize<'d> for HypervisorKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

/// The connectivity modes a NIC parameter table may declare.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NicMode {
    Bridged,
    Routed,
    Ovs,
}

impl NicMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NicMode::Bridged => "bridged",
            NicMode::Routed => "routed",
            NicMode::Ovs => "ovs",
        }
    }
}

impl Display for NicMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SIZE_CASES: &[(&str, Result<u64, ()>)] = &[
        ("0", Ok(0)),
        ("128", Ok(128)),
        ("128m", Ok(128)),
        ("128M", Ok(128)),
        ("1g", Ok(1024)),
        ("1G", Ok(1024)),
        ("4t", Ok(4 * 1024 * 1024)),
        ("1 g", Ok(1024)),
        ("18446744073709551615", Ok(u64::MAX)),
        ("18446744073709551615g", Err(())),
        ("18446744073709551615t", Err(())),
        ("18014398509481984g", Err(())),
        ("-1", Err(())),
        ("-1g", Err(())),
        ("1.5g", Err(())),
        ("1k", Err(())),
        ("1gb", Err(())),
        ("g", Err(())),
        ("", Err(())),
        ("lots", Err(())),
    ];

    #[test]
    fn byte_size_from_str() {
        for (input, expected) in SIZE_CASES {
            match (ByteSize::from_str(input), expected) {
                (Ok(actual), Ok(mib)) => assert_eq!(
                    actual.mebibytes(),
                    *mib,
                    "parsing {:?} produced the wrong quantity",
                    input
                ),
                (Err(_), Err(())) => {}
                (actual, _) => {
                    panic!("parsing {:?} produced {:?}", input, actual)
                }
            }
        }
    }

    #[test]
    fn byte_size_round_trips_through_display() {
        for mib in [0, 1, 128, 1024, 1536, 32768, 1024 * 1024, 3 * 1024 * 1024]
        {
            let size = ByteSize::from_mebibytes(mib);
            let reparsed = ByteSize::from_str(&format!("{}", size)).unwrap();
            assert_eq!(size, reparsed);
        }
    }

    #[test]
    fn byte_size_serializes_as_string() {
        use serde_test::{assert_tokens, Token};
        assert_tokens(&ByteSize::from_gibibytes(2), &[Token::Str("2g")]);
        assert_tokens(&ByteSize::from_mebibytes(129), &[Token::Str("129m")]);
    }

    #[test]
    fn bool_parsing_accepts_synonyms() {
        for raw in ["true", "TRUE", "yes", "Yes"] {
            assert_eq!(
                ValueType::Bool.parse(raw),
                Ok(ParamValue::Bool(true)),
                "{:?} should parse as true",
                raw
            );
        }
        for raw in ["false", "no", "NO"] {
            assert_eq!(ValueType::Bool.parse(raw), Ok(ParamValue::Bool(false)));
        }
        for raw in ["1", "on", "truee", ""] {
            assert!(ValueType::Bool.parse(raw).is_err());
        }
    }

    #[test]
    fn int_parsing() {
        assert_eq!(ValueType::Int.parse("42"), Ok(ParamValue::Int(42)));
        assert_eq!(ValueType::Int.parse("-7"), Ok(ParamValue::Int(-7)));
        assert_eq!(ValueType::Int.parse("+3"), Ok(ParamValue::Int(3)));
        assert!(ValueType::Int.parse("4.5").is_err());
        assert!(ValueType::Int.parse("four").is_err());
    }

    #[test]
    fn maybe_string_distinguishes_none_from_empty() {
        assert_eq!(
            ValueType::MaybeString.parse(VALUE_NONE),
            Ok(ParamValue::MaybeString(None))
        );
        assert_eq!(
            ValueType::MaybeString.parse(""),
            Ok(ParamValue::MaybeString(Some(String::new())))
        );
        assert_eq!(
            ValueType::MaybeString.parse("eth0"),
            Ok(ParamValue::MaybeString(Some("eth0".to_string())))
        );
    }

    #[test]
    fn param_values_round_trip_through_display() {
        let values = [
            ParamValue::String("bridged".to_string()),
            ParamValue::MaybeString(None),
            ParamValue::MaybeString(Some("vlan7".to_string())),
            ParamValue::Bool(true),
            ParamValue::Size(ByteSize::from_gibibytes(1)),
            ParamValue::Int(-12),
        ];
        for value in values {
            let reparsed =
                value.value_type().parse(&format!("{}", value)).unwrap();
            assert_eq!(value, reparsed);
        }
    }

    #[test]
    fn hypervisor_kind_from_str() {
        assert_eq!(
            HypervisorKind::from_str("kvm").unwrap(),
            HypervisorKind::Kvm
        );
        assert_eq!(
            HypervisorKind::from_str("xen-pvm").unwrap(),
            HypervisorKind::XenPvm
        );
        assert!(HypervisorKind::from_str("qemu").is_err());
    }
}
