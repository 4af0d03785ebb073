//! Attribute names, values and their display formats.

use std::fmt::{self, Display};

use crate::formats::h264::H264Attribute;
use crate::formats::mpeg_system::SystemAttribute;
use crate::formats::mpeg2_video::Mpeg2VideoAttribute;
use crate::result::Named;

/// Name of a parsed field.
///
/// Every format has a closed set of field names. `Raw` covers the few places
/// where the name is only known at run time (SEI payload types, stream table
/// entries).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeName {
    Mpeg2Video(Mpeg2VideoAttribute),
    H264(H264Attribute),
    MpegSystem(SystemAttribute),
    Raw(String),
}

impl Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeName::Mpeg2Video(a) => f.write_str(a.name()),
            AttributeName::H264(a) => f.write_str(a.name()),
            AttributeName::MpegSystem(a) => f.write_str(a.name()),
            AttributeName::Raw(s) => f.write_str(s),
        }
    }
}

impl From<Mpeg2VideoAttribute> for AttributeName {
    fn from(a: Mpeg2VideoAttribute) -> Self {
        AttributeName::Mpeg2Video(a)
    }
}

impl From<H264Attribute> for AttributeName {
    fn from(a: H264Attribute) -> Self {
        AttributeName::H264(a)
    }
}

impl From<SystemAttribute> for AttributeName {
    fn from(a: SystemAttribute) -> Self {
        AttributeName::MpegSystem(a)
    }
}

impl From<String> for AttributeName {
    fn from(s: String) -> Self {
        AttributeName::Raw(s)
    }
}

/// Raw value of a parsed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Text(String),
    /// A byte range of the input, e.g. a parameter set handed to a renderer.
    DataRange { offset: u64, length: u64 },
}

impl AttributeValue {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            AttributeValue::Bool(b) => Some(b as u64),
            AttributeValue::Unsigned(v) => Some(v),
            AttributeValue::Signed(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            AttributeValue::Bool(b) => Some(b as i64),
            AttributeValue::Unsigned(v) => i64::try_from(v).ok(),
            AttributeValue::Signed(v) => Some(v),
            _ => None,
        }
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Unsigned(v) => write!(f, "{v}"),
            AttributeValue::Signed(v) => write!(f, "{v}"),
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::DataRange { offset, length } => {
                write!(f, "[{offset:#X}, +{length}]")
            }
        }
    }
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for AttributeValue {
            fn from(v: $t) -> Self {
                AttributeValue::Unsigned(v as u64)
            }
        })*
    };
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for AttributeValue {
            fn from(v: $t) -> Self {
                AttributeValue::Signed(v as i64)
            }
        })*
    };
}

impl_from_unsigned!(u8, u16, u32, u64, usize);
impl_from_signed!(i8, i16, i32, i64);

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

/// Display format of a field, optionally with a validity predicate.
pub trait ValueFormat {
    fn display(&self, value: &AttributeValue) -> String {
        value.to_string()
    }

    fn is_valid(&self, _value: &AttributeValue) -> bool {
        true
    }
}

/// Plain decimal display, always valid.
pub struct Plain;

impl ValueFormat for Plain {}

/// Hexadecimal display.
pub struct Hex;

impl ValueFormat for Hex {
    fn display(&self, value: &AttributeValue) -> String {
        match value.as_u64() {
            Some(v) => format!("{v:#X}"),
            None => value.to_string(),
        }
    }
}

/// Reserved or marker bits: valid only when the value equals the mandated pattern.
pub struct Reserved(pub u64);

/// A single marker bit that must be one.
pub const MARKER_BIT: Reserved = Reserved(1);

impl ValueFormat for Reserved {
    fn is_valid(&self, value: &AttributeValue) -> bool {
        value.as_u64() == Some(self.0)
    }
}

/// Valid for any value except the forbidden one.
pub struct Forbidden(pub u64);

impl ValueFormat for Forbidden {
    fn is_valid(&self, value: &AttributeValue) -> bool {
        value.as_u64() != Some(self.0)
    }
}

/// Valid inside an inclusive range.
pub struct InRange(pub i64, pub i64);

impl ValueFormat for InRange {
    fn is_valid(&self, value: &AttributeValue) -> bool {
        value.as_i64().is_some_and(|v| (self.0..=self.1).contains(&v))
    }
}

/// Code table indexed by value. `None` entries and values past the end are reserved.
pub struct Lookup(pub &'static [Option<&'static str>]);

impl Lookup {
    fn entry(&self, value: &AttributeValue) -> Option<&'static str> {
        let index = usize::try_from(value.as_u64()?).ok()?;
        self.0.get(index).copied().flatten()
    }
}

impl ValueFormat for Lookup {
    fn display(&self, value: &AttributeValue) -> String {
        match self.entry(value) {
            Some(label) => format!("{value} ({label})"),
            None => format!("{value} (reserved)"),
        }
    }

    fn is_valid(&self, value: &AttributeValue) -> bool {
        self.entry(value).is_some()
    }
}

/// A parsed field attached to a result node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: AttributeName,
    pub value: AttributeValue,
    pub display: String,
    pub valid: bool,
}

impl Attribute {
    pub fn new(name: AttributeName, value: AttributeValue) -> Self {
        Self::formatted(name, value, &Plain)
    }

    pub fn formatted(name: AttributeName, value: AttributeValue, format: &dyn ValueFormat) -> Self {
        Self {
            display: format.display(&value),
            valid: format.is_valid(&value),
            name,
            value,
        }
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.display)?;
        if !self.valid {
            f.write_str(" [invalid]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASPECT: Lookup = Lookup(&[None, Some("square"), Some("4:3")]);

    #[test]
    fn reserved_bits() {
        let a = Attribute::formatted("reserved".to_owned().into(), 0x7Fu8.into(), &Reserved(0x7F));
        assert!(a.valid);
        let a = Attribute::formatted("reserved".to_owned().into(), 0x7Eu8.into(), &Reserved(0x7F));
        assert!(!a.valid);
        assert_eq!(a.to_string(), "reserved = 126 [invalid]");
    }

    #[test]
    fn lookup_tables() {
        assert!(ASPECT.is_valid(&2u8.into()));
        assert_eq!(ASPECT.display(&2u8.into()), "2 (4:3)");
        assert!(!ASPECT.is_valid(&0u8.into()));
        assert!(!ASPECT.is_valid(&9u8.into()));
        assert_eq!(ASPECT.display(&9u8.into()), "9 (reserved)");
    }

    #[test]
    fn ranges_and_hex() {
        assert!(InRange(-26, 25).is_valid(&(-26i32).into()));
        assert!(!InRange(-26, 25).is_valid(&26i32.into()));
        assert!(!Forbidden(0).is_valid(&0u32.into()));
        assert_eq!(Hex.display(&0xB3u8.into()), "0xB3");
    }
}
