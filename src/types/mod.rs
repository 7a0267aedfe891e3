use crate::error::Error;
use byteordered::Endianness;
use derive_more::Display;
use num_enum::{FromPrimitive, IntoPrimitive};

pub type StreamId = u64;

pub type EventId = u64;

/// Timestamp in clock cycles
pub type Timestamp = u64;

pub type EventCount = u64;

pub type SequenceNumber = u64;

pub const CTF_MAGIC_NUMBER: u32 = 0xC1FC1FC1;

/// Byte order of a field type's instances.
///
/// `Native` resolves against the owning trace's byte order at
/// serialization and metadata-rendering time. `Network` is big endian.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
pub enum ByteOrder {
    #[default]
    #[display("native")]
    Native,
    #[display("le")]
    LittleEndian,
    #[display("be")]
    BigEndian,
    #[display("be")]
    Network,
}

impl ByteOrder {
    /// Resolve to a concrete endianness, substituting `native` for
    /// `Native` declarations.
    pub fn endianness(self, native: Endianness) -> Endianness {
        match self {
            ByteOrder::Native => native,
            ByteOrder::LittleEndian => Endianness::Little,
            ByteOrder::BigEndian | ByteOrder::Network => Endianness::Big,
        }
    }

    pub(crate) fn resolve(self, native: ByteOrder) -> ByteOrder {
        match self {
            ByteOrder::Native => native,
            concrete => concrete,
        }
    }
}

/// The preferred base (radix) to use when displaying an integer field
/// type's instances.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub enum DisplayBase {
    Binary,
    Octal,
    #[default]
    Decimal,
    Hexadecimal,
}

impl DisplayBase {
    pub fn radix(self) -> u32 {
        match self {
            DisplayBase::Binary => 2,
            DisplayBase::Octal => 8,
            DisplayBase::Decimal => 10,
            DisplayBase::Hexadecimal => 16,
        }
    }
}

/// Character encoding of string field types, and the encoding hint
/// carried by integer field types.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
pub enum StringEncoding {
    #[default]
    #[display("none")]
    None,
    #[display("UTF8")]
    Utf8,
    #[display("ASCII")]
    Ascii,
}

/// A scalar value carried by the trace environment and by event class
/// attributes.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub enum Value {
    #[display("{_0}")]
    Integer(i64),
    #[display("{_0}")]
    String(String),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Integer(_) => None,
            Value::String(s) => Some(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    IntoPrimitive,
    FromPrimitive,
)]
#[repr(i32)]
pub enum LogLevel {
    #[display("EMERG")]
    Emergency = 0,
    #[display("ALERT")]
    Alert = 1,
    #[display("CRIT")]
    Critical = 2,
    #[display("ERR")]
    Error = 3,
    #[display("WARNING")]
    Warning = 4,
    #[display("NOTICE")]
    Notice = 5,
    #[display("INFO")]
    Info = 6,
    #[display("DEBUG_SYSTEM")]
    DebugSystem = 7,
    #[display("DEBUG_PROGRAM")]
    DebugProgram = 8,
    #[display("DEBUG_PROCESS")]
    DebugProcess = 9,
    #[display("DEBUG_MODULE")]
    DebugModule = 10,
    #[display("DEBUG_UNIT")]
    DebugUnit = 11,
    #[display("DEBUG_FUNCTION")]
    DebugFunction = 12,
    #[display("DEBUG_LINE")]
    DebugLine = 13,
    #[display("DEBUG")]
    Debug = 14,
    #[display("{_0}")]
    #[num_enum(catch_all)]
    Other(i32),
}

/// TSDL reserved keywords, from the CTF 1.8 specification.
/// None of these may be used as a field, event class, stream class, or
/// clock name.
const RESERVED_KEYWORDS: &[&str] = &[
    "align",
    "callsite",
    "const",
    "char",
    "clock",
    "double",
    "enum",
    "env",
    "event",
    "floating_point",
    "float",
    "integer",
    "int",
    "long",
    "short",
    "signed",
    "stream",
    "string",
    "struct",
    "trace",
    "typealias",
    "typedef",
    "unsigned",
    "variant",
    "void",
    "_Bool",
    "_Complex",
    "_Imaginary",
];

/// Reject empty names and TSDL reserved keywords.
pub(crate) fn validate_identifier(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::invalid_argument("empty identifier"));
    }
    if RESERVED_KEYWORDS.contains(&name) {
        return Err(Error::invalid_argument(format!(
            "'{name}' is a reserved TSDL keyword"
        )));
    }
    Ok(())
}
