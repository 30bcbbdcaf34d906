//! # Types
//!
//! Identifiers and value shapes shared by the breakpoint and evaluation layers.
//!
//! Tokens are metadata table indices as reported by the runtime; they are
//! opaque to this crate apart from equality and display.

use std::fmt;
use std::ops::BitOr;

macro_rules! token_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $inner);

        impl $name
        {
            #[must_use]
            pub const fn raw(self) -> $inner
            {
                self.0
            }
        }

        impl From<$inner> for $name
        {
            fn from(value: $inner) -> Self
            {
                Self(value)
            }
        }
    };
}

token_type!(
    /// Runtime-assigned thread identifier of a debuggee thread.
    ThreadId(u64)
);
token_type!(
    /// Identity of a loaded module (one per module load, not per file).
    ModuleId(u64)
);
token_type!(
    /// Identity of any runtime-owned object, used for handle comparison.
    ObjectId(u64)
);
token_type!(
    /// `MethodDef` metadata token.
    MethodToken(u32)
);
token_type!(
    /// `FieldDef` metadata token.
    FieldToken(u32)
);
token_type!(
    /// `TypeDef` metadata token.
    TypeToken(u32)
);

impl fmt::Display for MethodToken
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Display for TypeToken
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Stack frame depth, 0 being the innermost frame of a thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameLevel(pub u32);

/// Runtime element type of a value.
///
/// Mirrors the runtime's element type enumeration closely enough to pick a
/// predefined class for literal construction and to drive implicit conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType
{
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    IntPtr,
    UIntPtr,
    String,
    /// Boxed or unboxed value type (including `System.Decimal`).
    ValueType,
    Class,
    Object,
    Array,
}

impl ElementType
{
    /// Element types that have a predefined class in the core library.
    pub const PRIMITIVES: [ElementType; 14] = [
        ElementType::Boolean,
        ElementType::Char,
        ElementType::I1,
        ElementType::U1,
        ElementType::I2,
        ElementType::U2,
        ElementType::I4,
        ElementType::U4,
        ElementType::I8,
        ElementType::U8,
        ElementType::R4,
        ElementType::R8,
        ElementType::IntPtr,
        ElementType::UIntPtr,
    ];

    #[must_use]
    pub const fn is_primitive(self) -> bool
    {
        !matches!(
            self,
            ElementType::Void
                | ElementType::String
                | ElementType::ValueType
                | ElementType::Class
                | ElementType::Object
                | ElementType::Array
        )
    }

    /// Whether values of this type live behind a reference (and may be null).
    #[must_use]
    pub const fn is_reference(self) -> bool
    {
        matches!(
            self,
            ElementType::String | ElementType::Class | ElementType::Object | ElementType::Array
        )
    }

    /// Fully qualified core library name of the class backing a primitive.
    #[must_use]
    pub const fn core_type_name(self) -> Option<&'static str>
    {
        Some(match self {
            ElementType::Void => "System.Void",
            ElementType::Boolean => "System.Boolean",
            ElementType::Char => "System.Char",
            ElementType::I1 => "System.SByte",
            ElementType::U1 => "System.Byte",
            ElementType::I2 => "System.Int16",
            ElementType::U2 => "System.UInt16",
            ElementType::I4 => "System.Int32",
            ElementType::U4 => "System.UInt32",
            ElementType::I8 => "System.Int64",
            ElementType::U8 => "System.UInt64",
            ElementType::R4 => "System.Single",
            ElementType::R8 => "System.Double",
            ElementType::IntPtr => "System.IntPtr",
            ElementType::UIntPtr => "System.UIntPtr",
            ElementType::String => "System.String",
            ElementType::ValueType | ElementType::Class | ElementType::Object | ElementType::Array => return None,
        })
    }
}

/// Plain data read out of (or written into) a runtime value.
///
/// This is what crosses the boundary to the operator service: the stack machine
/// reads operands into `PrimitiveValue`s and materializes results back into
/// runtime values.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue
{
    Bool(bool),
    /// UTF-16 code unit.
    Char(u16),
    I1(i8),
    U1(u8),
    I2(i16),
    U2(u16),
    I4(i32),
    U4(u32),
    I8(i64),
    U8(u64),
    R4(f32),
    R8(f64),
    /// Decimal literal text, parsed by the runtime's `System.Decimal`.
    Decimal(String),
    String(String),
    Null,
}

impl PrimitiveValue
{
    #[must_use]
    pub fn element_type(&self) -> ElementType
    {
        match self {
            PrimitiveValue::Bool(_) => ElementType::Boolean,
            PrimitiveValue::Char(_) => ElementType::Char,
            PrimitiveValue::I1(_) => ElementType::I1,
            PrimitiveValue::U1(_) => ElementType::U1,
            PrimitiveValue::I2(_) => ElementType::I2,
            PrimitiveValue::U2(_) => ElementType::U2,
            PrimitiveValue::I4(_) => ElementType::I4,
            PrimitiveValue::U4(_) => ElementType::U4,
            PrimitiveValue::I8(_) => ElementType::I8,
            PrimitiveValue::U8(_) => ElementType::U8,
            PrimitiveValue::R4(_) => ElementType::R4,
            PrimitiveValue::R8(_) => ElementType::R8,
            PrimitiveValue::Decimal(_) => ElementType::ValueType,
            PrimitiveValue::String(_) => ElementType::String,
            PrimitiveValue::Null => ElementType::Class,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool>
    {
        match self {
            PrimitiveValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            PrimitiveValue::Bool(v) => write!(f, "{v}"),
            PrimitiveValue::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "'{c}'"),
                None => write!(f, "'\\u{v:04x}'"),
            },
            PrimitiveValue::I1(v) => write!(f, "{v}"),
            PrimitiveValue::U1(v) => write!(f, "{v}"),
            PrimitiveValue::I2(v) => write!(f, "{v}"),
            PrimitiveValue::U2(v) => write!(f, "{v}"),
            PrimitiveValue::I4(v) => write!(f, "{v}"),
            PrimitiveValue::U4(v) => write!(f, "{v}"),
            PrimitiveValue::I8(v) => write!(f, "{v}"),
            PrimitiveValue::U8(v) => write!(f, "{v}"),
            PrimitiveValue::R4(v) => write!(f, "{v}"),
            PrimitiveValue::R8(v) => write!(f, "{v}"),
            PrimitiveValue::Decimal(v) => write!(f, "{v}"),
            PrimitiveValue::String(v) => write!(f, "\"{v}\""),
            PrimitiveValue::Null => f.write_str("null"),
        }
    }
}

/// Flags controlling what an evaluation may do to the debuggee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EvalFlags(u32);

impl EvalFlags
{
    pub const NONE: EvalFlags = EvalFlags(0);
    /// Forbid running managed code (getters, calls, operator overloads).
    pub const NO_FUNC_EVAL: EvalFlags = EvalFlags(0x1);

    #[must_use]
    pub const fn bits(self) -> u32
    {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: EvalFlags) -> bool
    {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EvalFlags
{
    type Output = EvalFlags;

    fn bitor(self, rhs: Self) -> Self::Output
    {
        EvalFlags(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_token_display_is_hex()
    {
        assert_eq!(MethodToken(0x0600_0012).to_string(), "0x06000012");
        assert_eq!(TypeToken(0x0200_0002).to_string(), "0x02000002");
    }

    #[test]
    fn test_primitive_element_types()
    {
        assert_eq!(PrimitiveValue::I4(1).element_type(), ElementType::I4);
        assert_eq!(PrimitiveValue::Null.element_type(), ElementType::Class);
        assert!(ElementType::R8.is_primitive());
        assert!(!ElementType::String.is_primitive());
        assert!(ElementType::String.is_reference());
        assert_eq!(ElementType::U1.core_type_name(), Some("System.Byte"));
        assert_eq!(ElementType::Class.core_type_name(), None);
    }

    #[test]
    fn test_eval_flags()
    {
        let flags = EvalFlags::NONE | EvalFlags::NO_FUNC_EVAL;
        assert!(flags.contains(EvalFlags::NO_FUNC_EVAL));
        assert!(!EvalFlags::NONE.contains(EvalFlags::NO_FUNC_EVAL));
        assert_eq!(flags.bits(), 1);
    }

    #[test]
    fn test_char_display()
    {
        assert_eq!(PrimitiveValue::Char(u16::from(b'a')).to_string(), "'a'");
        assert_eq!(PrimitiveValue::String("x".into()).to_string(), "\"x\"");
    }
}
