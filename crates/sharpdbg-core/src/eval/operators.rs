//! # Operator Service
//!
//! Unary/binary operators and conversions on primitive data.
//!
//! The stack machine never does arithmetic itself: it reads operands out of the
//! debuggee, hands them to an [`OperatorEvaluator`], and writes the result back
//! as a runtime value. [`NumericOperators`] implements the C# rules for the
//! built-in numeric types, `bool`, `char` and `string`.

use crate::error::EvalError;
use crate::eval::program::{BinaryOp, UnaryOp};
use crate::types::{ElementType, PrimitiveValue};

/// How strict a conversion is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind
{
    /// Widening only.
    Implicit,
    /// Implicit conversion of a constant: narrowing is allowed when the value fits.
    Constant,
    /// Cast: any numeric conversion, truncating on overflow.
    Explicit,
}

/// Operator and conversion semantics of the debuggee language.
pub trait OperatorEvaluator: Send + Sync
{
    fn unary(&self, op: UnaryOp, operand: &PrimitiveValue) -> Result<PrimitiveValue, EvalError>;

    fn binary(&self, op: BinaryOp, lhs: &PrimitiveValue, rhs: &PrimitiveValue) -> Result<PrimitiveValue, EvalError>;

    fn convert(&self, value: &PrimitiveValue, target: ElementType, kind: ConversionKind) -> Result<PrimitiveValue, EvalError>;
}

/// Built-in C# operator semantics with checked arithmetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericOperators;

#[derive(Debug, Clone, Copy)]
enum Num
{
    Int(i128),
    Float(f64),
}

fn type_name(value: &PrimitiveValue) -> String
{
    value.element_type().core_type_name().unwrap_or("object").to_string()
}

fn mismatch(from: &PrimitiveValue, to: ElementType) -> EvalError
{
    EvalError::TypeMismatch {
        from: type_name(from),
        to: to.core_type_name().unwrap_or("object").to_string(),
    }
}

fn unsupported(op: impl std::fmt::Debug, lhs: &PrimitiveValue, rhs: Option<&PrimitiveValue>) -> EvalError
{
    match rhs {
        Some(rhs) => EvalError::Operator(format!(
            "Operator {op:?} cannot be applied to operands of type '{}' and '{}'",
            type_name(lhs),
            type_name(rhs)
        )),
        None => EvalError::Operator(format!("Operator {op:?} cannot be applied to operand of type '{}'", type_name(lhs))),
    }
}

fn number(value: &PrimitiveValue) -> Option<Num>
{
    Some(match value {
        PrimitiveValue::Char(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::I1(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::U1(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::I2(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::U2(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::I4(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::U4(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::I8(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::U8(v) => Num::Int(i128::from(*v)),
        PrimitiveValue::R4(v) => Num::Float(f64::from(*v)),
        PrimitiveValue::R8(v) => Num::Float(*v),
        _ => return None,
    })
}

/// Integral value into `target`, `None` when out of range.
fn fit(value: i128, target: ElementType) -> Option<PrimitiveValue>
{
    Some(match target {
        ElementType::Char => PrimitiveValue::Char(u16::try_from(value).ok()?),
        ElementType::I1 => PrimitiveValue::I1(i8::try_from(value).ok()?),
        ElementType::U1 => PrimitiveValue::U1(u8::try_from(value).ok()?),
        ElementType::I2 => PrimitiveValue::I2(i16::try_from(value).ok()?),
        ElementType::U2 => PrimitiveValue::U2(u16::try_from(value).ok()?),
        ElementType::I4 => PrimitiveValue::I4(i32::try_from(value).ok()?),
        ElementType::U4 => PrimitiveValue::U4(u32::try_from(value).ok()?),
        ElementType::I8 => PrimitiveValue::I8(i64::try_from(value).ok()?),
        ElementType::U8 => PrimitiveValue::U8(u64::try_from(value).ok()?),
        #[allow(clippy::cast_precision_loss)]
        ElementType::R4 => PrimitiveValue::R4(value as f32),
        #[allow(clippy::cast_precision_loss)]
        ElementType::R8 => PrimitiveValue::R8(value as f64),
        _ => return None,
    })
}

/// Integral value into `target`, keeping the low bits (unchecked cast).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn wrap(value: i128, target: ElementType) -> Option<PrimitiveValue>
{
    Some(match target {
        ElementType::Char => PrimitiveValue::Char(value as u16),
        ElementType::I1 => PrimitiveValue::I1(value as i8),
        ElementType::U1 => PrimitiveValue::U1(value as u8),
        ElementType::I2 => PrimitiveValue::I2(value as i16),
        ElementType::U2 => PrimitiveValue::U2(value as u16),
        ElementType::I4 => PrimitiveValue::I4(value as i32),
        ElementType::U4 => PrimitiveValue::U4(value as u32),
        ElementType::I8 => PrimitiveValue::I8(value as i64),
        ElementType::U8 => PrimitiveValue::U8(value as u64),
        ElementType::R4 => PrimitiveValue::R4(value as f32),
        ElementType::R8 => PrimitiveValue::R8(value as f64),
        _ => return None,
    })
}

/// C# implicit numeric conversions (identity included).
fn widens(from: ElementType, to: ElementType) -> bool
{
    use ElementType::{Char, I1, I2, I4, I8, R4, R8, U1, U2, U4, U8};

    from == to
        || matches!(
            (from, to),
            (I1, I2 | I4 | I8 | R4 | R8)
                | (U1, I2 | U2 | I4 | U4 | I8 | U8 | R4 | R8)
                | (I2, I4 | I8 | R4 | R8)
                | (U2, I4 | U4 | I8 | U8 | R4 | R8)
                | (I4, I8 | R4 | R8)
                | (U4, I8 | U8 | R4 | R8)
                | (I8 | U8, R4 | R8)
                | (Char, U2 | I4 | U4 | I8 | U8 | R4 | R8)
                | (R4, R8)
        )
}

/// Result type of binary numeric promotion, `None` when C# rejects the pair.
fn promote(lhs: ElementType, rhs: ElementType) -> Option<ElementType>
{
    use ElementType::{I1, I2, I4, I8, R4, R8, U4, U8};

    let signed_small = |t: ElementType| matches!(t, I1 | I2 | I4);
    Some(if lhs == R8 || rhs == R8 {
        R8
    } else if lhs == R4 || rhs == R4 {
        R4
    } else if lhs == U8 || rhs == U8 {
        if signed_small(lhs) || signed_small(rhs) || lhs == I8 || rhs == I8 {
            return None;
        }
        U8
    } else if lhs == I8 || rhs == I8 {
        I8
    } else if (lhs == U4 && signed_small(rhs)) || (rhs == U4 && signed_small(lhs)) {
        I8
    } else if lhs == U4 || rhs == U4 {
        U4
    } else {
        I4
    })
}

/// Unary numeric promotion.
fn promote_unary(operand: ElementType) -> ElementType
{
    match operand {
        ElementType::U4 | ElementType::I8 | ElementType::U8 | ElementType::R4 | ElementType::R8 => operand,
        _ => ElementType::I4,
    }
}

/// Text used when a value takes part in string concatenation.
fn concat_text(value: &PrimitiveValue) -> String
{
    match value {
        PrimitiveValue::String(text) => text.clone(),
        PrimitiveValue::Null => String::new(),
        PrimitiveValue::Char(c) => char::from_u32(u32::from(*c)).map(String::from).unwrap_or_default(),
        PrimitiveValue::Bool(true) => "True".to_string(),
        PrimitiveValue::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

fn compare(op: BinaryOp, ordering: Option<std::cmp::Ordering>) -> Option<bool>
{
    use std::cmp::Ordering::{Equal, Greater, Less};

    // NaN compares false for everything except `!=`.
    let Some(ordering) = ordering else {
        return Some(op == BinaryOp::NotEqual);
    };
    Some(match op {
        BinaryOp::Equal => ordering == Equal,
        BinaryOp::NotEqual => ordering != Equal,
        BinaryOp::Less => ordering == Less,
        BinaryOp::LessOrEqual => ordering != Greater,
        BinaryOp::Greater => ordering == Greater,
        BinaryOp::GreaterOrEqual => ordering != Less,
        _ => return None,
    })
}

impl NumericOperators
{
    fn integral(op: BinaryOp, lhs: i128, rhs: i128, result: ElementType) -> Result<PrimitiveValue, EvalError>
    {
        let bits = match result {
            ElementType::I8 | ElementType::U8 => 64,
            _ => 32,
        };
        let value = match op {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Subtract => lhs - rhs,
            BinaryOp::Multiply => lhs * rhs,
            BinaryOp::Divide | BinaryOp::Modulo if rhs == 0 => {
                return Err(EvalError::Operator("Attempted to divide by zero.".to_string()));
            }
            BinaryOp::Divide => lhs / rhs,
            // `MinValue % -1` overflows like the matching division.
            BinaryOp::Modulo => {
                fit(lhs / rhs, result).ok_or(EvalError::Overflow)?;
                lhs % rhs
            }
            BinaryOp::BitwiseAnd => lhs & rhs,
            BinaryOp::BitwiseOr => lhs | rhs,
            BinaryOp::ExclusiveOr => lhs ^ rhs,
            BinaryOp::LeftShift => return wrap(lhs << (rhs & (bits - 1)), result).ok_or(EvalError::Overflow),
            BinaryOp::RightShift => lhs >> (rhs & (bits - 1)),
            _ => return Err(EvalError::Operator(format!("Operator {op:?} is not an integral operator"))),
        };
        fit(value, result).ok_or(EvalError::Overflow)
    }

    fn floating(op: BinaryOp, lhs: f64, rhs: f64, result: ElementType) -> Result<PrimitiveValue, EvalError>
    {
        let value = match op {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Subtract => lhs - rhs,
            BinaryOp::Multiply => lhs * rhs,
            BinaryOp::Divide => lhs / rhs,
            BinaryOp::Modulo => lhs % rhs,
            _ => return Err(EvalError::Operator(format!("Operator {op:?} cannot be applied to floating point operands"))),
        };
        #[allow(clippy::cast_possible_truncation)]
        Ok(if result == ElementType::R4 {
            PrimitiveValue::R4(value as f32)
        } else {
            PrimitiveValue::R8(value)
        })
    }
}

impl OperatorEvaluator for NumericOperators
{
    fn unary(&self, op: UnaryOp, operand: &PrimitiveValue) -> Result<PrimitiveValue, EvalError>
    {
        if let (UnaryOp::LogicalNot, PrimitiveValue::Bool(value)) = (op, operand) {
            return Ok(PrimitiveValue::Bool(!value));
        }
        let result = promote_unary(operand.element_type());
        match (op, number(operand)) {
            (UnaryOp::Plus, Some(Num::Int(v))) => fit(v, result).ok_or(EvalError::Overflow),
            (UnaryOp::Plus, Some(Num::Float(_))) => Ok(operand.clone()),
            (UnaryOp::Negate, Some(Num::Int(_))) if result == ElementType::U8 => Err(unsupported(op, operand, None)),
            // -uint promotes to long.
            (UnaryOp::Negate, Some(Num::Int(v))) if result == ElementType::U4 => fit(-v, ElementType::I8).ok_or(EvalError::Overflow),
            (UnaryOp::Negate, Some(Num::Int(v))) => fit(-v, result).ok_or(EvalError::Overflow),
            (UnaryOp::Negate, Some(Num::Float(_))) => match operand {
                PrimitiveValue::R4(v) => Ok(PrimitiveValue::R4(-v)),
                PrimitiveValue::R8(v) => Ok(PrimitiveValue::R8(-v)),
                _ => Err(unsupported(op, operand, None)),
            },
            (UnaryOp::BitwiseNot, Some(Num::Int(v))) => wrap(!v, result).ok_or_else(|| unsupported(op, operand, None)),
            _ => Err(unsupported(op, operand, None)),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &PrimitiveValue, rhs: &PrimitiveValue) -> Result<PrimitiveValue, EvalError>
    {
        if matches!(lhs, PrimitiveValue::Decimal(_)) || matches!(rhs, PrimitiveValue::Decimal(_)) {
            return Err(EvalError::Operator("Decimal operators are not supported".to_string()));
        }

        match (lhs, rhs) {
            (PrimitiveValue::String(_), _) | (_, PrimitiveValue::String(_)) if op == BinaryOp::Add => {
                return Ok(PrimitiveValue::String(concat_text(lhs) + &concat_text(rhs)));
            }
            (PrimitiveValue::String(a), PrimitiveValue::String(b)) => {
                return compare(op, Some(a.cmp(b)))
                    .filter(|_| matches!(op, BinaryOp::Equal | BinaryOp::NotEqual))
                    .map(PrimitiveValue::Bool)
                    .ok_or_else(|| unsupported(op, lhs, Some(rhs)));
            }
            (PrimitiveValue::Null, PrimitiveValue::Null | PrimitiveValue::String(_))
            | (PrimitiveValue::String(_), PrimitiveValue::Null) => {
                let equal = lhs == rhs;
                return match op {
                    BinaryOp::Equal => Ok(PrimitiveValue::Bool(equal)),
                    BinaryOp::NotEqual => Ok(PrimitiveValue::Bool(!equal)),
                    _ => Err(unsupported(op, lhs, Some(rhs))),
                };
            }
            (PrimitiveValue::Bool(a), PrimitiveValue::Bool(b)) => {
                return match op {
                    BinaryOp::LogicalAnd | BinaryOp::BitwiseAnd => Ok(PrimitiveValue::Bool(*a && *b)),
                    BinaryOp::LogicalOr | BinaryOp::BitwiseOr => Ok(PrimitiveValue::Bool(*a || *b)),
                    BinaryOp::ExclusiveOr | BinaryOp::NotEqual => Ok(PrimitiveValue::Bool(a != b)),
                    BinaryOp::Equal => Ok(PrimitiveValue::Bool(a == b)),
                    _ => Err(unsupported(op, lhs, Some(rhs))),
                };
            }
            _ => {}
        }

        let (Some(a), Some(b)) = (number(lhs), number(rhs)) else {
            return Err(unsupported(op, lhs, Some(rhs)));
        };

        if matches!(op, BinaryOp::LeftShift | BinaryOp::RightShift) {
            let result = promote_unary(lhs.element_type());
            return match (a, b) {
                (Num::Int(a), Num::Int(b)) if result != ElementType::R4 && result != ElementType::R8 => {
                    Self::integral(op, a, b, result)
                }
                _ => Err(unsupported(op, lhs, Some(rhs))),
            };
        }

        let result = promote(lhs.element_type(), rhs.element_type()).ok_or_else(|| unsupported(op, lhs, Some(rhs)))?;

        let is_comparison = matches!(
            op,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessOrEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterOrEqual
        );

        match (a, b) {
            (Num::Int(a), Num::Int(b)) if is_comparison => compare(op, Some(a.cmp(&b)))
                .map(PrimitiveValue::Bool)
                .ok_or_else(|| unsupported(op, lhs, Some(rhs))),
            (Num::Int(a), Num::Int(b)) => {
                if matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
                    return Err(unsupported(op, lhs, Some(rhs)));
                }
                Self::integral(op, a, b, result)
            }
            (a, b) => {
                #[allow(clippy::cast_precision_loss)]
                let to_f64 = |n: Num| match n {
                    Num::Int(v) => v as f64,
                    Num::Float(v) => v,
                };
                let (a, b) = (to_f64(a), to_f64(b));
                if is_comparison {
                    compare(op, a.partial_cmp(&b))
                        .map(PrimitiveValue::Bool)
                        .ok_or_else(|| unsupported(op, lhs, Some(rhs)))
                } else {
                    Self::floating(op, a, b, result)
                }
            }
        }
    }

    fn convert(&self, value: &PrimitiveValue, target: ElementType, kind: ConversionKind) -> Result<PrimitiveValue, EvalError>
    {
        let source = value.element_type();
        match (value, target) {
            (PrimitiveValue::Null, t) if t.is_reference() => return Ok(PrimitiveValue::Null),
            (PrimitiveValue::String(_), ElementType::String | ElementType::Object) => return Ok(value.clone()),
            (PrimitiveValue::Bool(_), ElementType::Boolean) => return Ok(value.clone()),
            (PrimitiveValue::Decimal(_), ElementType::ValueType) => return Ok(value.clone()),
            _ => {}
        }

        let Some(n) = number(value) else {
            return Err(mismatch(value, target));
        };
        if !target.is_primitive() || target == ElementType::Boolean {
            return Err(mismatch(value, target));
        }
        let target = match target {
            ElementType::IntPtr => ElementType::I8,
            ElementType::UIntPtr => ElementType::U8,
            other => other,
        };

        match kind {
            ConversionKind::Implicit if !widens(source, target) => Err(mismatch(value, target)),
            ConversionKind::Constant if !widens(source, target) => match n {
                Num::Int(v) => fit(v, target).ok_or_else(|| mismatch(value, target)),
                Num::Float(_) => Err(mismatch(value, target)),
            },
            ConversionKind::Implicit | ConversionKind::Constant => match n {
                Num::Int(v) => fit(v, target).ok_or(EvalError::Overflow),
                #[allow(clippy::cast_possible_truncation)]
                Num::Float(v) => Ok(match target {
                    ElementType::R4 => PrimitiveValue::R4(v as f32),
                    _ => PrimitiveValue::R8(v),
                }),
            },
            ConversionKind::Explicit => match n {
                Num::Int(v) => wrap(v, target).ok_or_else(|| mismatch(value, target)),
                #[allow(clippy::cast_possible_truncation)]
                Num::Float(v) => match target {
                    ElementType::R4 => Ok(PrimitiveValue::R4(v as f32)),
                    ElementType::R8 => Ok(PrimitiveValue::R8(v)),
                    // Saturating float to integer, NaN becomes zero.
                    _ => wrap(v.trunc() as i128, target).ok_or_else(|| mismatch(value, target)),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const OPS: NumericOperators = NumericOperators;

    #[test]
    fn test_int_addition_promotes_small_types()
    {
        let result = OPS.binary(BinaryOp::Add, &PrimitiveValue::U1(200), &PrimitiveValue::I2(100)).unwrap();
        assert_eq!(result, PrimitiveValue::I4(300));
    }

    #[test]
    fn test_checked_overflow()
    {
        let err = OPS
            .binary(BinaryOp::Add, &PrimitiveValue::I4(i32::MAX), &PrimitiveValue::I4(1))
            .unwrap_err();
        assert_eq!(err, EvalError::Overflow);
    }

    #[test]
    fn test_uint_and_int_promote_to_long()
    {
        let result = OPS.binary(BinaryOp::Subtract, &PrimitiveValue::U4(1), &PrimitiveValue::I4(2)).unwrap();
        assert_eq!(result, PrimitiveValue::I8(-1));
    }

    #[test]
    fn test_ulong_with_signed_is_rejected()
    {
        assert!(matches!(
            OPS.binary(BinaryOp::Add, &PrimitiveValue::U8(1), &PrimitiveValue::I4(1)),
            Err(EvalError::Operator(_))
        ));
    }

    #[test]
    fn test_divide_by_zero()
    {
        let err = OPS.binary(BinaryOp::Divide, &PrimitiveValue::I4(1), &PrimitiveValue::I4(0)).unwrap_err();
        assert!(err.to_string().contains("divide by zero"));
    }

    #[test]
    fn test_min_value_remainder_overflows()
    {
        let err = OPS.binary(BinaryOp::Modulo, &PrimitiveValue::I4(i32::MIN), &PrimitiveValue::I4(-1)).unwrap_err();
        assert_eq!(err, EvalError::Overflow);
        let err = OPS.binary(BinaryOp::Modulo, &PrimitiveValue::I8(i64::MIN), &PrimitiveValue::I8(-1)).unwrap_err();
        assert_eq!(err, EvalError::Overflow);
        assert_eq!(
            OPS.binary(BinaryOp::Modulo, &PrimitiveValue::I4(-7), &PrimitiveValue::I4(-1)).unwrap(),
            PrimitiveValue::I4(0)
        );
        assert_eq!(
            OPS.binary(BinaryOp::Modulo, &PrimitiveValue::I4(-7), &PrimitiveValue::I4(3)).unwrap(),
            PrimitiveValue::I4(-1)
        );
    }

    #[test]
    fn test_float_arithmetic_and_comparison()
    {
        assert_eq!(
            OPS.binary(BinaryOp::Multiply, &PrimitiveValue::R8(1.5), &PrimitiveValue::I4(2)).unwrap(),
            PrimitiveValue::R8(3.0)
        );
        assert_eq!(
            OPS.binary(BinaryOp::Less, &PrimitiveValue::R4(1.0), &PrimitiveValue::I8(2)).unwrap(),
            PrimitiveValue::Bool(true)
        );
        assert_eq!(
            OPS.binary(BinaryOp::Equal, &PrimitiveValue::R8(f64::NAN), &PrimitiveValue::R8(f64::NAN)).unwrap(),
            PrimitiveValue::Bool(false)
        );
    }

    #[test]
    fn test_string_concatenation()
    {
        let result = OPS.binary(BinaryOp::Add, &PrimitiveValue::String("n=".into()), &PrimitiveValue::I4(5)).unwrap();
        assert_eq!(result, PrimitiveValue::String("n=5".into()));
        let result = OPS.binary(BinaryOp::Add, &PrimitiveValue::Bool(true), &PrimitiveValue::String("!".into())).unwrap();
        assert_eq!(result, PrimitiveValue::String("True!".into()));
    }

    #[test]
    fn test_string_equality_and_null()
    {
        assert_eq!(
            OPS.binary(BinaryOp::Equal, &PrimitiveValue::String("a".into()), &PrimitiveValue::String("a".into())).unwrap(),
            PrimitiveValue::Bool(true)
        );
        assert_eq!(
            OPS.binary(BinaryOp::NotEqual, &PrimitiveValue::String("a".into()), &PrimitiveValue::Null).unwrap(),
            PrimitiveValue::Bool(true)
        );
        assert!(OPS
            .binary(BinaryOp::Less, &PrimitiveValue::String("a".into()), &PrimitiveValue::String("b".into()))
            .is_err());
    }

    #[test]
    fn test_logical_operators()
    {
        assert_eq!(
            OPS.binary(BinaryOp::LogicalAnd, &PrimitiveValue::Bool(true), &PrimitiveValue::Bool(false)).unwrap(),
            PrimitiveValue::Bool(false)
        );
        assert_eq!(OPS.unary(UnaryOp::LogicalNot, &PrimitiveValue::Bool(false)).unwrap(), PrimitiveValue::Bool(true));
        assert!(OPS.binary(BinaryOp::LogicalOr, &PrimitiveValue::I4(1), &PrimitiveValue::I4(0)).is_err());
    }

    #[test]
    fn test_shift_masks_count()
    {
        assert_eq!(
            OPS.binary(BinaryOp::LeftShift, &PrimitiveValue::I4(1), &PrimitiveValue::I4(33)).unwrap(),
            PrimitiveValue::I4(2)
        );
        assert_eq!(
            OPS.binary(BinaryOp::RightShift, &PrimitiveValue::I8(-8), &PrimitiveValue::I4(1)).unwrap(),
            PrimitiveValue::I8(-4)
        );
    }

    #[test]
    fn test_unary_negation()
    {
        assert_eq!(OPS.unary(UnaryOp::Negate, &PrimitiveValue::U1(3)).unwrap(), PrimitiveValue::I4(-3));
        assert_eq!(OPS.unary(UnaryOp::Negate, &PrimitiveValue::U4(3)).unwrap(), PrimitiveValue::I8(-3));
        assert_eq!(OPS.unary(UnaryOp::Negate, &PrimitiveValue::I4(i32::MIN)).unwrap_err(), EvalError::Overflow);
        assert!(OPS.unary(UnaryOp::Negate, &PrimitiveValue::U8(1)).is_err());
        assert_eq!(OPS.unary(UnaryOp::BitwiseNot, &PrimitiveValue::I4(0)).unwrap(), PrimitiveValue::I4(-1));
    }

    #[test]
    fn test_decimal_is_unsupported()
    {
        assert!(OPS
            .binary(BinaryOp::Add, &PrimitiveValue::Decimal("1.5".into()), &PrimitiveValue::I4(1))
            .is_err());
    }

    #[test]
    fn test_implicit_conversion_widens_only()
    {
        assert_eq!(
            OPS.convert(&PrimitiveValue::I4(5), ElementType::I8, ConversionKind::Implicit).unwrap(),
            PrimitiveValue::I8(5)
        );
        assert!(matches!(
            OPS.convert(&PrimitiveValue::I4(5), ElementType::U1, ConversionKind::Implicit),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(OPS.convert(&PrimitiveValue::R8(1.0), ElementType::R4, ConversionKind::Implicit).is_err());
    }

    #[test]
    fn test_constant_conversion_narrows_when_fitting()
    {
        assert_eq!(
            OPS.convert(&PrimitiveValue::I4(200), ElementType::U1, ConversionKind::Constant).unwrap(),
            PrimitiveValue::U1(200)
        );
        assert!(OPS.convert(&PrimitiveValue::I4(300), ElementType::U1, ConversionKind::Constant).is_err());
    }

    #[test]
    fn test_explicit_conversion_truncates()
    {
        assert_eq!(
            OPS.convert(&PrimitiveValue::I4(300), ElementType::U1, ConversionKind::Explicit).unwrap(),
            PrimitiveValue::U1(44)
        );
        assert_eq!(
            OPS.convert(&PrimitiveValue::R8(-2.7), ElementType::I4, ConversionKind::Explicit).unwrap(),
            PrimitiveValue::I4(-2)
        );
    }

    #[test]
    fn test_reference_conversions()
    {
        assert_eq!(
            OPS.convert(&PrimitiveValue::Null, ElementType::String, ConversionKind::Implicit).unwrap(),
            PrimitiveValue::Null
        );
        assert!(OPS.convert(&PrimitiveValue::I4(1), ElementType::String, ConversionKind::Implicit).is_err());
        assert!(OPS.convert(&PrimitiveValue::Bool(true), ElementType::I4, ConversionKind::Explicit).is_err());
    }
}
