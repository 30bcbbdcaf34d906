//! Tests for identifiers and value shapes

use sharpdbg_core::types::{ElementType, EvalFlags, MethodToken, PrimitiveValue, ThreadId};

#[test]
fn test_thread_id_from_u64()
{
    let thread = ThreadId::from(4242);
    assert_eq!(thread.raw(), 4242);
    assert_eq!(thread.to_string(), "4242");
}

#[test]
fn test_method_token_equality()
{
    let a = MethodToken::from(0x0600_0001);
    let b = MethodToken(0x0600_0001);
    let c = MethodToken(0x0600_0002);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a < c);
}

#[test]
fn test_eval_flags_combine()
{
    let flags = EvalFlags::NONE | EvalFlags::NO_FUNC_EVAL;
    assert!(flags.contains(EvalFlags::NO_FUNC_EVAL));
    assert!(flags.contains(EvalFlags::NONE));
    assert!(!EvalFlags::NONE.contains(EvalFlags::NO_FUNC_EVAL));
    assert_eq!(flags.bits(), 1);
}

#[test]
fn test_primitive_display()
{
    assert_eq!(PrimitiveValue::Bool(true).to_string(), "true");
    assert_eq!(PrimitiveValue::Char(u16::from(b'a')).to_string(), "'a'");
    assert_eq!(PrimitiveValue::String("hi".to_string()).to_string(), "\"hi\"");
    assert_eq!(PrimitiveValue::Null.to_string(), "null");
}

#[test]
fn test_every_primitive_has_a_core_class()
{
    for element_type in ElementType::PRIMITIVES {
        let name = element_type.core_type_name();
        assert!(name.is_some_and(|name| name.starts_with("System.")), "{element_type:?}");
    }
    assert_eq!(ElementType::Class.core_type_name(), None);
}
