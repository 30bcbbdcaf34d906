//! Compiled expression programs.
//!
//! The expression compiler (outside this crate) turns source text into a flat
//! instruction list. The stack machine only cares about each instruction's
//! stack effect, never about the source syntax.

use crate::error::EvalError;
use crate::types::PrimitiveValue;

/// Unary operators delegated to the operator service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp
{
    Plus,
    Negate,
    LogicalNot,
    BitwiseNot,
}

/// Binary operators delegated to the operator service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp
{
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LeftShift,
    RightShift,
    BitwiseAnd,
    BitwiseOr,
    ExclusiveOr,
    LogicalAnd,
    LogicalOr,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

/// One stack machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction
{
    /// Push a new entry holding the unresolved identifier.
    Identifier(String),
    /// Append a member name to the top entry's identifier path.
    MemberAccess(String),
    /// `?.` / `?[`: resolve the top entry; if it is null, stop binding it.
    ConditionalAccess,
    /// Push `this` of the current frame.
    This,
    /// Push a literal value.
    Literal(PrimitiveValue),
    /// Replace the top entry with the operator result.
    Unary(UnaryOp),
    /// Pop the right operand, replace the left one with the result.
    Binary(BinaryOp),
    /// Convert the top entry to the named primitive type (`int`, `System.Int64`, ...).
    Cast(String),
    /// Pop `arguments` index entries, then index into the top entry.
    Index
    {
        arguments: usize
    },
    /// Pop `arguments` entries, then call the method named by the last
    /// identifier of the top entry.
    Call
    {
        arguments: usize
    },
}

/// A compiled expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackProgram
{
    pub instructions: Vec<Instruction>,
}

impl StackProgram
{
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self
    {
        Self { instructions }
    }
}

impl FromIterator<Instruction> for StackProgram
{
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self
    {
        Self::new(iter.into_iter().collect())
    }
}

/// Source text to stack program.
pub trait ExpressionCompiler: Send + Sync
{
    /// Compile `expression`; on failure the error carries the compiler's
    /// diagnostic text (`EvalError::Compile`).
    fn compile(&self, expression: &str) -> Result<StackProgram, EvalError>;
}
