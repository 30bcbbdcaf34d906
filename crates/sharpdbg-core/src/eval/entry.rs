//! Evaluation stack entries.

use smallvec::SmallVec;

use crate::runtime::{Handle, Value};
use crate::types::{MethodToken, ModuleId};

/// What is needed to write a property-backed location.
#[derive(Debug)]
pub struct SetterData
{
    /// Object owning the property, `None` for static properties.
    pub receiver: Option<Handle<dyn Value>>,
    pub module: ModuleId,
    pub setter: MethodToken,
}

impl SetterData
{
    #[must_use]
    pub fn share(&self) -> Self
    {
        Self {
            receiver: self.receiver.as_ref().map(Handle::share),
            module: self.module,
            setter: self.setter,
        }
    }
}

/// Whether (and how) the entry's value can be assigned.
///
/// Setter metadata exists exactly when the location is editable and
/// property-backed; the enum makes any other combination unrepresentable.
#[derive(Debug, Default)]
pub enum Editability
{
    #[default]
    ReadOnly,
    /// Local, argument, field or array element: written in place.
    Slot,
    /// Property with a setter: written by invoking the setter.
    Property(SetterData),
}

impl Editability
{
    #[must_use]
    pub const fn is_editable(&self) -> bool
    {
        !matches!(self, Editability::ReadOnly)
    }

    #[must_use]
    pub const fn setter(&self) -> Option<&SetterData>
    {
        match self {
            Editability::Property(data) => Some(data),
            _ => None,
        }
    }
}

/// Whether [`EvalStackEntry::reset`] also clears the literal flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetLiteral
{
    Yes,
    No,
}

/// One slot of the evaluation stack.
///
/// Holds either a dotted identifier path waiting to be resolved, a resolved
/// value, or both (a resolved receiver plus member names still to apply).
#[derive(Debug, Default)]
pub struct EvalStackEntry
{
    /// Unresolved identifier components, applied left to right.
    pub identifiers: SmallVec<[String; 4]>,
    pub value: Option<Handle<dyn Value>>,
    /// Set after a null-conditional access saw null; later member, index and
    /// call instructions leave the entry alone.
    pub prevent_binding: bool,
    pub literal: bool,
    pub editability: Editability,
}

impl EvalStackEntry
{
    #[must_use]
    pub fn identifier(name: impl Into<String>) -> Self
    {
        let mut entry = Self::default();
        entry.identifiers.push(name.into());
        entry
    }

    #[must_use]
    pub fn resolved(value: Handle<dyn Value>, editability: Editability) -> Self
    {
        Self {
            value: Some(value),
            editability,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn literal(value: Handle<dyn Value>) -> Self
    {
        Self {
            value: Some(value),
            literal: true,
            ..Self::default()
        }
    }

    /// Clear the entry for reuse as an operation result.
    pub fn reset(&mut self, literal: ResetLiteral)
    {
        self.identifiers.clear();
        self.value = None;
        self.prevent_binding = false;
        self.editability = Editability::ReadOnly;
        if literal == ResetLiteral::Yes {
            self.literal = false;
        }
    }

    /// Dotted form of the pending identifier path, for diagnostics.
    #[must_use]
    pub fn path(&self) -> String
    {
        self.identifiers.join(".")
    }
}
