//! # Symbol Service
//!
//! Debug-information queries consumed by breakpoint resolution and identifier
//! lookup. The symbol reader itself (portable PDB parsing, delta PDBs after a
//! hot reload) lives outside this crate; this module only defines what it has
//! to answer.
//!
//! Lookups distinguish "this module has no symbols" ([`SymbolLookup::NoSymbols`])
//! from "symbols were searched and nothing matched" (`Found` with an empty
//! list). Breakpoint managers rely on that to decide whether a module counts as
//! scanned.

use crate::error::Result;
use crate::runtime::Module;
use crate::types::MethodToken;

/// Line number the compiler emits for `#line hidden` sequence points.
pub const HIDDEN_LINE: u32 = 0x00fe_efee;

/// Answer of a symbol query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolLookup<T>
{
    /// The module has no symbols loaded; the question could not be asked.
    NoSymbols,
    /// Symbols were searched; the payload may be empty.
    Found(T),
}

impl<T> SymbolLookup<T>
{
    pub fn found(self) -> Option<T>
    {
        match self {
            SymbolLookup::Found(value) => Some(value),
            SymbolLookup::NoSymbols => None,
        }
    }
}

/// A method known to the symbol reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSymbol
{
    pub token: MethodToken,
    /// Namespace- and type-qualified name, e.g. `App.Program.Main`.
    pub qualified_name: String,
    /// Parameter list as written in source, e.g. `(int, string)`.
    pub signature: String,
}

/// Sequence point: maps a source range to an IL offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint
{
    pub start_line: u32,
    pub end_line: u32,
    pub il_offset: u32,
}

impl SequencePoint
{
    #[must_use]
    pub const fn is_hidden(&self) -> bool
    {
        self.start_line == HIDDEN_LINE
    }
}

/// Source extent of one method and its sequence points in IL order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRange
{
    pub method: MethodToken,
    pub start_line: u32,
    pub end_line: u32,
    pub sequence_points: Vec<SequencePoint>,
}

impl MethodRange
{
    #[must_use]
    pub const fn contains_line(&self, line: u32) -> bool
    {
        self.start_line <= line && line <= self.end_line
    }

    #[must_use]
    pub const fn line_span(&self) -> u32
    {
        self.end_line.saturating_sub(self.start_line)
    }
}

/// Named local variable slot with its IL scope `[il_start, il_end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable
{
    pub index: u32,
    pub name: String,
    pub il_start: u32,
    pub il_end: u32,
}

impl LocalVariable
{
    #[must_use]
    pub const fn in_scope(&self, il_offset: u32) -> bool
    {
        self.il_start <= il_offset && il_offset < self.il_end
    }
}

/// Debug information queries for loaded modules.
pub trait SymbolService: Send + Sync
{
    /// Whether symbols are loaded for the module (user code for just-my-code).
    fn has_symbols(&self, module: &dyn Module) -> bool;

    /// Methods whose qualified name equals `name` or ends with `.{name}`.
    fn find_methods(&self, module: &dyn Module, name: &str) -> Result<SymbolLookup<Vec<MethodSymbol>>>;

    /// Methods declared in `file` whose source extent contains `line`.
    fn methods_for_line(&self, module: &dyn Module, file: &str, line: u32) -> Result<SymbolLookup<Vec<MethodRange>>>;

    /// Local variable names of a method with their scopes.
    fn local_variables(&self, module: &dyn Module, method: MethodToken) -> Result<Vec<LocalVariable>>;

    /// Declared parameter names of a method, in order, without `this`.
    fn parameter_names(&self, module: &dyn Module, method: MethodToken) -> Result<Vec<String>>;
}
