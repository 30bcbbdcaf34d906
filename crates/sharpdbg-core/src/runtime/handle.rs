//! # Runtime Handles
//!
//! Owned wrapper around reference-counted runtime API objects.
//!
//! Every object the runtime hands out (threads, frames, modules, classes,
//! values, native breakpoints) carries one runtime reference that must be
//! released exactly once. [`Handle`] owns that reference:
//!
//! - Dropping the handle releases it, on every exit path including `?`.
//! - It is not `Clone`; taking another reference is an explicit
//!   [`Handle::share`], which asks the runtime for a new reference first.
//! - [`Handle::into_raw`] gives the reference away without releasing it.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use sharpdbg_core::runtime::mock::{MockRuntime, ValueSpec};
//! use sharpdbg_core::types::PrimitiveValue;
//!
//! let runtime = MockRuntime::new();
//! let value = runtime.value(ValueSpec::primitive(PrimitiveValue::I4(7)));
//! {
//!     let handle = runtime.handle_to(&value);
//!     let second = handle.share();
//!     assert!(handle.same_object(&*second));
//!     assert_eq!(runtime.outstanding_refs(), 2);
//! }
//! assert_eq!(runtime.outstanding_refs(), 0);
//! # let _ = Arc::strong_count(&value);
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::RuntimeObject;

/// One owned runtime reference to an object of type `T`.
pub struct Handle<T: ?Sized + RuntimeObject>
{
    // Only `None` transiently inside `into_raw`.
    object: Option<Arc<T>>,
}

impl<T: ?Sized + RuntimeObject> Handle<T>
{
    /// Take ownership of a reference the runtime already counted for us.
    ///
    /// Runtime implementations call this when returning a freshly acquired
    /// object; it does not add a reference.
    pub fn from_acquired(object: Arc<T>) -> Self
    {
        Self { object: Some(object) }
    }

    /// Acquire a second, independently released reference to the same object.
    #[must_use]
    pub fn share(&self) -> Self
    {
        let object = self.arc();
        object.add_ref();
        Self {
            object: Some(Arc::clone(object)),
        }
    }

    /// Give the reference away without releasing it.
    ///
    /// The caller becomes responsible for the matching `release`.
    #[must_use]
    pub fn into_raw(mut self) -> Arc<T>
    {
        match self.object.take() {
            Some(object) => object,
            None => unreachable!("handle emptied before into_raw"),
        }
    }

    /// Whether both refer to the same runtime object.
    pub fn same_object(&self, other: &T) -> bool
    {
        self.object_id() == other.object_id()
    }

    fn arc(&self) -> &Arc<T>
    {
        match &self.object {
            Some(object) => object,
            None => unreachable!("handle used after into_raw"),
        }
    }
}

impl<T: ?Sized + RuntimeObject> Deref for Handle<T>
{
    type Target = T;

    fn deref(&self) -> &T
    {
        self.arc()
    }
}

impl<T: ?Sized + RuntimeObject> Drop for Handle<T>
{
    fn drop(&mut self)
    {
        if let Some(object) = self.object.take() {
            object.release();
        }
    }
}

impl<T: ?Sized + RuntimeObject> fmt::Debug for Handle<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.object {
            Some(object) => f.debug_tuple("Handle").field(&object.object_id()).finish(),
            None => f.write_str("Handle(<detached>)"),
        }
    }
}

/// Store a freshly acquired handle into a slot that must be empty.
///
/// Overwriting a held reference is a bookkeeping bug (the caller believed the
/// slot was free); debug builds assert on it, release builds still release the
/// previous reference through `Drop`.
pub fn acquire_into<T: ?Sized + RuntimeObject>(slot: &mut Option<Handle<T>>, handle: Handle<T>)
{
    debug_assert!(slot.is_none(), "handle slot already owns {slot:?}");
    *slot = Some(handle);
}
