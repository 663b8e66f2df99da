//! Owning handles over guest objects.
//!
//! The guest C API returns either a *new* reference (the caller owns one
//! reference count) or a *borrowed* one. New references are wrapped in a
//! [`GuestHandle`]; borrowed ones are only ever exposed as `&GuestObject`
//! whose lifetime is tied to the owner they were borrowed from.

use crate::host::InterpreterHost;
use pyo3::ffi;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE_HANDLES: AtomicUsize = AtomicUsize::new(0);

/// An object managed by the guest runtime.
///
/// Only ever seen behind a reference. The host never inspects its internals.
#[repr(transparent)]
pub struct GuestObject(UnsafeCell<ffi::PyObject>);

impl GuestObject {
    /// Borrow a raw guest pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and stay alive for `'a`.
    pub(crate) unsafe fn from_ptr<'a>(ptr: *mut ffi::PyObject) -> &'a GuestObject {
        &*(ptr as *const GuestObject)
    }

    /// Raw pointer for the guest C API. No reference is transferred.
    pub fn as_ptr(&self) -> *mut ffi::PyObject {
        self.0.get()
    }

    /// Current reference count of the object.
    pub fn ref_count(&self) -> isize {
        unsafe { ffi::Py_REFCNT(self.as_ptr()) }
    }
}

impl fmt::Debug for GuestObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestObject({:p})", self.as_ptr())
    }
}

/// Exclusive owner of one reference count on a [`GuestObject`], or empty.
///
/// Handles cannot outlive the [`InterpreterHost`] they came from and cannot
/// cross threads. Dropping a non-empty handle releases exactly one reference.
pub struct GuestHandle<'h> {
    ptr: Option<NonNull<ffi::PyObject>>,
    _host: PhantomData<&'h InterpreterHost>,
}

impl<'h> GuestHandle<'h> {
    /// An empty handle.
    pub fn empty() -> Self {
        Self {
            ptr: None,
            _host: PhantomData,
        }
    }

    /// Adopt a new reference. A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// `raw` must be null or carry one reference count that the caller gives
    /// up, and the interpreter host must outlive `'h`.
    pub unsafe fn from_raw(raw: *mut ffi::PyObject) -> Self {
        let ptr = NonNull::new(raw);
        if ptr.is_some() {
            LIVE_HANDLES.fetch_add(1, Ordering::Relaxed);
        }
        Self {
            ptr,
            _host: PhantomData,
        }
    }

    /// Borrow the raw pointer; null iff empty.
    pub fn get(&self) -> *mut ffi::PyObject {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Borrow the owned object.
    pub fn object(&self) -> Option<&GuestObject> {
        self.ptr
            .map(|p| unsafe { GuestObject::from_ptr(p.as_ptr()) })
    }

    /// Whether the handle owns nothing.
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// Give up ownership without decrementing. The caller now owns the
    /// reference and the handle is empty.
    #[must_use = "the returned reference leaks unless it is decremented"]
    pub fn release(&mut self) -> *mut ffi::PyObject {
        match self.ptr.take() {
            Some(p) => {
                LIVE_HANDLES.fetch_sub(1, Ordering::Relaxed);
                p.as_ptr()
            }
            None => ptr::null_mut(),
        }
    }

    /// Release the owned reference, if any, and leave the handle empty.
    pub fn reset(&mut self) {
        if let Some(p) = self.ptr.take() {
            LIVE_HANDLES.fetch_sub(1, Ordering::Relaxed);
            unsafe { ffi::Py_DecRef(p.as_ptr()) };
        }
    }

    /// Move the reference out, leaving this handle empty.
    pub fn take(&mut self) -> GuestHandle<'h> {
        Self {
            ptr: self.ptr.take(),
            _host: PhantomData,
        }
    }

    /// Number of non-empty handles alive in the process.
    pub fn live_count() -> usize {
        LIVE_HANDLES.load(Ordering::Relaxed)
    }
}

impl Default for GuestHandle<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for GuestHandle<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for GuestHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ptr {
            Some(p) => write!(f, "GuestHandle({:p})", p.as_ptr()),
            None => f.write_str("GuestHandle(empty)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Empty handles never reach the guest runtime, so these run without an
    // interpreter.

    #[test]
    fn test_empty_handle() {
        let mut handle = GuestHandle::empty();
        assert!(handle.is_empty());
        assert!(handle.get().is_null());
        assert!(handle.object().is_none());
        assert!(handle.release().is_null());
        handle.reset();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_null_adoption_is_empty() {
        let handle = unsafe { GuestHandle::from_raw(ptr::null_mut()) };
        assert!(handle.is_empty());
        assert_eq!(format!("{handle:?}"), "GuestHandle(empty)");
    }

    #[test]
    fn test_take_from_empty() {
        let mut handle = GuestHandle::default();
        let taken = handle.take();
        assert!(taken.is_empty());
        assert!(handle.is_empty());
    }
}
