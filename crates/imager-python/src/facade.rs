//! Marshalling facade between host values and guest objects.
//!
//! Every operation that yields a new guest reference returns a
//! [`GuestHandle`]; an empty handle means the operation failed and the guest's
//! per-thread error slot describes why. Check it right away with
//! [`InterpreterHost::take_error`], [`InterpreterHost::print_error`] or
//! [`InterpreterHost::check`]. Borrowed guest references are returned as
//! `&GuestObject` tied to their owner and never wrapped in a handle; tuple
//! slots are the exception, since a slot can be overwritten while its old
//! occupant is still in use, so [`InterpreterHost::tuple_item`] hands out an
//! owned reference.
//!
//! A tuple from [`InterpreterHost::make_tuple`] starts with unset slots. Guest
//! code must never see one, so calls, attribute lookups and `repr` reject such
//! tuples (nested ones included) with a `ValueError`.
//!
//! All operations run on the thread holding the guest interpreter lock, which
//! `&InterpreterHost` guarantees.

use crate::error::{FailureKind, GuestError};
use crate::handle::{GuestHandle, GuestObject};
use crate::host::{utf8_of, InterpreterHost};
use libc::wchar_t;
use pyo3::ffi;
use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::ptr;
use tracing::debug;

/// Owned host wide-character string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WideString(Vec<wchar_t>);

impl WideString {
    /// Wrap raw wide-character units.
    pub fn from_units(units: Vec<wchar_t>) -> Self {
        Self(units)
    }

    /// The wide-character units, without terminator.
    pub fn as_units(&self) -> &[wchar_t] {
        &self.0
    }

    /// Number of wide-character units.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the string has no units.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode into a host string, replacing invalid units.
    #[cfg(not(windows))]
    pub fn to_string_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&u| char::from_u32(u as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    /// Decode into a host string, replacing invalid units.
    #[cfg(windows)]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }

    pub(crate) fn as_nul_terminated(&self) -> Vec<wchar_t> {
        let mut units = Vec::with_capacity(self.0.len() + 1);
        units.extend_from_slice(&self.0);
        units.push(0);
        units
    }
}

#[cfg(not(windows))]
impl From<&str> for WideString {
    fn from(s: &str) -> Self {
        Self(s.chars().map(|c| c as u32 as wchar_t).collect())
    }
}

#[cfg(windows)]
impl From<&str> for WideString {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

impl fmt::Display for WideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Host values that can be copied into a new guest object.
pub trait IntoGuest {
    /// Create the guest object. Empty on failure.
    fn into_guest(self, host: &InterpreterHost) -> GuestHandle<'_>;
}

impl IntoGuest for i64 {
    fn into_guest(self, _host: &InterpreterHost) -> GuestHandle<'_> {
        unsafe { GuestHandle::from_raw(ffi::PyLong_FromLongLong(self)) }
    }
}

impl IntoGuest for &WideString {
    fn into_guest(self, _host: &InterpreterHost) -> GuestHandle<'_> {
        let units = self.as_units();
        unsafe {
            GuestHandle::from_raw(ffi::PyUnicode_FromWideChar(
                units.as_ptr(),
                units.len() as ffi::Py_ssize_t,
            ))
        }
    }
}

impl IntoGuest for &str {
    fn into_guest(self, _host: &InterpreterHost) -> GuestHandle<'_> {
        unsafe {
            GuestHandle::from_raw(ffi::PyUnicode_FromStringAndSize(
                self.as_ptr() as *const c_char,
                self.len() as ffi::Py_ssize_t,
            ))
        }
    }
}

impl IntoGuest for &[u8] {
    fn into_guest(self, _host: &InterpreterHost) -> GuestHandle<'_> {
        unsafe {
            GuestHandle::from_raw(ffi::PyBytes_FromStringAndSize(
                self.as_ptr() as *const c_char,
                self.len() as ffi::Py_ssize_t,
            ))
        }
    }
}

/// Host values that can be extracted from a guest object.
///
/// `'a` is the lifetime of the source object; borrowed extractions such as
/// `&[u8]` cannot outlive it.
pub trait FromGuest<'a>: Sized {
    /// Extract the value. `None` leaves a conversion error in the guest's
    /// error slot.
    fn from_guest(host: &InterpreterHost, object: &'a GuestObject) -> Option<Self>;
}

impl<'a> FromGuest<'a> for i64 {
    fn from_guest(_host: &InterpreterHost, object: &'a GuestObject) -> Option<Self> {
        let value = unsafe { ffi::PyLong_AsLongLong(object.as_ptr()) };
        if value == -1 && unsafe { !ffi::PyErr_Occurred().is_null() } {
            return None;
        }
        Some(value)
    }
}

impl<'a> FromGuest<'a> for WideString {
    fn from_guest(_host: &InterpreterHost, object: &'a GuestObject) -> Option<Self> {
        let mut size: ffi::Py_ssize_t = 0;
        let buffer = unsafe { ffi::PyUnicode_AsWideCharString(object.as_ptr(), &mut size) };
        if buffer.is_null() {
            return None;
        }

        // The buffer belongs to the guest allocator; copy and free it here.
        let units = unsafe { std::slice::from_raw_parts(buffer, size as usize) }.to_vec();
        unsafe { ffi::PyMem_Free(buffer as *mut c_void) };
        Some(WideString(units))
    }
}

impl<'a> FromGuest<'a> for String {
    fn from_guest(_host: &InterpreterHost, object: &'a GuestObject) -> Option<Self> {
        let mut size: ffi::Py_ssize_t = 0;
        let data = unsafe { ffi::PyUnicode_AsUTF8AndSize(object.as_ptr(), &mut size) };
        if data.is_null() {
            return None;
        }

        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, size as usize) };
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl<'a> FromGuest<'a> for &'a [u8] {
    fn from_guest(_host: &InterpreterHost, object: &'a GuestObject) -> Option<Self> {
        let mut data: *mut c_char = ptr::null_mut();
        let mut size: ffi::Py_ssize_t = 0;
        if unsafe { ffi::PyBytes_AsStringAndSize(object.as_ptr(), &mut data, &mut size) } != 0 {
            return None;
        }

        // Storage is owned by the immutable bytes object borrowed for 'a.
        Some(unsafe { std::slice::from_raw_parts(data as *const u8, size as usize) })
    }
}

impl InterpreterHost {
    /// Import a module by dotted name.
    pub fn import(&self, name: &str) -> GuestHandle<'_> {
        match guest_name(name) {
            Some(name) => unsafe { GuestHandle::from_raw(ffi::PyImport_ImportModule(name.as_ptr())) },
            None => GuestHandle::empty(),
        }
    }

    /// Look up a named attribute.
    pub fn get_attr(&self, object: &GuestObject, name: &str) -> GuestHandle<'_> {
        if self.config().trace_attribute_lookups {
            debug!(
                "{} attr name: {}",
                self.repr(object).unwrap_or_else(|| "<unprintable>".to_string()),
                name
            );
        }

        // Bound methods of a partial tuple would reach the unset slots.
        if !ensure_populated(object) {
            return GuestHandle::empty();
        }

        match guest_name(name) {
            Some(name) => unsafe {
                GuestHandle::from_raw(ffi::PyObject_GetAttrString(object.as_ptr(), name.as_ptr()))
            },
            None => GuestHandle::empty(),
        }
    }

    /// Call with no positional arguments.
    pub fn call(&self, callable: &GuestObject) -> GuestHandle<'_> {
        unsafe { GuestHandle::from_raw(ffi::PyObject_CallObject(callable.as_ptr(), ptr::null_mut())) }
    }

    /// Call with a tuple of positional arguments.
    ///
    /// `args` must be a tuple with every slot set; otherwise the guest raises
    /// `TypeError` or `ValueError` and the handle is empty.
    pub fn call_with(&self, callable: &GuestObject, args: &GuestObject) -> GuestHandle<'_> {
        if !ensure_populated(args) {
            return GuestHandle::empty();
        }
        unsafe { GuestHandle::from_raw(ffi::PyObject_CallObject(callable.as_ptr(), args.as_ptr())) }
    }

    /// Copy a host value into a new guest object.
    pub fn make_object<T: IntoGuest>(&self, value: T) -> GuestHandle<'_> {
        value.into_guest(self)
    }

    /// Allocate a tuple with `size` empty slots.
    pub fn make_tuple(&self, size: usize) -> GuestHandle<'_> {
        unsafe { GuestHandle::from_raw(ffi::PyTuple_New(size as ffi::Py_ssize_t)) }
    }

    /// Store `item` at `index`, moving its reference into the tuple.
    ///
    /// An occupied slot releases its previous item. The reference is consumed
    /// even when the assignment fails.
    pub fn set_tuple_item(
        &self,
        tuple: &GuestObject,
        index: usize,
        mut item: GuestHandle<'_>,
    ) -> Result<(), GuestError> {
        if item.is_empty() {
            return Err(self.take_error(FailureKind::Tuple).unwrap_or_else(|| {
                GuestError::new(FailureKind::Tuple, "ValueError", "cannot store an empty handle")
            }));
        }

        unsafe { self.set_tuple_item_raw(tuple, index, item.release()) }
    }

    /// Store a raw reference at `index`, moving it into the tuple.
    ///
    /// # Safety
    ///
    /// `item` must be a live guest object carrying a reference the caller
    /// gives up (increment a borrowed one first).
    pub unsafe fn set_tuple_item_raw(
        &self,
        tuple: &GuestObject,
        index: usize,
        item: *mut ffi::PyObject,
    ) -> Result<(), GuestError> {
        if ffi::PyTuple_SetItem(tuple.as_ptr(), index as ffi::Py_ssize_t, item) != 0 {
            return Err(self.take_error(FailureKind::Tuple).unwrap_or_else(|| {
                GuestError::new(FailureKind::Tuple, "SystemError", "tuple assignment failed")
            }));
        }
        Ok(())
    }

    /// Take a new reference to the item at `index`.
    ///
    /// The handle keeps the item alive even if the slot is overwritten later.
    /// An unset slot raises `ValueError`; an index out of range raises
    /// `IndexError`.
    pub fn tuple_item(&self, tuple: &GuestObject, index: usize) -> GuestHandle<'_> {
        let item = unsafe { ffi::PyTuple_GetItem(tuple.as_ptr(), index as ffi::Py_ssize_t) };
        if item.is_null() {
            if !self.error_pending() {
                unsafe { raise(ffi::PyExc_ValueError, &format!("tuple slot {index} is unset")) };
            }
            return GuestHandle::empty();
        }
        unsafe {
            ffi::Py_IncRef(item);
            GuestHandle::from_raw(item)
        }
    }

    /// Length of a tuple.
    pub fn tuple_len(&self, tuple: &GuestObject) -> Option<usize> {
        let len = unsafe { ffi::PyTuple_Size(tuple.as_ptr()) };
        usize::try_from(len).ok()
    }

    /// Extract a host value from a guest object.
    pub fn cast<'a, T: FromGuest<'a>>(&self, object: &'a GuestObject) -> Option<T> {
        T::from_guest(self, object)
    }

    /// Take an additional owned reference to a borrowed object.
    pub fn new_ref(&self, object: &GuestObject) -> GuestHandle<'_> {
        unsafe {
            ffi::Py_IncRef(object.as_ptr());
            GuestHandle::from_raw(object.as_ptr())
        }
    }

    /// Whether the object can be called.
    pub fn is_callable(&self, object: &GuestObject) -> bool {
        unsafe { ffi::PyCallable_Check(object.as_ptr()) != 0 }
    }

    /// Printable representation of the object, for diagnostics.
    pub fn repr(&self, object: &GuestObject) -> Option<String> {
        if unset_slot(object.as_ptr()).is_some() {
            return None;
        }
        let repr = unsafe { GuestHandle::from_raw(ffi::PyObject_Repr(object.as_ptr())) };
        if repr.is_empty() {
            unsafe { ffi::PyErr_Clear() };
            return None;
        }
        unsafe { utf8_of(repr.get()) }
    }

    /// Attribute names of the object, as listed by the guest's `dir()`.
    pub fn attribute_names(&self, object: &GuestObject) -> Option<Vec<String>> {
        let names = unsafe { GuestHandle::from_raw(ffi::PyObject_Dir(object.as_ptr())) };
        if names.is_empty() {
            return None;
        }

        let len = unsafe { ffi::PyList_Size(names.get()) };
        let listing = (0..len.max(0))
            .filter_map(|i| unsafe { utf8_of(ffi::PyList_GetItem(names.get(), i)) })
            .collect();
        Some(listing)
    }

    /// Whether the guest error slot is set.
    pub fn error_pending(&self) -> bool {
        unsafe { !ffi::PyErr_Occurred().is_null() }
    }

    /// Print the pending guest traceback to standard error and clear it.
    pub fn print_error(&self) {
        if self.error_pending() {
            unsafe { ffi::PyErr_Print() };
        }
    }

    /// Discard the pending guest error.
    pub fn clear_error(&self) {
        unsafe { ffi::PyErr_Clear() };
    }

    /// Move the pending guest error, if any, into a [`GuestError`].
    #[allow(deprecated)]
    pub fn take_error(&self, kind: FailureKind) -> Option<GuestError> {
        let mut ptype = ptr::null_mut();
        let mut pvalue = ptr::null_mut();
        let mut ptraceback = ptr::null_mut();

        unsafe {
            ffi::PyErr_Fetch(&mut ptype, &mut pvalue, &mut ptraceback);
            if ptype.is_null() {
                return None;
            }
            ffi::PyErr_NormalizeException(&mut ptype, &mut pvalue, &mut ptraceback);
        }

        let ptype = unsafe { GuestHandle::from_raw(ptype) };
        let pvalue = unsafe { GuestHandle::from_raw(pvalue) };
        let _ptraceback = unsafe { GuestHandle::from_raw(ptraceback) };

        let exception = ptype
            .object()
            .and_then(|t| {
                let name = self.get_attr(t, "__name__");
                name.object().and_then(|n| self.cast::<String>(n))
            })
            .unwrap_or_else(|| "Exception".to_string());

        let message = pvalue
            .object()
            .and_then(|v| {
                let text = unsafe { GuestHandle::from_raw(ffi::PyObject_Str(v.as_ptr())) };
                unsafe { utf8_of(text.get()) }
            })
            .unwrap_or_default();

        // Lookups above must not leave a fresh error behind.
        self.clear_error();
        Some(GuestError::new(kind, exception, message))
    }

    /// Turn an empty handle into the pending guest error.
    pub fn check<'h>(
        &'h self,
        handle: GuestHandle<'h>,
        kind: FailureKind,
    ) -> Result<GuestHandle<'h>, GuestError> {
        if !handle.is_empty() {
            return Ok(handle);
        }
        Err(self.take_error(kind).unwrap_or_else(|| {
            GuestError::new(kind, "SystemError", "operation failed without setting an error")
        }))
    }
}

/// Encode a name for the guest, raising `ValueError` on interior NUL.
fn guest_name(name: &str) -> Option<CString> {
    match CString::new(name) {
        Ok(name) => Some(name),
        Err(_) => {
            unsafe {
                ffi::PyErr_SetString(
                    ffi::PyExc_ValueError,
                    c"name contains an interior NUL byte".as_ptr(),
                )
            };
            None
        }
    }
}

/// Raise `exception` with `message` in the guest error slot.
///
/// # Safety
///
/// `exception` must be a live guest exception type.
unsafe fn raise(exception: *mut ffi::PyObject, message: &str) {
    let message = CString::new(message).unwrap_or_default();
    ffi::PyErr_SetString(exception, message.as_ptr());
}

/// Index of the first slot of `object` that is unset, directly or inside a
/// nested tuple. `None` for non-tuples.
fn unset_slot(object: *mut ffi::PyObject) -> Option<usize> {
    if unsafe { ffi::PyTuple_Check(object) } == 0 {
        return None;
    }
    let len = unsafe { ffi::PyTuple_Size(object) };
    (0..len.max(0))
        .find(|&i| {
            let item = unsafe { ffi::PyTuple_GetItem(object, i) };
            item.is_null() || unset_slot(item).is_some()
        })
        .map(|i| i as usize)
}

/// Raise `ValueError` if `object` still has unset tuple slots.
fn ensure_populated(object: &GuestObject) -> bool {
    match unset_slot(object.as_ptr()) {
        None => true,
        Some(index) => {
            unsafe { raise(ffi::PyExc_ValueError, &format!("tuple slot {index} is unset")) };
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_string_from_str() {
        let wide = WideString::from("hello");
        assert_eq!(wide.len(), 5);
        assert_eq!(wide.as_units()[0], 'h' as u32 as wchar_t);
        assert_eq!(wide.to_string_lossy(), "hello");
        assert_eq!(wide.to_string(), "hello");
    }

    #[test]
    fn test_wide_string_non_ascii() {
        let text = "Grüße, 世界";
        let wide = WideString::from(text);
        assert_eq!(wide.to_string_lossy(), text);
        assert!(!wide.is_empty());
    }

    #[test]
    fn test_nul_terminated_copy() {
        let wide = WideString::from("ab");
        let terminated = wide.as_nul_terminated();
        assert_eq!(terminated.len(), 3);
        assert_eq!(terminated[2], 0);
        assert_eq!(wide.len(), 2);
    }

    #[test]
    fn test_empty_wide_string() {
        let wide = WideString::default();
        assert!(wide.is_empty());
        assert_eq!(wide.to_string_lossy(), "");
        assert_eq!(wide.as_nul_terminated(), vec![0]);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_invalid_unit_is_replaced() {
        let wide = WideString::from_units(vec!['a' as wchar_t, 0xD800 as wchar_t]);
        assert_eq!(wide.to_string_lossy(), "a\u{FFFD}");
    }
}
