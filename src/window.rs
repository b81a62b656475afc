//! Window creation arguments and the title substitution applied to them.

use std::ffi::{c_void, CStr};
use std::ptr;

use widestring::{U16CStr, U16CString};

use crate::text::{self, Multibyte};

/// The arguments of `CreateWindowExA` (`C = u8`) or `CreateWindowExW` (`C = u16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateWindow<C> {
    pub ex_style: u32,
    pub class: *const C,
    pub title: *const C,
    pub style: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub parent: isize,
    pub menu: isize,
    pub instance: isize,
    pub param: *const c_void,
}

pub type CreateWindowA = CreateWindow<u8>;
pub type CreateWindowW = CreateWindow<u16>;

impl<C> CreateWindow<C> {
    /// The same call with different string arguments.
    pub fn with_strings<D>(self, class: *const D, title: *const D) -> CreateWindow<D> {
        CreateWindow {
            ex_style: self.ex_style,
            class,
            title,
            style: self.style,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            parent: self.parent,
            menu: self.menu,
            instance: self.instance,
            param: self.param,
        }
    }
}

/// Replaces the title and nothing else.
pub fn retitle(call: CreateWindowW, title: &U16CStr) -> CreateWindowW {
    CreateWindowW {
        title: title.as_ptr(),
        ..call
    }
}

/// `MAKEINTATOM` values live in the low word and are not string pointers.
pub fn is_atom<C>(class: *const C) -> bool {
    !class.is_null() && (class as usize) >> 16 == 0
}

/// A class name converted for the wide entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WideClass {
    Null,
    Atom(u16),
    Named(U16CString),
}

impl WideClass {
    /// Valid for as long as `self` is.
    pub fn as_ptr(&self) -> *const u16 {
        match self {
            WideClass::Null => ptr::null(),
            WideClass::Atom(atom) => usize::from(*atom) as *const u16,
            WideClass::Named(name) => name.as_ptr(),
        }
    }
}

/// Converts a narrow class argument with the active code page. Returns `None` if a named
/// class cannot be converted.
///
/// # Safety
/// `class` must be null, an atom, or point to a nul-terminated string.
pub unsafe fn widen_class(class: *const u8, text: &dyn Multibyte) -> Option<WideClass> {
    if class.is_null() {
        return Some(WideClass::Null);
    }

    if is_atom(class) {
        return Some(WideClass::Atom(class as usize as u16));
    }

    let name = CStr::from_ptr(class.cast());
    text::widen_c(text, text::ACTIVE_CODE_PAGE, name).map(WideClass::Named)
}

/// Converts a narrow title with the active code page. A null title stays null (`Some(None)`);
/// `None` means the title cannot be converted.
///
/// # Safety
/// `title` must be null or point to a nul-terminated string.
pub unsafe fn widen_title(
    title: *const u8,
    text: &dyn Multibyte,
) -> Option<Option<U16CString>> {
    if title.is_null() {
        return Some(None);
    }

    let title = CStr::from_ptr(title.cast());
    text::widen_c(text, text::ACTIVE_CODE_PAGE, title).map(Some)
}
