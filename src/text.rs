//! Narrow-to-wide conversion and helpers for turning host strings into log text.

use std::ffi::CStr;

use widestring::{U16CString, U16String};

/// The code page the host process is running with (`CP_ACP`).
pub const ACTIVE_CODE_PAGE: u32 = 0;

/// Japanese Shift-JIS, the encoding the host uses for font face names.
pub const SHIFT_JIS: u32 = 932;

/// Converts multibyte text in a Windows code page to UTF-16.
pub trait Multibyte {
    /// Returns `None` if the bytes cannot be converted.
    fn widen(&self, code_page: u32, bytes: &[u8]) -> Option<U16String>;
}

/// Widens a C string, producing a nul-terminated wide string.
pub fn widen_c(text: &dyn Multibyte, code_page: u32, narrow: &CStr) -> Option<U16CString> {
    let bytes = narrow.to_bytes();

    if bytes.is_empty() {
        return Some(U16CString::default());
    }

    let wide = text.widen(code_page, bytes)?;
    U16CString::from_ustr(wide).ok()
}

/// UTF-8 rendering of a wide string for the log.
pub fn to_utf8(wide: &[u16]) -> String {
    String::from_utf16_lossy(wide)
}

/// Escaped rendering of bytes that could not be decoded.
pub fn escape_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|byte| std::ascii::escape_default(*byte))
        .map(char::from)
        .collect()
}

/// Treats every code page as 7-bit ASCII and refuses anything else.
#[cfg(test)]
pub(crate) struct Ascii;

#[cfg(test)]
impl Multibyte for Ascii {
    fn widen(&self, _code_page: u32, bytes: &[u8]) -> Option<U16String> {
        if bytes.is_ascii() {
            Some(U16String::from_vec(
                bytes.iter().map(|byte| u16::from(*byte)).collect::<Vec<_>>(),
            ))
        } else {
            None
        }
    }
}
