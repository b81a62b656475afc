//! Decides what each hooked call should turn into. The platform shims feed raw arguments in and
//! carry out the returned route; nothing here calls into the host.

use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};

use widestring::{U16CStr, U16CString};

use crate::files::{self, Redirect};
use crate::font::{FontPolicy, LogFontA, LogFontW};
use crate::logging::Event;
use crate::text::{self, Multibyte};
use crate::window::{self, CreateWindowW};

/// Runs handler policy, turning a panic into `None` so that the caller can fall back to the
/// untouched call. The panic itself is logged by the panic hook.
pub fn shielded<T>(policy: impl FnOnce() -> T) -> Option<T> {
    panic::catch_unwind(AssertUnwindSafe(policy)).ok()
}

#[derive(Debug, PartialEq, Eq)]
pub enum FileRoute {
    /// Call the original narrow function with the original arguments.
    Original,

    /// Open `path` through the wide function.
    Wide {
        path: U16CString,
        event: Option<Event>,
    },
}

pub fn route_file_open(
    path: Option<&CStr>,
    text: &dyn Multibyte,
    exists: impl Fn(&U16CStr) -> bool,
) -> FileRoute {
    let path = match path {
        Some(path) => path,
        None => return FileRoute::Original,
    };

    let wide = match text::widen_c(text, text::ACTIVE_CODE_PAGE, path) {
        Some(wide) => wide,
        None => return FileRoute::Original,
    };

    match files::redirect(&wide, exists) {
        Redirect::Redirected(alternate) => FileRoute::Wide {
            event: Some(Event::FileRedirected {
                from: text::to_utf8(wide.as_slice()),
                to: text::to_utf8(alternate.as_slice()),
            }),
            path: alternate,
        },

        Redirect::Unchanged => FileRoute::Wide {
            path: wide,
            event: None,
        },
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FontRoute {
    Original,
    Wide { font: LogFontW, event: Event },
}

pub fn route_font(font: Option<&LogFontA>, policy: &FontPolicy, text: &dyn Multibyte) -> FontRoute {
    let font = match font {
        Some(font) => font,
        None => return FontRoute::Original,
    };

    FontRoute::Wide {
        font: policy.apply(font),
        event: Event::FontSubstituted {
            old_char_set: font.char_set,
            new_char_set: policy.char_set(),
            old_face: policy.describe_source_face(font, text),
            new_face: policy.face_name().to_string(),
        },
    }
}

/// Every window gets the designated title.
pub fn route_window(call: CreateWindowW, title: &U16CStr) -> (CreateWindowW, Event) {
    (window::retitle(call, title), Event::TitleOverwritten)
}
