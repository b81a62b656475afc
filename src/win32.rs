//! Win32 glue: the replacement functions installed over the game's imports, plus the system
//! services the portable code is written against.

use std::ffi::{c_void, CStr, CString};
use std::ptr;

use widestring::{U16CStr, U16CString, U16String};
use windows_sys::core::{PCSTR, PCWSTR};
use windows_sys::Win32::Foundation::{HANDLE, HINSTANCE, HWND, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Globalization::MultiByteToWideChar;
use windows_sys::Win32::Graphics::Gdi::{CreateFontIndirectW, HFONT, LOGFONTW};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FindClose, FindFirstFileW, WIN32_FIND_DATAW,
};
use windows_sys::Win32::System::Diagnostics::Debug::OutputDebugStringW;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

use crate::context;
use crate::dispatch::{self, FileRoute, FontRoute};
use crate::font::LogFontA;
use crate::logging;
use crate::registry::{HookId, HookSpec, Resolver, ORIGINALS};
use crate::text::Multibyte;
use crate::window::{self, CreateWindowA, CreateWindowW};

type HMENU = isize;

type CreateFontIndirectAFn = unsafe extern "system" fn(*const LogFontA) -> HFONT;

type CreateFileAFn = unsafe extern "system" fn(
    PCSTR,
    u32,
    u32,
    *const SECURITY_ATTRIBUTES,
    u32,
    u32,
    HANDLE,
) -> HANDLE;

type CreateWindowExAFn = unsafe extern "system" fn(
    u32,
    PCSTR,
    PCSTR,
    u32,
    i32,
    i32,
    i32,
    i32,
    HWND,
    HMENU,
    HINSTANCE,
    *const c_void,
) -> HWND;

type CreateWindowExWFn = unsafe extern "system" fn(
    u32,
    PCWSTR,
    PCWSTR,
    u32,
    i32,
    i32,
    i32,
    i32,
    HWND,
    HMENU,
    HINSTANCE,
    *const c_void,
) -> HWND;

/// The original function behind `id`: its trampoline while hooked, its entry point once the
/// hook has been removed.
unsafe fn original<F: Copy>(id: HookId) -> Option<F> {
    ORIGINALS
        .callable(id)
        .map(|address| std::mem::transmute_copy::<usize, F>(&address))
}

/// Finds exports in modules that are already loaded into the process.
pub struct LoadedModules;

impl Resolver for LoadedModules {
    fn resolve(&self, module: &str, symbol: &str) -> Option<usize> {
        let module = U16CString::from_str(module).ok()?;
        let symbol = CString::new(symbol).ok()?;

        unsafe {
            let handle = GetModuleHandleW(module.as_ptr());

            if handle == 0 {
                return None;
            }

            GetProcAddress(handle, symbol.as_ptr().cast()).map(|function| function as usize)
        }
    }
}

/// Conversion through `MultiByteToWideChar`.
pub struct CodePages;

impl Multibyte for CodePages {
    fn widen(&self, code_page: u32, bytes: &[u8]) -> Option<U16String> {
        if bytes.is_empty() {
            return Some(U16String::new());
        }

        let len = i32::try_from(bytes.len()).ok()?;

        unsafe {
            let needed = MultiByteToWideChar(code_page, 0, bytes.as_ptr(), len, ptr::null_mut(), 0);

            if needed <= 0 {
                return None;
            }

            let mut buffer = vec![0u16; needed as usize];
            let written =
                MultiByteToWideChar(code_page, 0, bytes.as_ptr(), len, buffer.as_mut_ptr(), needed);

            if written <= 0 {
                return None;
            }

            buffer.truncate(written as usize);
            Some(U16String::from_vec(buffer))
        }
    }
}

/// Whether a directory entry exists at `path`.
pub fn file_exists(path: &U16CStr) -> bool {
    unsafe {
        let mut data: WIN32_FIND_DATAW = std::mem::zeroed();
        let find = FindFirstFileW(path.as_ptr(), &mut data);

        if find == INVALID_HANDLE_VALUE {
            return false;
        }

        FindClose(find);
        true
    }
}

/// Sends a log line to an attached debugger.
#[cfg_attr(not(feature = "debug"), allow(dead_code))]
pub fn debug_output(line: &str) {
    let line = U16CString::from_str_truncate(line);
    unsafe { OutputDebugStringW(line.as_ptr()) };
}

unsafe extern "system" fn create_font_indirect_a(font: *const LogFontA) -> HFONT {
    let route = context::current().and_then(|context| {
        dispatch::shielded(|| dispatch::route_font(font.as_ref(), &context.font, &CodePages))
    });

    match route {
        Some(FontRoute::Wide { font, event }) => {
            logging::record(&event);
            CreateFontIndirectW(&font as *const _ as *const LOGFONTW)
        }

        Some(FontRoute::Original) | None => match original::<CreateFontIndirectAFn>(
            HookId::CreateFontIndirectA,
        ) {
            Some(create) => create(font),
            None => 0,
        },
    }
}

unsafe extern "system" fn create_file_a(
    path: PCSTR,
    access: u32,
    share: u32,
    security: *const SECURITY_ATTRIBUTES,
    disposition: u32,
    flags: u32,
    template: HANDLE,
) -> HANDLE {
    let narrow = if path.is_null() {
        None
    } else {
        Some(CStr::from_ptr(path.cast()))
    };

    let route = dispatch::shielded(|| dispatch::route_file_open(narrow, &CodePages, file_exists))
        .unwrap_or(FileRoute::Original);

    match route {
        FileRoute::Wide { path, event } => {
            if let Some(event) = event {
                logging::record(&event);
            }

            CreateFileW(
                path.as_ptr(),
                access,
                share,
                security,
                disposition,
                flags,
                template,
            )
        }

        FileRoute::Original => match original::<CreateFileAFn>(HookId::CreateFileA) {
            Some(create) => create(path, access, share, security, disposition, flags, template),
            None => INVALID_HANDLE_VALUE,
        },
    }
}

/// Both window entry points end up here.
unsafe fn create_window(call: CreateWindowW) -> HWND {
    let create = match original::<CreateWindowExWFn>(HookId::CreateWindowExW) {
        Some(create) => create,
        None => return 0,
    };

    // Keeps the title alive until the window exists.
    let context = context::current();

    let call = match &context {
        Some(context) => match dispatch::shielded(|| dispatch::route_window(call, &context.title)) {
            Some((call, event)) => {
                logging::record(&event);
                call
            }
            None => call,
        },
        None => call,
    };

    create(
        call.ex_style,
        call.class,
        call.title,
        call.style,
        call.x,
        call.y,
        call.width,
        call.height,
        call.parent,
        call.menu,
        call.instance,
        call.param,
    )
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_window_ex_w(
    ex_style: u32,
    class: PCWSTR,
    title: PCWSTR,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: HWND,
    menu: HMENU,
    instance: HINSTANCE,
    param: *const c_void,
) -> HWND {
    create_window(CreateWindowW {
        ex_style,
        class,
        title,
        style,
        x,
        y,
        width,
        height,
        parent,
        menu,
        instance,
        param,
    })
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_window_ex_a(
    ex_style: u32,
    class: PCSTR,
    title: PCSTR,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: HWND,
    menu: HMENU,
    instance: HINSTANCE,
    param: *const c_void,
) -> HWND {
    let call = CreateWindowA {
        ex_style,
        class,
        title,
        style,
        x,
        y,
        width,
        height,
        parent,
        menu,
        instance,
        param,
    };

    let widened = dispatch::shielded(|| {
        (
            window::widen_class(class, &CodePages),
            window::widen_title(title, &CodePages),
        )
    });

    // The title is kept for when no substitution happens.
    if let Some((Some(wide_class), Some(wide_title))) = widened {
        let title = wide_title.as_ref().map_or(ptr::null(), |title| title.as_ptr());

        return create_window(call.with_strings(wide_class.as_ptr(), title));
    }

    match original::<CreateWindowExAFn>(HookId::CreateWindowExA) {
        Some(create) => create(
            ex_style, class, title, style, x, y, width, height, parent, menu, instance, param,
        ),
        None => 0,
    }
}

/// The functions to hook and their replacements.
pub fn hook_specs() -> Vec<HookSpec> {
    vec![
        HookSpec::new(
            HookId::CreateFontIndirectA,
            create_font_indirect_a as usize,
        ),
        HookSpec::new(HookId::CreateFileA, create_file_a as usize),
        HookSpec::new(HookId::CreateWindowExA, create_window_ex_a as usize),
        HookSpec::new(HookId::CreateWindowExW, create_window_ex_w as usize),
    ]
}
