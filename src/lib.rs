//! Chinese localisation hook for ExHIBIT engine games.
//!
//! Loaded into the game process, this library hooks font creation, file opening and window
//! creation so that translated scripts in `rld_chs` are preferred over the originals in `rld`,
//! every font is created with a Chinese face and character set, and the window carries the
//! translation's title.

pub mod context;
pub mod dispatch;
pub mod files;
pub mod font;
pub mod hook;
pub mod logging;
pub mod registry;
pub mod settings;
pub mod text;
pub mod window;

#[cfg(windows)]
mod win32;

/// Held by tests that drive the process-wide context, log and trampoline table.
#[cfg(test)]
pub(crate) static PROCESS_STATE: parking_lot::Mutex<()> = parking_lot::const_mutex(());

use eyre::{eyre, WrapErr};

use hook::Backend;
use logging::Event;
use registry::{HookSpec, Resolver};
use settings::Settings;

/// Hooks every function in `specs`. Returns false if any of them could not be hooked, in which
/// case none of them are.
pub fn install_hooks(specs: &[HookSpec], resolver: &dyn Resolver) -> bool {
    let context = match context::current() {
        Some(context) => context,
        None => {
            log::error!("Hooks cannot be installed before the library is initialised.");
            return false;
        }
    };

    let mut registry = context.registry();

    match registry.install_all(specs, resolver) {
        Ok(()) => {
            logging::record(&Event::HooksInstalled {
                count: registry.hooks().len(),
            });
            true
        }

        Err(err) => {
            log::error!("Hook installation failed: {}", err);
            false
        }
    }
}

/// Removes the hooks installed by `install_hooks`.
pub fn remove_hooks() -> bool {
    let context = match context::current() {
        Some(context) => context,
        None => {
            log::warn!("Nothing to remove: the library is not initialised.");
            return false;
        }
    };

    let mut registry = context.registry();
    let count = registry.hooks().len();

    match registry.remove_all() {
        Ok(()) => {
            logging::record(&Event::HooksRemoved { count });
            true
        }

        Err(err) => {
            log::error!("Hook removal failed: {}", err);
            false
        }
    }
}

/// Opens the log, sets up the shared context and installs the hooks. On failure everything is
/// torn down again so that the game runs unmodified.
pub fn attach_with(
    settings: Settings,
    settings_error: Option<eyre::Report>,
    backend: Box<dyn Backend + Send>,
    specs: &[HookSpec],
    resolver: &dyn Resolver,
) -> eyre::Result<()> {
    let log_file = settings.log_file.clone();

    logging::init(&settings)
        .wrap_err_with(|| format!("unable to open log file {}", log_file.display()))?;

    log::info!("{} {} attached", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    if let Some(err) = settings_error {
        log::error!("Using default settings: {:?}", err);
    }

    context::init(context::Context::new(settings, backend));

    if !install_hooks(specs, resolver) {
        context::teardown();
        logging::shutdown();

        return Err(eyre!("hooks could not be installed"));
    }

    Ok(())
}

/// Closes the log, removes the hooks and drops the shared context.
pub fn detach() -> bool {
    log::info!("Detaching.");
    logging::shutdown();

    let removed = remove_hooks();
    context::teardown();

    removed
}

#[cfg(windows)]
mod exports {
    use std::ffi::c_void;
    use std::path::Path;

    use windows_sys::Win32::Foundation::{BOOL, FALSE, HINSTANCE, TRUE};
    use windows_sys::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows_sys::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use crate::hook::MinHook;
    use crate::settings::{Settings, SETTINGS_FILE};
    use crate::win32;

    fn to_bool(value: bool) -> BOOL {
        if value {
            TRUE
        } else {
            FALSE
        }
    }

    fn attach() -> eyre::Result<()> {
        let (settings, settings_error) = Settings::load_or_default(Path::new(SETTINGS_FILE));
        let backend = MinHook::new().map_err(|fault| eyre::eyre!("MinHook: {}", fault))?;

        crate::attach_with(
            settings,
            settings_error,
            Box::new(backend),
            &win32::hook_specs(),
            &win32::LoadedModules,
        )
    }

    #[no_mangle]
    pub extern "system" fn InstallFontHook() -> BOOL {
        to_bool(crate::install_hooks(
            &win32::hook_specs(),
            &win32::LoadedModules,
        ))
    }

    #[no_mangle]
    pub extern "system" fn RemoveFontHook() -> BOOL {
        to_bool(crate::remove_hooks())
    }

    #[no_mangle]
    pub extern "system" fn DllMain(module: HINSTANCE, reason: u32, _reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                unsafe { DisableThreadLibraryCalls(module) };

                match attach() {
                    Ok(()) => TRUE,
                    Err(err) => {
                        win32::debug_output(&format!("exhibit-chs: {:?}\n", err));
                        FALSE
                    }
                }
            }

            DLL_PROCESS_DETACH => to_bool(crate::detach()),

            _ => TRUE,
        }
    }
}
