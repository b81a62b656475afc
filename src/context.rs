//! The process-wide state shared by the exported entry points and the hook handlers.
//!
//! There is no context until `init` runs on process attach, and none after `teardown` on
//! detach. Handlers that run outside that window see `None` and pass calls straight through.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use widestring::U16CString;

use crate::font::FontPolicy;
use crate::hook::{Backend, Engine};
use crate::registry::{Registry, ORIGINALS};
use crate::settings::Settings;

pub type DynRegistry = Registry<Box<dyn Backend + Send>>;

pub struct Context {
    pub settings: Settings,
    pub font: FontPolicy,
    pub title: U16CString,
    registry: Mutex<DynRegistry>,
}

impl Context {
    pub fn new(settings: Settings, backend: Box<dyn Backend + Send>) -> Context {
        let font = FontPolicy::new(
            &settings.face_name,
            settings.char_set,
            settings.face_code_page,
        );

        // Titles with an embedded nul are cut off there.
        let title = U16CString::from_str_truncate(&settings.window_title);

        Context {
            settings,
            font,
            title,
            registry: Mutex::new(Registry::new(Engine::new(backend), &ORIGINALS)),
        }
    }

    pub fn registry(&self) -> MutexGuard<'_, DynRegistry> {
        self.registry.lock()
    }
}

static CURRENT: RwLock<Option<Arc<Context>>> = parking_lot::const_rwlock(None);

/// Makes `context` the current context, replacing any previous one.
pub fn init(context: Context) -> Arc<Context> {
    let context = Arc::new(context);

    if CURRENT.write().replace(context.clone()).is_some() {
        log::warn!("Replaced an existing context.");
    }

    context
}

pub fn current() -> Option<Arc<Context>> {
    CURRENT.read().clone()
}

pub fn teardown() -> Option<Arc<Context>> {
    CURRENT.write().take()
}
