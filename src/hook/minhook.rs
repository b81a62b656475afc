//! Backend built on MinHook. Every call that writes a jump freezes all other threads of the
//! process first, and `apply_queued` writes the whole batch inside a single freeze.

use std::ffi::c_void;
use std::ptr;

use minhook_sys::{
    MH_ApplyQueued, MH_CreateHook, MH_Initialize, MH_QueueDisableHook, MH_QueueEnableHook,
    MH_RemoveHook, MH_Uninitialize,
};

use super::{Backend, Fault};

const MH_OK: i32 = 0;
const MH_ERROR_ALREADY_INITIALIZED: i32 = 1;
const MH_ERROR_NOT_EXECUTABLE: i32 = 7;
const MH_ERROR_UNSUPPORTED_FUNCTION: i32 = 8;

fn describe(status: i32) -> &'static str {
    match status {
        1 => "MinHook is already initialised",
        2 => "MinHook is not initialised",
        3 => "hook already created",
        4 => "hook not created",
        5 => "hook already enabled",
        6 => "hook not enabled",
        7 => "target is not executable",
        8 => "target cannot be hooked",
        9 => "unable to allocate trampoline memory",
        10 => "unable to change page protection",
        11 => "module not loaded",
        12 => "function not found",
        _ => "unknown MinHook error",
    }
}

fn check(status: i32) -> Result<(), Fault> {
    match status {
        MH_OK => Ok(()),
        MH_ERROR_NOT_EXECUTABLE | MH_ERROR_UNSUPPORTED_FUNCTION => {
            Err(Fault::unhookable(status, describe(status)))
        }
        _ => Err(Fault::backend(status, describe(status))),
    }
}

pub struct MinHook(());

impl MinHook {
    pub fn new() -> Result<MinHook, Fault> {
        let status = unsafe { MH_Initialize() } as i32;

        if status != MH_ERROR_ALREADY_INITIALIZED {
            check(status)?;
        }

        Ok(MinHook(()))
    }
}

impl Backend for MinHook {
    unsafe fn create(&mut self, target: usize, detour: usize) -> Result<usize, Fault> {
        let mut trampoline: *mut c_void = ptr::null_mut();

        check(MH_CreateHook(
            target as *mut c_void,
            detour as *mut c_void,
            &mut trampoline as *mut *mut c_void as *mut _,
        ) as i32)?;

        Ok(trampoline as usize)
    }

    unsafe fn remove(&mut self, target: usize) -> Result<(), Fault> {
        check(MH_RemoveHook(target as *mut c_void) as i32)
    }

    unsafe fn queue(&mut self, target: usize, enable: bool) -> Result<(), Fault> {
        let status = if enable {
            MH_QueueEnableHook(target as *mut c_void)
        } else {
            MH_QueueDisableHook(target as *mut c_void)
        };

        check(status as i32)
    }

    unsafe fn apply_queued(&mut self) -> Result<(), Fault> {
        check(MH_ApplyQueued() as i32)
    }
}

impl Drop for MinHook {
    fn drop(&mut self) {
        // Disables and frees anything that is still hooked.
        let status = unsafe { MH_Uninitialize() } as i32;

        if let Err(fault) = check(status) {
            log::warn!("MinHook shutdown failed: {}", fault);
        }
    }
}
