// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Android thread attachment via JNI.
//
// Threads that call into the host from the Java side are already attached
// to the VM; threads started from native code are not. The attacher below
// attaches such threads permanently on first entry and detaches them when
// their attachment record is torn down at thread exit.

#![cfg(target_os = "android")]

use jni::JavaVM;

use tether_core::error::{Result, TetherError};

use crate::attach::ThreadAttacher;

/// Attaches host threads to the process's Java VM.
pub struct JniAttacher {
    vm: JavaVM,
}

impl JniAttacher {
    /// Build from the `JavaVM*` published by the NDK glue.
    pub fn from_android_context() -> Result<Self> {
        let ctx = ndk_context::android_context();
        // SAFETY: `ctx.vm()` returns the `JavaVM*` set by the NDK glue code.
        // The pointer is valid for the lifetime of the process.
        let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }
            .map_err(|e| TetherError::AttachFailed(format!("failed to obtain JavaVM: {e}")))?;
        Ok(Self { vm })
    }

    pub fn new(vm: JavaVM) -> Self {
        Self { vm }
    }
}

impl ThreadAttacher for JniAttacher {
    fn attach(&self) -> Result<()> {
        self.vm
            .attach_current_thread_permanently()
            .map(|_| ())
            .map_err(|e| TetherError::AttachFailed(format!("failed to attach JNI thread: {e}")))
    }

    fn detach(&self) {
        // SAFETY: runs when the thread's attachment record is dropped, i.e.
        // at thread exit or on an explicit detach with no call in progress,
        // so no local references created on this thread are still in use.
        unsafe { self.vm.detach_current_thread() };
    }
}
