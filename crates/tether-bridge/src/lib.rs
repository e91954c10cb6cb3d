// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tether bridge: handle-based object exchange between the host and a foreign
// runtime.
//
// Host objects are exposed through a generational handle table and invoked
// through per-type vtables; foreign objects are wrapped in reference-counted
// proxies. Calls cross in both directions from any thread.

pub mod attach;
mod bridge;
pub mod dispatch;
pub mod handle_table;
pub mod lifecycle;
pub mod loopback;
pub mod marshal;
pub mod null_guard;
mod reference;
pub mod runtime;
pub mod value;

#[cfg(target_os = "android")]
pub mod android;

pub use attach::{AttachGuard, NoopAttacher, ThreadAttacher};
pub use bridge::{Bridge, BridgeStats, Release, WeakBridge};
pub use dispatch::{CallState, DispatchStats, PendingCall};
pub use handle_table::{Handle, HandleTable};
pub use lifecycle::{CollectionSignal, MonitorStats};
pub use loopback::{ForeignEnv, ForeignObject, LoopbackRuntime};
pub use reference::ForeignProxy;
pub use runtime::{ForeignRuntime, HostPort};
pub use value::{Args, CapabilityImpl, HostObject, MethodFn, ObjectRef, Value, receiver};

use tether_core::error::Result;

/// Thread attacher for the target operating system.
///
/// On Android this attaches threads to the process's Java VM; elsewhere
/// threads need no registration.
pub fn platform_attacher() -> Result<Box<dyn ThreadAttacher>> {
    #[cfg(target_os = "android")]
    {
        Ok(Box::new(android::JniAttacher::from_android_context()?))
    }
    #[cfg(not(target_os = "android"))]
    {
        Ok(Box::new(NoopAttacher))
    }
}
