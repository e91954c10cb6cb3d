// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The bridge instance: one process-scoped context owning the handle table,
// the lifecycle monitor, the dispatcher and the attached foreign runtime.
// Every operation goes through an explicit `Bridge` value; there is no
// global state besides the per-thread attachment records.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tether_core::error::{Result, TetherError};
use tether_core::{
    BridgeConfig, BridgeId, Catalogue, Selector, SelectorRef, WireRef, WireResult, WireValue,
};
use tracing::{info, instrument, warn};

use crate::attach::{AttachGuard, AttachRegistry, ThreadAttacher};
use crate::dispatch::{self, DispatchStats, Dispatcher};
use crate::handle_table::{Handle, HandleTable};
use crate::lifecycle::{LifecycleMonitor, MonitorStats};
use crate::reference::{self, Exposed, ForeignProxy, References};
use crate::runtime::{ForeignRuntime, HostPort};
use crate::value::{HostObject, Value};

pub(crate) struct Core {
    pub(crate) id: BridgeId,
    pub(crate) config: BridgeConfig,
    pub(crate) catalogue: Arc<Catalogue>,
    pub(crate) table: HandleTable<Exposed>,
    pub(crate) refs: References,
    pub(crate) monitor: LifecycleMonitor,
    pub(crate) dispatch: Dispatcher,
    pub(crate) attach: Arc<AttachRegistry>,
    pub(crate) runtime: Arc<dyn ForeignRuntime>,
    shut_down: AtomicBool,
}

impl Core {
    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(TetherError::ShutDown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn release_host(&self, handle: Handle) -> bool {
        reference::release(self, handle)
    }
}

/// Outcome of a release request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The handle was already released; nothing happened.
    Stale,
}

/// Snapshot of bridge counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub live_handles: usize,
    pub cached_proxies: usize,
    pub attached_threads: usize,
    pub attaches_total: u64,
    pub monitor: MonitorStats,
    pub dispatch: DispatchStats,
}

/// Handle to a bridge instance. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Bridge {
    core: Arc<Core>,
}

/// Non-owning bridge handle, for host objects that need to reach the bridge
/// they are exposed through without keeping it alive.
#[derive(Clone)]
pub struct WeakBridge {
    core: Weak<Core>,
}

impl WeakBridge {
    pub fn upgrade(&self) -> Option<Bridge> {
        self.core.upgrade().map(|core| Bridge { core })
    }
}

impl Bridge {
    /// Create a bridge over `runtime` using the platform's thread attacher.
    pub fn new(
        config: BridgeConfig,
        catalogue: Catalogue,
        runtime: Arc<dyn ForeignRuntime>,
    ) -> Result<Self> {
        Self::with_attacher(config, catalogue, runtime, crate::platform_attacher()?)
    }

    #[instrument(skip_all, fields(runtime = runtime.name()))]
    pub fn with_attacher(
        config: BridgeConfig,
        catalogue: Catalogue,
        runtime: Arc<dyn ForeignRuntime>,
        attacher: Box<dyn ThreadAttacher>,
    ) -> Result<Self> {
        config.validate()?;
        let id = BridgeId::new();
        let core = Arc::new(Core {
            id,
            table: HandleTable::new(config.handle_shards, config.max_handles),
            monitor: LifecycleMonitor::new(
                config.signal_queue_capacity,
                config.overflow_policy,
                config.drain_poll_interval(),
            ),
            catalogue: Arc::new(catalogue),
            refs: References::default(),
            dispatch: Dispatcher::default(),
            attach: AttachRegistry::new(id, attacher),
            runtime,
            shut_down: AtomicBool::new(false),
            config,
        });
        core.runtime.bind(HostPort::new(&core));
        info!(
            bridge = %id,
            capabilities = core.catalogue.len(),
            max_handles = core.config.max_handles,
            "bridge started"
        );
        Ok(Self { core })
    }

    pub fn id(&self) -> BridgeId {
        self.core.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.core.catalogue
    }

    pub fn host_port(&self) -> HostPort {
        HostPort::new(&self.core)
    }

    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge {
            core: Arc::downgrade(&self.core),
        }
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    /// Make `object` reachable from the foreign side. Exposing an object
    /// that is already exposed returns its existing handle.
    #[instrument(level = "debug", skip_all, fields(bridge = %self.core.id, type_name = object.type_name()))]
    pub fn expose_to_foreign(&self, object: Arc<dyn HostObject>) -> Result<Handle> {
        reference::expose(&self.core, &object)
    }

    /// Look up an exposed object by handle.
    pub fn resolve(&self, handle: Handle) -> Result<Arc<dyn HostObject>> {
        Ok(self.core.table.resolve(handle)?.object)
    }

    /// Wrap a foreign reference as a proxy for `capability`. The null
    /// reference wraps to `None`.
    #[instrument(level = "debug", skip_all, fields(bridge = %self.core.id, handle = %handle, capability = capability))]
    pub fn wrap_foreign_as_proxy(
        &self,
        handle: WireRef,
        capability: &str,
    ) -> Result<Option<ForeignProxy>> {
        let cap = self.core.catalogue.require(capability)?.id;
        reference::wrap_foreign(&self.core, handle, cap)
    }

    /// The foreign side dropped its reference to `handle`.
    pub fn release(&self, handle: WireRef) -> Release {
        match Handle::from_wire(handle) {
            Some(h) if self.core.release_host(h) => Release::Released,
            _ => Release::Stale,
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Call a foreign object, waiting as long as the configured default
    /// timeout allows.
    pub fn invoke_foreign(&self, handle: WireRef, selector: Selector, args: Vec<Value>) -> Result<Value> {
        let timeout = self.core.config.foreign_call_timeout();
        dispatch::invoke_foreign(&self.core, handle, selector, args, timeout)
    }

    pub fn invoke_foreign_timeout(
        &self,
        handle: WireRef,
        selector: Selector,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        dispatch::invoke_foreign(&self.core, handle, selector, args, Some(timeout))
    }

    /// Serve a foreign->host call. Same entry point the runtime reaches
    /// through its `HostPort`.
    #[instrument(level = "trace", skip_all, fields(bridge = %self.core.id, handle = %handle))]
    pub fn invoke_host(
        &self,
        handle: WireRef,
        selector: impl Into<SelectorRef>,
        args: Vec<WireValue>,
    ) -> WireResult {
        dispatch::invoke_host(&self.core, handle, selector.into(), args)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Sweep for exposed objects the host no longer references. Embedders
    /// call this from their collection hook; `drain_signals` also sweeps.
    pub fn collect(&self) -> usize {
        self.core.monitor.sweep()
    }

    /// Release the handles of up to `max` finalized objects, waiting at most
    /// `timeout` for them. Returns how many handles were released. A signal
    /// whose object became reachable again in the meantime is withdrawn.
    #[instrument(skip(self), fields(bridge = %self.core.id))]
    pub fn drain_signals(&self, max: usize, timeout: Duration) -> usize {
        let signals = self.core.monitor.drain(max, timeout);
        signals
            .iter()
            .filter(|signal| reference::release_collected(&self.core, signal.handle))
            .count()
    }

    // -----------------------------------------------------------------------
    // Threads
    // -----------------------------------------------------------------------

    /// Attach the calling thread for the guard's lifetime. Calls through
    /// `invoke_host` do this on their own.
    pub fn attach_current_thread(&self) -> Result<AttachGuard> {
        self.core.attach.enter()
    }

    /// Detach the calling thread ahead of thread exit.
    pub fn detach_current_thread(&self) -> bool {
        self.core.attach.detach_current()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            live_handles: self.core.table.len(),
            cached_proxies: self.core.refs.cached_proxies(),
            attached_threads: self.core.attach.attached_threads(),
            attaches_total: self.core.attach.attaches_total(),
            monitor: self.core.monitor.stats(),
            dispatch: self.core.dispatch.stats(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.is_shut_down()
    }

    /// Stop the bridge. Further calls fail with `ShutDown`, every handle is
    /// invalidated, and the runtime is shut down. Idempotent.
    #[instrument(skip(self), fields(bridge = %self.core.id))]
    pub fn shutdown(&self) {
        if self.core.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.runtime.shutdown();
        let released = self.core.table.drain();
        self.core.monitor.clear();
        self.core.refs.clear();
        if !released.is_empty() {
            warn!(count = released.len(), "handles still live at shutdown");
        }
        drop(released);
        info!("bridge shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicI64;
    use std::time::Instant;

    use tether_core::{
        CapabilityDesc, ForeignError, HostError, MethodDesc, TypeDesc, WireFault,
    };

    use super::*;
    use crate::attach::NoopAttacher;
    use crate::loopback::{ForeignEnv, ForeignObject, LoopbackRuntime};
    use crate::value::{Args, CapabilityImpl, MethodFn, ObjectRef, receiver};

    // -- fixtures --

    fn catalogue() -> Catalogue {
        let counter = || TypeDesc::Object("Counter".into());
        Catalogue::new(vec![
            CapabilityDesc::new("Counter")
                .method(MethodDesc::new("Incr", vec![TypeDesc::I64], TypeDesc::I64))
                .method(MethodDesc::new("Fail", vec![TypeDesc::String], TypeDesc::Void).fallible())
                .method(MethodDesc::new("Panic", vec![], TypeDesc::Void))
                .method(MethodDesc::new("Echo", vec![counter()], counter()))
                .method(MethodDesc::new("Err", vec![TypeDesc::Error], TypeDesc::Error)),
            CapabilityDesc::new("Greeter")
                .identity_preserving()
                .method(MethodDesc::new("Hello", vec![TypeDesc::String], TypeDesc::String))
                .method(MethodDesc::new("Slow", vec![], TypeDesc::Void))
                .method(MethodDesc::new("Visit", vec![counter()], TypeDesc::I64))
                .method(MethodDesc::new("Bounce", vec![TypeDesc::Error], TypeDesc::Error))
                .method(MethodDesc::new("SlowSpawn", vec![], TypeDesc::Object("Greeter".into()))),
            CapabilityDesc::new("Solo").method(MethodDesc::new("Enter", vec![], TypeDesc::I64)),
        ])
        .expect("catalogue")
    }

    #[derive(Default)]
    struct Counter {
        total: AtomicI64,
        seen: Mutex<Vec<i64>>,
    }

    fn counter_incr(this: &dyn Any, mut args: Args) -> Result<Value> {
        let this = receiver::<Counter>(this)?;
        let n = args.i64(0)?;
        this.seen.lock().expect("seen").push(n);
        Ok(Value::I64(this.total.fetch_add(n, Ordering::SeqCst) + n))
    }

    fn counter_fail(_this: &dyn Any, mut args: Args) -> Result<Value> {
        Err(HostError::new(args.string(0)?).into())
    }

    fn counter_panic(_this: &dyn Any, _args: Args) -> Result<Value> {
        panic!("counter exploded");
    }

    fn counter_echo(_this: &dyn Any, mut args: Args) -> Result<Value> {
        Ok(Value::Object(args.object(0)?))
    }

    fn counter_err(_this: &dyn Any, mut args: Args) -> Result<Value> {
        Ok(Value::Error(args.error(0)?))
    }

    static COUNTER_METHODS: [(&str, MethodFn); 5] = [
        ("Incr", counter_incr),
        ("Fail", counter_fail),
        ("Panic", counter_panic),
        ("Echo", counter_echo),
        ("Err", counter_err),
    ];

    static COUNTER_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
        name: "Counter",
        methods: &COUNTER_METHODS,
    }];

    impl HostObject for Counter {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn capabilities(&self) -> &'static [CapabilityImpl] {
            &COUNTER_CAPS
        }
    }

    /// Records how many calls were inside it at once.
    #[derive(Default)]
    struct Solo {
        inside: AtomicI64,
        peak: AtomicI64,
    }

    fn solo_enter(this: &dyn Any, _args: Args) -> Result<Value> {
        let this = receiver::<Solo>(this)?;
        let now = this.inside.fetch_add(1, Ordering::SeqCst) + 1;
        this.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_micros(200));
        this.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::I64(now))
    }

    static SOLO_METHODS: [(&str, MethodFn); 1] = [("Enter", solo_enter)];

    static SOLO_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
        name: "Solo",
        methods: &SOLO_METHODS,
    }];

    impl HostObject for Solo {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn capabilities(&self) -> &'static [CapabilityImpl] {
            &SOLO_CAPS
        }

        fn serialized(&self) -> bool {
            true
        }
    }

    struct Greeter;

    impl ForeignObject for Greeter {
        fn invoke(
            &self,
            env: &ForeignEnv,
            method: &str,
            args: Vec<WireValue>,
        ) -> std::result::Result<WireValue, ForeignError> {
            match (method, args.as_slice()) {
                ("Hello", [WireValue::Str(name)]) => Ok(WireValue::Str(format!("hello {name}"))),
                ("Slow", []) => {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(WireValue::Void)
                }
                ("Visit", [WireValue::Host(target)]) => env
                    .call_host(*target, "Counter.Incr", vec![WireValue::I64(5)])
                    .map_err(|f| ForeignError::new(f.to_string())),
                ("Bounce", [err @ WireValue::Error(_)]) => Ok(err.clone()),
                ("SlowSpawn", []) => {
                    std::thread::sleep(Duration::from_millis(200));
                    env.export(Arc::new(Greeter))
                        .map(WireValue::Foreign)
                        .map_err(|e| ForeignError::new(e.to_string()))
                }
                _ => Err(ForeignError::new(format!("bad call {method}"))),
            }
        }
    }

    fn setup(config: BridgeConfig) -> (Bridge, Arc<LoopbackRuntime>) {
        let rt = Arc::new(LoopbackRuntime::new(&config).expect("loopback runtime"));
        let bridge =
            Bridge::with_attacher(config, catalogue(), rt.clone(), Box::new(NoopAttacher))
                .expect("bridge");
        (bridge, rt)
    }

    fn default_setup() -> (Bridge, Arc<LoopbackRuntime>) {
        setup(BridgeConfig::default())
    }

    // -- handles --

    #[test]
    fn exposed_object_resolves_until_released() {
        let (bridge, _rt) = default_setup();
        let obj = Arc::new(Counter::default());
        let h = bridge.expose_to_foreign(obj.clone()).expect("expose");
        assert!(bridge.resolve(h).is_ok());

        assert_eq!(bridge.release(h.to_wire()), Release::Released);
        assert!(matches!(bridge.resolve(h), Err(TetherError::StaleHandle(_))));
        assert_eq!(bridge.release(h.to_wire()), Release::Stale);
        assert_eq!(bridge.release(WireRef::NULL), Release::Stale);
    }

    #[test]
    fn exposing_twice_gives_same_handle() {
        let (bridge, _rt) = default_setup();
        let obj = Arc::new(Counter::default());
        let a = bridge.expose_to_foreign(obj.clone()).expect("first");
        let b = bridge.expose_to_foreign(obj.clone()).expect("second");
        assert_eq!(a, b);
        assert_eq!(bridge.stats().live_handles, 1);
    }

    #[test]
    fn stale_release_leaves_new_occupant_alone() {
        let config = BridgeConfig {
            handle_shards: 1,
            ..Default::default()
        };
        let (bridge, _rt) = setup(config);
        let a = Arc::new(Counter::default());
        let ha = bridge.expose_to_foreign(a).expect("expose a");
        assert_eq!(bridge.release(ha.to_wire()), Release::Released);

        let b = Arc::new(Counter::default());
        let hb = bridge.expose_to_foreign(b.clone()).expect("expose b");
        assert_eq!(hb.index(), ha.index());
        assert!(hb.generation() > ha.generation());

        assert_eq!(bridge.release(ha.to_wire()), Release::Stale);
        let live = bridge.resolve(hb).expect("b still live");
        assert!(ObjectRef::Host(live).same(&ObjectRef::host(b)));
    }

    #[test]
    fn full_table_is_reported() {
        let config = BridgeConfig {
            max_handles: 2,
            ..Default::default()
        };
        let (bridge, _rt) = setup(config);
        let keep: Vec<_> = (0..2)
            .map(|_| {
                let c = Arc::new(Counter::default());
                bridge.expose_to_foreign(c.clone()).expect("expose");
                c
            })
            .collect();
        let err = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect_err("table full");
        assert!(matches!(err, TetherError::ResourceExhausted { capacity: 2 }));
        drop(keep);
    }

    #[test]
    fn incomplete_capability_is_refused_at_registration() {
        struct Half;
        fn incr(_this: &dyn Any, _args: Args) -> Result<Value> {
            Ok(Value::I64(0))
        }
        static HALF_METHODS: [(&str, MethodFn); 1] = [("Incr", incr)];
        static HALF_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
            name: "Counter",
            methods: &HALF_METHODS,
        }];
        impl HostObject for Half {
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
                self
            }
            fn capabilities(&self) -> &'static [CapabilityImpl] {
                &HALF_CAPS
            }
        }

        let (bridge, _rt) = default_setup();
        let err = bridge.expose_to_foreign(Arc::new(Half)).expect_err("incomplete");
        assert!(matches!(
            err,
            TetherError::IncompleteCapability { ref method, .. } if method == "Fail"
        ));
        assert_eq!(bridge.stats().live_handles, 0);
    }

    // -- foreign -> host --

    #[test]
    fn invoke_host_by_name_and_by_id() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose")
            .to_wire();
        assert_eq!(
            bridge.invoke_host(h, "Counter.Incr", vec![WireValue::I64(2)]),
            Ok(WireValue::I64(2))
        );
        let sel = bridge
            .catalogue()
            .resolve(&"Counter.Incr".into())
            .expect("selector");
        assert_eq!(
            bridge.invoke_host(h, sel.pack(), vec![WireValue::I64(3)]),
            Ok(WireValue::I64(5))
        );
    }

    #[test]
    fn object_round_trip_preserves_identity() {
        let (bridge, _rt) = default_setup();
        let obj = Arc::new(Counter::default());
        let h = bridge.expose_to_foreign(obj.clone()).expect("expose").to_wire();

        let back = bridge
            .invoke_host(h, "Counter.Echo", vec![WireValue::Host(h)])
            .expect("echo");
        assert_eq!(back, WireValue::Host(h));
        assert_eq!(bridge.stats().live_handles, 1);
    }

    #[test]
    fn null_round_trip_skips_table() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose")
            .to_wire();

        let before = bridge.core.table.resolve_count();
        let back = bridge
            .invoke_host(h, "Counter.Echo", vec![WireValue::NULL])
            .expect("echo null");
        assert!(back.is_null_ref());
        // Only the call target was looked up.
        assert_eq!(bridge.core.table.resolve_count(), before + 1);
    }

    #[test]
    fn null_receiver_returns_null_form() {
        let (bridge, _rt) = default_setup();
        assert_eq!(
            bridge.invoke_host(WireRef::NULL, "Counter.Echo", vec![WireValue::NULL]),
            Ok(WireValue::NULL)
        );
        assert_eq!(
            bridge.invoke_host(WireRef::NULL, "Counter.Incr", vec![WireValue::I64(1)]),
            Err(WireFault::NullReceiver("Counter.Incr".into()))
        );
    }

    #[test]
    fn failed_host_calls_give_back_foreign_arguments() {
        let (bridge, rt) = default_setup();
        let env = rt.env();
        let g = rt.deliver(Arc::new(Greeter)).expect("deliver");
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose")
            .to_wire();
        let arg = || vec![WireValue::Foreign(g)];

        assert!(matches!(
            env.call_host(h, "Counter.Incr", arg()),
            Err(WireFault::TypeMismatch { .. })
        ));
        assert!(matches!(
            env.call_host(h, "Counter.Incr", vec![WireValue::I64(1), WireValue::Foreign(g)]),
            Err(WireFault::TypeMismatch { .. })
        ));
        assert!(matches!(
            env.call_host(h, "Counter.Nope", arg()),
            Err(WireFault::NoSuchMethod { .. })
        ));
        assert!(matches!(
            env.call_host(WireRef::NULL, "Counter.Incr", arg()),
            Err(WireFault::NullReceiver(_))
        ));
        bridge.release(h);
        assert!(matches!(
            env.call_host(h, "Counter.Echo", arg()),
            Err(WireFault::StaleHandle(_))
        ));

        // Only the reference held since delivery is left.
        assert_eq!(rt.ref_count(g), Some(1));
        assert_eq!(bridge.stats().cached_proxies, 0);
    }

    #[test]
    fn serialized_object_is_entered_by_one_call_at_a_time() {
        const THREADS: usize = 8;
        const CALLS: usize = 50;
        let (bridge, rt) = default_setup();
        let solo = Arc::new(Solo::default());
        let h = bridge.expose_to_foreign(solo.clone()).expect("expose").to_wire();

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                rt.env()
                    .spawn(move |env| {
                        for _ in 0..CALLS {
                            env.call_host(h, "Solo.Enter", vec![]).expect("enter");
                        }
                    })
                    .expect("spawn foreign thread")
            })
            .collect();
        for w in workers {
            w.join().expect("foreign thread");
        }

        assert_eq!(solo.peak.load(Ordering::SeqCst), 1);
        assert_eq!(solo.inside.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_selector_and_bad_arguments_are_faults() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose")
            .to_wire();

        assert!(matches!(
            bridge.invoke_host(h, "Counter.Nope", vec![]),
            Err(WireFault::NoSuchMethod { .. })
        ));
        // A real selector the object does not implement.
        assert!(matches!(
            bridge.invoke_host(h, "Greeter.Hello", vec![WireValue::Str("x".into())]),
            Err(WireFault::NoSuchMethod { .. })
        ));
        assert!(matches!(
            bridge.invoke_host(h, "Counter.Incr", vec![WireValue::Str("x".into())]),
            Err(WireFault::TypeMismatch { .. })
        ));
        assert!(matches!(
            bridge.invoke_host(h, "Counter.Incr", vec![]),
            Err(WireFault::TypeMismatch { .. })
        ));
    }

    #[test]
    fn stale_target_is_a_fault_not_null() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose");
        bridge.release(h.to_wire());
        assert_eq!(
            bridge.invoke_host(h.to_wire(), "Counter.Echo", vec![WireValue::NULL]),
            Err(WireFault::StaleHandle(h.to_wire()))
        );
    }

    #[test]
    fn domain_error_and_panic_cross_as_errors() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose")
            .to_wire();

        match bridge.invoke_host(h, "Counter.Fail", vec![WireValue::Str("nope".into())]) {
            Err(WireFault::Domain(e)) => {
                assert_eq!(e.message, "nope");
                assert!(e.origin.is_some());
            }
            other => panic!("expected domain error, got {other:?}"),
        }

        match bridge.invoke_host(h, "Counter.Panic", vec![]) {
            Err(WireFault::Domain(e)) => assert!(e.message.contains("counter exploded")),
            other => panic!("expected converted panic, got {other:?}"),
        }
        assert_eq!(bridge.stats().dispatch.host_panics, 1);

        // The object is still usable afterwards.
        assert_eq!(
            bridge.invoke_host(h, "Counter.Incr", vec![WireValue::I64(1)]),
            Ok(WireValue::I64(1))
        );
    }

    #[test]
    fn empty_error_value_is_still_an_error() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose")
            .to_wire();
        let out = bridge
            .invoke_host(h, "Counter.Err", vec![WireValue::Error(Some(ForeignError::new("")))])
            .expect("err passthrough");
        match out {
            WireValue::Error(Some(e)) => assert_eq!(e.message, ""),
            other => panic!("expected error value, got {other:?}"),
        }
        assert_eq!(
            bridge.invoke_host(h, "Counter.Err", vec![WireValue::Error(None)]),
            Ok(WireValue::Error(None))
        );
    }

    #[test]
    fn sequential_calls_from_foreign_thread_keep_order() {
        const CALLS: i64 = 100_000;
        let (bridge, rt) = default_setup();
        let obj = Arc::new(Counter::default());
        let h = bridge.expose_to_foreign(obj.clone()).expect("expose").to_wire();

        let worker = rt
            .env()
            .spawn(move |env| {
                for i in 0..CALLS {
                    env.call_host(h, "Counter.Incr", vec![WireValue::I64(i)])
                        .expect("incr");
                }
            })
            .expect("spawn foreign thread");
        worker.join().expect("foreign thread");

        let seen = obj.seen.lock().expect("seen");
        assert_eq!(seen.len(), CALLS as usize);
        assert!(seen.iter().copied().eq(0..CALLS));
        assert_eq!(obj.total.load(Ordering::SeqCst), CALLS * (CALLS - 1) / 2);
        // Attached once, reused for every call, detached at thread exit.
        let stats = bridge.stats();
        assert_eq!(stats.attaches_total, 1);
        assert_eq!(stats.attached_threads, 0);
    }

    // -- host -> foreign --

    #[test]
    fn proxy_forwards_calls() {
        let (bridge, rt) = default_setup();
        let r = rt.deliver(Arc::new(Greeter)).expect("deliver");
        let proxy = bridge
            .wrap_foreign_as_proxy(r, "Greeter")
            .expect("wrap")
            .expect("non-null");
        let out = proxy
            .call("Hello", vec![Value::Str("tether".into())])
            .expect("hello");
        assert_eq!(out.into_string().expect("string"), "hello tether");
        assert!(matches!(
            proxy.call("Nope", vec![]),
            Err(TetherError::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn null_foreign_reference_wraps_to_none() {
        let (bridge, rt) = default_setup();
        assert!(bridge
            .wrap_foreign_as_proxy(WireRef::NULL, "Greeter")
            .expect("wrap null")
            .is_none());
        assert_eq!(rt.released(), 0);
    }

    #[test]
    fn identity_preserving_proxies_are_memoised_and_released_once() {
        let (bridge, rt) = default_setup();
        let greeter: Arc<dyn ForeignObject> = Arc::new(Greeter);
        let r1 = rt.deliver(greeter.clone()).expect("first delivery");
        let r2 = rt.deliver(greeter).expect("second delivery");
        assert_eq!(r1, r2);

        let p1 = bridge.wrap_foreign_as_proxy(r1, "Greeter").expect("wrap").expect("p1");
        let p2 = bridge.wrap_foreign_as_proxy(r2, "Greeter").expect("wrap").expect("p2");
        assert!(p1.ptr_eq(&p2));
        assert_eq!(rt.ref_count(r1), Some(1));

        drop(p1);
        assert_eq!(rt.live_objects(), 1);
        drop(p2);
        assert_eq!(rt.live_objects(), 0);
        assert_eq!(rt.released(), 2);
        assert_eq!(bridge.stats().cached_proxies, 0);
    }

    #[test]
    fn nested_callback_into_host_during_foreign_call() {
        let (bridge, rt) = default_setup();
        let proxy = bridge
            .wrap_foreign_as_proxy(rt.deliver(Arc::new(Greeter)).expect("deliver"), "Greeter")
            .expect("wrap")
            .expect("proxy");
        let counter = Arc::new(Counter::default());
        let out = proxy
            .call("Visit", vec![Value::host(counter.clone())])
            .expect("visit");
        assert_eq!(out.into_i64().expect("i64"), 5);
        assert_eq!(counter.total.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn host_error_survives_trip_through_foreign_side() {
        let (bridge, rt) = default_setup();
        let proxy = bridge
            .wrap_foreign_as_proxy(rt.deliver(Arc::new(Greeter)).expect("deliver"), "Greeter")
            .expect("wrap")
            .expect("proxy");
        let err = HostError::new("some error");
        let back = proxy
            .call("Bounce", vec![Value::Error(Some(err.clone()))])
            .expect("bounce")
            .into_error()
            .expect("error value");
        assert_eq!(back, Some(err));
    }

    #[test]
    fn timed_out_call_discards_late_result() {
        let (bridge, rt) = default_setup();
        let proxy = bridge
            .wrap_foreign_as_proxy(rt.deliver(Arc::new(Greeter)).expect("deliver"), "Greeter")
            .expect("wrap")
            .expect("proxy");
        let err = proxy
            .call_timeout("Slow", vec![], Duration::from_millis(20))
            .expect_err("times out");
        assert!(matches!(err, TetherError::Timeout { .. }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.stats().dispatch.discarded == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let stats = bridge.stats().dispatch;
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn late_foreign_result_is_given_back() {
        let (bridge, rt) = default_setup();
        let proxy = bridge
            .wrap_foreign_as_proxy(rt.deliver(Arc::new(Greeter)).expect("deliver"), "Greeter")
            .expect("wrap")
            .expect("proxy");
        let err = proxy
            .call_timeout("SlowSpawn", vec![], Duration::from_millis(20))
            .expect_err("times out");
        assert!(matches!(err, TetherError::Timeout { .. }));
        drop(proxy);

        let deadline = Instant::now() + Duration::from_secs(5);
        while rt.live_objects() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(rt.live_objects(), 0);
        assert_eq!(bridge.stats().dispatch.discarded, 1);
    }

    #[test]
    fn call_to_released_foreign_object_is_stale() {
        let (bridge, _rt) = default_setup();
        let sel = bridge
            .catalogue()
            .resolve(&"Greeter.Hello".into())
            .expect("selector");
        let err = bridge
            .invoke_foreign(WireRef::from_raw(77), sel, vec![Value::Str("x".into())])
            .expect_err("unknown foreign handle");
        assert!(matches!(err, TetherError::StaleHandle(_)));
    }

    // -- lifecycle --

    #[test]
    fn dropped_objects_are_collected() {
        const N: usize = 16;
        let (bridge, _rt) = default_setup();
        for _ in 0..N {
            bridge
                .expose_to_foreign(Arc::new(Counter::default()))
                .expect("expose");
        }
        bridge.collect();
        assert_eq!(bridge.drain_signals(N, Duration::from_secs(2)), N);
        assert_eq!(bridge.stats().live_handles, 0);
    }

    #[test]
    fn reachable_objects_are_not_collected() {
        const N: usize = 8;
        let (bridge, _rt) = default_setup();
        let mut kept = Vec::new();
        for i in 0..N {
            let obj = Arc::new(Counter::default());
            bridge.expose_to_foreign(obj.clone()).expect("expose");
            if i % 2 == 0 {
                kept.push(obj);
            }
        }
        let start = Instant::now();
        let drained = bridge.drain_signals(N, Duration::from_millis(50));
        assert_eq!(drained, N / 2);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(bridge.stats().live_handles, kept.len());
    }

    #[test]
    fn object_reached_again_before_drain_keeps_its_handle() {
        let (bridge, _rt) = default_setup();
        let h = bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose");
        assert_eq!(bridge.collect(), 1);

        // Host code gets the object back after the signal was queued.
        let again = bridge.resolve(h).expect("still registered");
        assert_eq!(bridge.expose_to_foreign(again.clone()).expect("re-expose"), h);
        assert_eq!(bridge.drain_signals(10, Duration::from_millis(10)), 0);
        assert!(bridge.resolve(h).is_ok());
        assert_eq!(
            bridge.invoke_host(h.to_wire(), "Counter.Incr", vec![WireValue::I64(3)]),
            Ok(WireValue::I64(3))
        );

        drop(again);
        assert_eq!(bridge.drain_signals(10, Duration::from_millis(10)), 1);
        assert!(matches!(bridge.resolve(h), Err(TetherError::StaleHandle(_))));
    }

    #[test]
    fn each_object_signals_once() {
        let (bridge, _rt) = default_setup();
        bridge
            .expose_to_foreign(Arc::new(Counter::default()))
            .expect("expose");
        assert_eq!(bridge.collect(), 1);
        assert_eq!(bridge.collect(), 0);
        assert_eq!(bridge.drain_signals(10, Duration::from_millis(10)), 1);
        assert_eq!(bridge.drain_signals(10, Duration::from_millis(10)), 0);
        assert_eq!(bridge.stats().monitor.emitted, 1);
    }

    // -- shutdown --

    #[test]
    fn shutdown_invalidates_everything() {
        let (bridge, rt) = default_setup();
        let obj = Arc::new(Counter::default());
        let h = bridge.expose_to_foreign(obj.clone()).expect("expose").to_wire();
        let proxy = bridge
            .wrap_foreign_as_proxy(rt.deliver(Arc::new(Greeter)).expect("deliver"), "Greeter")
            .expect("wrap")
            .expect("proxy");

        bridge.shutdown();
        bridge.shutdown();
        assert!(bridge.is_shut_down());
        assert_eq!(
            bridge.invoke_host(h, "Counter.Incr", vec![WireValue::I64(1)]),
            Err(WireFault::ShutDown)
        );
        assert!(matches!(
            bridge.expose_to_foreign(obj),
            Err(TetherError::ShutDown)
        ));
        assert!(matches!(
            proxy.call("Hello", vec![Value::Str("x".into())]),
            Err(TetherError::ShutDown)
        ));
        assert_eq!(bridge.stats().live_handles, 0);
    }
}
