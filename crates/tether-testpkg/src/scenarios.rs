// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end probe scenarios, driven from the foreign side of a loopback
// runtime. Each scenario gets a fresh harness so collections in one cannot
// release objects another still uses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tether_asset::{AssetSource, MemoryAssets};
use tether_bridge::{Bridge, ForeignEnv, ForeignObject, LoopbackRuntime};
use tether_core::error::TetherError;
use tether_core::{BridgeConfig, ForeignError, WireFault, WireRef, WireValue};
use thiserror::Error;
use tracing::{debug, info};

use crate::package::{self, Package};

/// Contents of the bundled `hello.txt`.
pub const HELLO_TEXT: &str = "Hello, Assets.\n";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("setup failed: {0}")]
    Setup(#[from] TetherError),

    #[error("{call} failed: {fault}")]
    Fault { call: String, fault: WireFault },

    #[error("{what}: expected {expected}, got {got}")]
    Unexpected {
        what: String,
        expected: String,
        got: String,
    },
}

pub type ScenarioResult = std::result::Result<(), ScenarioError>;

fn check<T: PartialEq + std::fmt::Debug>(what: &str, got: T, expected: T) -> ScenarioResult {
    if got == expected {
        return Ok(());
    }
    Err(ScenarioError::Unexpected {
        what: what.to_string(),
        expected: format!("{expected:?}"),
        got: format!("{got:?}"),
    })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// In-memory assets holding the bundled `hello.txt`.
pub fn bundled_assets() -> Arc<dyn AssetSource> {
    Arc::new(MemoryAssets::new().with(package::HELLO_ASSET, HELLO_TEXT))
}

/// A bridge over a loopback runtime with the package installed.
pub struct Harness {
    pub bridge: Bridge,
    pub runtime: Arc<LoopbackRuntime>,
    pub package: Arc<Package>,
    pub handle: WireRef,
}

impl Harness {
    pub fn new(config: BridgeConfig, assets: Arc<dyn AssetSource>) -> Result<Self, TetherError> {
        let runtime = Arc::new(LoopbackRuntime::new(&config)?);
        let bridge = Bridge::new(config, crate::catalogue()?, runtime.clone())?;
        let package = Arc::new(Package::new(&bridge, assets));
        let handle = bridge.expose_to_foreign(package.clone())?.to_wire();
        Ok(Self {
            bridge,
            runtime,
            package,
            handle,
        })
    }

    /// Harness whose asset source holds `hello.txt`.
    pub fn with_bundled_assets(config: BridgeConfig) -> Result<Self, TetherError> {
        Self::new(config, bundled_assets())
    }

    pub fn env(&self) -> ForeignEnv {
        self.runtime.env()
    }

    /// Call a package function.
    pub fn call(&self, function: &str, args: Vec<WireValue>) -> Outcome {
        self.call_on(self.handle, &format!("testpkg.Package.{function}"), args)
    }

    /// Call `selector` ("Cap.Method") on any host object.
    pub fn call_on(&self, target: WireRef, selector: &str, args: Vec<WireValue>) -> Outcome {
        Outcome {
            call: selector.to_string(),
            result: self.env().call_host(target, selector, args),
        }
    }

    /// A live reference to one of the foreign side's own objects.
    pub fn export(&self, object: &Arc<dyn ForeignObject>) -> Result<WireRef, ScenarioError> {
        Ok(self.env().export(Arc::clone(object))?)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}

/// A call outcome tagged with what was called.
pub struct Outcome {
    call: String,
    result: Result<WireValue, WireFault>,
}

impl Outcome {
    pub fn ok(self) -> Result<WireValue, ScenarioError> {
        self.result.map_err(|fault| ScenarioError::Fault {
            call: self.call,
            fault,
        })
    }

    pub fn fault(self) -> Result<WireFault, ScenarioError> {
        match self.result {
            Err(fault) => Ok(fault),
            Ok(v) => Err(ScenarioError::Unexpected {
                what: self.call,
                expected: "a fault".into(),
                got: format!("{v:?}"),
            }),
        }
    }

    /// The call must fail with a domain error; returns its message.
    pub fn domain(self) -> Result<String, ScenarioError> {
        let what = self.call.clone();
        let fault = self.fault()?;
        match fault {
            WireFault::Domain(e) => Ok(e.message),
            other => Err(ScenarioError::Unexpected {
                what,
                expected: "a domain error".into(),
                got: other.to_string(),
            }),
        }
    }

    pub fn returns(self, expected: WireValue) -> ScenarioResult {
        let what = self.call.clone();
        check(&what, self.ok()?, expected)
    }

    pub fn host_ref(self) -> Result<WireRef, ScenarioError> {
        let what = self.call.clone();
        match self.ok()? {
            WireValue::Host(r) if !r.is_null() => Ok(r),
            other => Err(ScenarioError::Unexpected {
                what,
                expected: "a host object".into(),
                got: format!("{other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Foreign-side objects
// ---------------------------------------------------------------------------

fn foreign_err(message: impl Into<String>) -> ForeignError {
    ForeignError::new(message)
}

/// Foreign `I2`: doubles instead of multiplying by ten.
struct Doubler;

impl ForeignObject for Doubler {
    fn invoke(&self, _: &ForeignEnv, method: &str, args: Vec<WireValue>) -> Result<WireValue, ForeignError> {
        match (method, args.as_slice()) {
            ("Times", [WireValue::I32(v)]) => Ok(WireValue::I64(i64::from(*v) * 2)),
            ("Error", [WireValue::Bool(true)]) => Err(foreign_err("doubler error")),
            ("Error", [WireValue::Bool(false)]) => Ok(WireValue::Void),
            ("StringError", [WireValue::Str(s)]) => Ok(WireValue::Str(s.clone())),
            _ => Err(foreign_err(format!("Doubler cannot {method}"))),
        }
    }
}

/// Foreign `I`.
struct Eye;

impl ForeignObject for Eye {
    fn invoke(&self, _: &ForeignEnv, method: &str, _args: Vec<WireValue>) -> Result<WireValue, ForeignError> {
        match method {
            "F" => Ok(WireValue::Void),
            "E" => Err(foreign_err("E failed")),
            "V" => Ok(WireValue::I64(42)),
            "VE" => Err(foreign_err("VE failed")),
            "String" => Ok(WireValue::Str("eye".into())),
            _ => Err(foreign_err(format!("Eye cannot {method}"))),
        }
    }
}

/// Hands back whatever it is given.
struct Mirror;

impl ForeignObject for Mirror {
    fn invoke(&self, _: &ForeignEnv, _method: &str, mut args: Vec<WireValue>) -> Result<WireValue, ForeignError> {
        args.pop().ok_or_else(|| foreign_err("nothing to mirror"))
    }
}

struct Nuller;

impl ForeignObject for Nuller {
    fn invoke(&self, _: &ForeignEnv, _method: &str, _args: Vec<WireValue>) -> Result<WireValue, ForeignError> {
        Ok(WireValue::NULL)
    }
}

struct EmptyErr;

impl ForeignObject for EmptyErr {
    fn invoke(&self, _: &ForeignEnv, _method: &str, _args: Vec<WireValue>) -> Result<WireValue, ForeignError> {
        Err(foreign_err(""))
    }
}

/// Records what it is called with.
#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
    last: Mutex<Option<WireValue>>,
}

impl Recorder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last(&self) -> Option<WireValue> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ForeignObject for Recorder {
    fn invoke(&self, _: &ForeignEnv, _method: &str, mut args: Vec<WireValue>) -> Result<WireValue, ForeignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = args.pop();
        Ok(WireValue::Void)
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

pub type Scenario = fn(&Harness) -> ScenarioResult;

pub fn constants(h: &Harness) -> ScenarioResult {
    h.call("AString", vec![]).returns(WireValue::Str(package::A_STRING.into()))?;
    h.call("AnInt", vec![]).returns(WireValue::I64(7))?;
    h.call("ABool", vec![]).returns(WireValue::Bool(true))?;
    h.call("AFloat", vec![]).returns(WireValue::F64(0.12345))?;
    h.call("MinInt32", vec![]).returns(WireValue::I32(i32::MIN))?;
    h.call("MaxInt64", vec![]).returns(WireValue::I64(i64::MAX))?;
    h.call("SmallestNonzeroFloat64", vec![])
        .returns(WireValue::F64(package::SMALLEST_NONZERO_FLOAT64))?;
    h.call("MaxFloat32", vec![]).returns(WireValue::F32(f32::MAX))?;
    h.call("Log2E", vec![]).returns(WireValue::F64(std::f64::consts::LOG2_E))
}

pub fn scalars(h: &Harness) -> ScenarioResult {
    h.call("Add", vec![WireValue::I64(3), WireValue::I64(4)]).returns(WireValue::I64(7))?;
    h.call("Add", vec![WireValue::I64(i64::MAX), WireValue::I64(1)])
        .returns(WireValue::I64(i64::MIN))?;
    h.call("Negate", vec![WireValue::Bool(false)]).returns(WireValue::Bool(true))?;
    h.call("StrDup", vec![WireValue::Str("héllo".into())])
        .returns(WireValue::Str("héllo".into()))?;
    h.call("AppendHello", vec![WireValue::Str("gopher".into())])
        .returns(WireValue::Str("Hello, gopher!".into()))?;
    h.call(
        "BytesAppend",
        vec![WireValue::Bytes(vec![1, 2]), WireValue::Bytes(vec![3])],
    )
    .returns(WireValue::Bytes(vec![1, 2, 3]))?;
    h.call(
        "AppendToString",
        vec![WireValue::Str("ab".into()), WireValue::Bytes(vec![b'c'])],
    )
    .returns(WireValue::Bytes(b"abc".to_vec()))?;
    h.call(
        "UnnamedParams",
        vec![WireValue::I64(1), WireValue::I64(2), WireValue::Str("four".into())],
    )
    .returns(WireValue::I64(4))?;
    // Wrong argument kind is a bridge fault, not a domain error.
    let fault = h.call("Add", vec![WireValue::Str("3".into()), WireValue::I64(4)]).fault()?;
    check("Add(string, i64)", matches!(fault, WireFault::TypeMismatch { .. }), true)
}

pub fn errors(h: &Harness) -> ScenarioResult {
    h.call("Err", vec![WireValue::Str(String::new())]).returns(WireValue::Void)?;
    check(
        "Err(boom)",
        h.call("Err", vec![WireValue::Str("boom".into())]).domain()?,
        "boom".to_string(),
    )?;
    h.call("ReturnsError", vec![WireValue::Bool(false)])
        .returns(WireValue::Str("OK".into()))?;
    check(
        "ReturnsError(true)",
        h.call("ReturnsError", vec![WireValue::Bool(true)]).domain()?,
        "Error".to_string(),
    )?;
    // An empty message is still an error.
    check("EmptyError", h.call("EmptyError", vec![]).domain()?, String::new())?;
    check(
        "CallEmptyError",
        {
            let errorer: Arc<dyn ForeignObject> = Arc::new(EmptyErr);
            let w = h.export(&errorer)?;
            h.call("CallEmptyError", vec![WireValue::Foreign(w)]).domain()?
        },
        String::new(),
    )?;

    let global = h.call("GlobalErr", vec![]).ok()?;
    h.call("IsGlobalErr", vec![global.clone()]).returns(WireValue::Bool(true))?;
    h.call("ErrorMessage", vec![global]).returns(WireValue::Str("global err".into()))?;
    // Same text, different error.
    let lookalike = WireValue::Error(Some(ForeignError::new("global err")));
    h.call("IsGlobalErr", vec![lookalike]).returns(WireValue::Bool(false))?;
    h.call("IsGlobalErr", vec![WireValue::Error(None)]).returns(WireValue::Bool(false))
}

pub fn host_i2(h: &Harness) -> ScenarioResult {
    let i = h.call("NewI", vec![]).host_ref()?;
    h.call_on(i, "testpkg.I2.Times", vec![WireValue::I32(7)])
        .returns(WireValue::I64(70))?;
    check(
        "CallIError(true)",
        h.call("CallIError", vec![WireValue::Host(i), WireValue::Bool(true)]).domain()?,
        "some error".to_string(),
    )?;
    h.call("CallIError", vec![WireValue::Host(i), WireValue::Bool(false)])
        .returns(WireValue::Void)?;
    h.call(
        "CallIStringError",
        vec![WireValue::Host(i), WireValue::Str("echo".into())],
    )
    .returns(WireValue::Str("echo".into()))?;
    h.call("I2Dup", vec![WireValue::Host(i)]).returns(WireValue::Host(i))?;
    h.env().release_host(i);
    check(
        "call on released I2",
        matches!(
            h.call_on(i, "testpkg.I2.Times", vec![WireValue::I32(1)]).fault()?,
            WireFault::StaleHandle(_)
        ),
        true,
    )
}

pub fn foreign_i2(h: &Harness) -> ScenarioResult {
    let doubler: Arc<dyn ForeignObject> = Arc::new(Doubler);
    let w = h.export(&doubler)?;
    h.call("I2Dup", vec![WireValue::Foreign(w)]).returns(WireValue::Foreign(w))?;
    check(
        "CallIError(foreign, true)",
        h.call(
            "CallIError",
            vec![WireValue::Foreign(h.export(&doubler)?), WireValue::Bool(true)],
        )
        .domain()?,
        "doubler error".to_string(),
    )?;

    let w = h.export(&doubler)?;
    h.call("RegisterI", vec![WireValue::I32(1), WireValue::Foreign(w)])
        .returns(WireValue::Void)?;
    check("pinned foreign refs", h.runtime.ref_count(w), Some(1))?;
    h.call("Multiply", vec![WireValue::I32(1), WireValue::I32(21)])
        .returns(WireValue::I64(42))?;
    h.call("UnregisterI", vec![WireValue::I32(1)]).returns(WireValue::Void)?;
    check("unpinned foreign refs", h.runtime.ref_count(w), None)?;
    let message = h
        .call("Multiply", vec![WireValue::I32(1), WireValue::I32(21)])
        .domain()?;
    check("Multiply(unregistered)", message.contains("unknown I2"), true)?;

    // A host I2 pinned under the same index.
    let mine = h.call("NewI", vec![]).host_ref()?;
    h.call("RegisterI", vec![WireValue::I32(1), WireValue::Host(mine)])
        .returns(WireValue::Void)?;
    h.call("Multiply", vec![WireValue::I32(1), WireValue::I32(4)])
        .returns(WireValue::I64(40))
}

pub fn foreign_i(h: &Harness) -> ScenarioResult {
    let eye: Arc<dyn ForeignObject> = Arc::new(Eye);
    let arg = |h: &Harness| -> Result<Vec<WireValue>, ScenarioError> {
        Ok(vec![WireValue::Foreign(h.export(&eye)?)])
    };
    h.call("CallF", arg(h)?).returns(WireValue::Void)?;
    check("CallE", h.call("CallE", arg(h)?).domain()?, "E failed".to_string())?;
    h.call("CallV", arg(h)?).returns(WireValue::I64(42))?;
    check("CallVE", h.call("CallVE", arg(h)?).domain()?, "VE failed".to_string())?;

    let w = h.export(&eye)?;
    h.call("CallI", vec![WireValue::Foreign(w)]).returns(WireValue::Foreign(w))?;
    let w = h.export(&eye)?;
    h.call("IDup", vec![WireValue::Foreign(w)]).returns(WireValue::Foreign(w))?;

    let w = h.export(&eye)?;
    h.call("Keep", vec![WireValue::Foreign(w)]).returns(WireValue::Void)?;
    check("kept", h.package.kept(), 1)?;
    check("kept foreign refs", h.runtime.ref_count(w), Some(1))
}

pub fn s_objects(h: &Harness) -> ScenarioResult {
    let s = h.call("New", vec![]).host_ref()?;
    h.call_on(s, "testpkg.S.String", vec![]).returns(WireValue::Str("new0".into()))?;
    h.call_on(s, "testpkg.S.F", vec![]).returns(WireValue::Void)?;
    h.env().release_host(s);
    h.call("NumSCollected", vec![]).returns(WireValue::I64(1))?;

    // Dropped without an explicit release: found by a collection.
    let s = h.call("New", vec![]).host_ref()?;
    h.call_on(s, "testpkg.S.String", vec![]).returns(WireValue::Str("new1".into()))?;
    h.call("GC", vec![]).returns(WireValue::Void)?;
    h.call("NumSCollected", vec![]).returns(WireValue::I64(2))?;

    let eye: Arc<dyn ForeignObject> = Arc::new(Eye);
    let plain = h
        .call("CallS", vec![WireValue::Foreign(h.export(&eye)?)])
        .host_ref()?;
    h.call_on(plain, "testpkg.S.String", vec![]).returns(WireValue::Str(String::new()))?;
    h.env().release_host(plain);
    h.call("NumSCollected", vec![]).returns(WireValue::I64(2))
}

pub fn duppers(h: &Harness) -> ScenarioResult {
    let mirror: Arc<dyn ForeignObject> = Arc::new(Mirror);
    h.call("CallIDupper", vec![WireValue::Foreign(h.export(&mirror)?)])
        .returns(WireValue::Bool(true))?;
    h.call("CallCDupper", vec![WireValue::Foreign(h.export(&mirror)?)])
        .returns(WireValue::Bool(true))?;

    let c = h.call("NewConcrete", vec![]).host_ref()?;
    h.call_on(c, "testpkg.Concrete.F", vec![]).returns(WireValue::Void)?;
    h.call_on(c, "testpkg.Interface.F", vec![]).returns(WireValue::Void)?;
    // Concrete is not an I2.
    let fault = h.call("I2Dup", vec![WireValue::Host(c)]).fault()?;
    check("I2Dup(Concrete)", matches!(fault, WireFault::TypeMismatch { .. }), true)
}

pub fn nulls(h: &Harness) -> ScenarioResult {
    let nuller: Arc<dyn ForeignObject> = Arc::new(Nuller);
    h.call(
        "CallWithNull",
        vec![WireValue::NULL, WireValue::Foreign(h.export(&nuller)?)],
    )
    .returns(WireValue::Bool(true))?;
    h.call("NewNullInterface", vec![]).returns(WireValue::NULL)?;
    h.call("NewNullStruct", vec![]).returns(WireValue::NULL)?;
    h.call("I2Dup", vec![WireValue::NULL]).returns(WireValue::NULL)?;

    // Methods called through null yield null results where the type has one.
    h.call_on(WireRef::NULL, "testpkg.S.F", vec![]).returns(WireValue::Void)?;
    let fault = h.call_on(WireRef::NULL, "testpkg.S.String", vec![]).fault()?;
    check(
        "String() on null",
        fault,
        WireFault::NullReceiver("testpkg.S.String".into()),
    )?;

    let message = h.call("CallIError", vec![WireValue::NULL, WireValue::Bool(true)]).domain()?;
    check("CallIError(null)", message, format!("nil {}", crate::glue::cap::I2))
}

pub fn callbacks(h: &Harness) -> ScenarioResult {
    let receiver = Arc::new(Recorder::default());
    let obj: Arc<dyn ForeignObject> = receiver.clone();
    h.call(
        "Hello",
        vec![WireValue::Foreign(h.export(&obj)?), WireValue::Str("gopher".into())],
    )
    .returns(WireValue::Void)?;
    check(
        "Hello message",
        receiver.last(),
        Some(WireValue::Str("Hello, gopher!\n".into())),
    )?;

    let counter = Arc::new(Recorder::default());
    let obj: Arc<dyn ForeignObject> = counter.clone();
    h.call("CallWithCallback", vec![WireValue::Foreign(h.export(&obj)?)])
        .returns(WireValue::Void)?;
    check("VarUpdate calls", counter.calls(), package::CALLBACK_ROUNDS)?;

    let sink = Arc::new(Recorder::default());
    let obj: Arc<dyn ForeignObject> = sink.clone();
    h.call("PassByteArray", vec![WireValue::Foreign(h.export(&obj)?)])
        .returns(WireValue::Void)?;
    check("B bytes", sink.last(), Some(WireValue::Bytes(vec![1, 2, 3, 4])))
}

pub fn goroutine_callback(h: &Harness) -> ScenarioResult {
    let receiver = Arc::new(Recorder::default());
    let obj: Arc<dyn ForeignObject> = receiver.clone();
    let w = h.export(&obj)?;
    // Started from a foreign thread the host has never seen.
    let env = h.env();
    let target = h.handle;
    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let worker = env.spawn(move |env| {
        let result = env.call_host(
            target,
            "testpkg.Package.GoroutineCallback",
            vec![WireValue::Foreign(w)],
        );
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    })?;
    if worker.join().is_err() {
        return Err(ScenarioError::Unexpected {
            what: "foreign thread".into(),
            expected: "clean exit".into(),
            got: "panic".into(),
        });
    }
    let result = outcome.lock().unwrap_or_else(PoisonError::into_inner).take();
    check("GoroutineCallback", result, Some(Ok(WireValue::Void)))?;
    check("Hello calls", receiver.calls(), package::GOROUTINE_CALLS)?;
    check("attached threads", h.bridge.stats().attached_threads, 0)
}

pub fn s2_collection(h: &Harness) -> ScenarioResult {
    const N: usize = 10;
    let mut refs = Vec::with_capacity(N);
    for i in 0..N {
        let x = i as f64;
        refs.push(
            h.call("NewS2", vec![WireValue::F64(x), WireValue::F64(1.5)])
                .host_ref()?,
        );
    }
    h.call("CallSSum", vec![WireValue::Host(refs[3])])
        .returns(WireValue::F64(4.5))?;
    h.call_on(
        refs[0],
        "testpkg.S2.TryTwoStrings",
        vec![WireValue::Str("foo".into()), WireValue::Str("bar".into())],
    )
    .returns(WireValue::Str("foobar".into()))?;

    // Half are released explicitly, the rest are left for collection.
    for r in &refs[..N / 2] {
        h.env().release_host(*r);
    }
    debug!(live = h.bridge.stats().live_handles, "S2 references dropped");
    h.call("CollectS2", vec![WireValue::I64(N as i64), WireValue::I64(5)])
        .returns(WireValue::I64(N as i64))?;
    // Nothing left to collect: times out with zero.
    h.call("CollectS2", vec![WireValue::I64(1), WireValue::I64(0)])
        .returns(WireValue::I64(0))
}

pub fn assets(h: &Harness) -> ScenarioResult {
    h.call("ReadAsset", vec![]).returns(WireValue::Str(HELLO_TEXT.into()))
}

pub fn s4(h: &Harness) -> ScenarioResult {
    let a = h.call("NewS4WithInt", vec![WireValue::I64(5)]).host_ref()?;
    h.call_on(a, "testpkg.S4.I", vec![]).returns(WireValue::I64(5))?;
    let b = h.call("NewS4WithFloat", vec![WireValue::F64(6.9)]).host_ref()?;
    h.call_on(b, "testpkg.S4.I", vec![]).returns(WireValue::I64(6))?;
    let c = h
        .call("NewS4WithBoolAndError", vec![WireValue::Bool(false)])
        .host_ref()?;
    h.call_on(c, "testpkg.S4.I", vec![]).returns(WireValue::I64(0))?;
    let message = h
        .call("NewS4WithBoolAndError", vec![WireValue::Bool(true)])
        .domain()?;
    check("NewS4WithBoolAndError(true)", message, "some error".to_string())
}

/// Every scenario, in the order the probe runs them.
pub const ALL: &[(&str, Scenario)] = &[
    ("constants", constants),
    ("scalars", scalars),
    ("errors", errors),
    ("host_i2", host_i2),
    ("foreign_i2", foreign_i2),
    ("foreign_i", foreign_i),
    ("s_objects", s_objects),
    ("duppers", duppers),
    ("nulls", nulls),
    ("callbacks", callbacks),
    ("goroutine_callback", goroutine_callback),
    ("s2_collection", s2_collection),
    ("assets", assets),
    ("s4", s4),
];

/// Run one scenario against a fresh harness.
pub fn run(
    config: &BridgeConfig,
    assets: &Arc<dyn AssetSource>,
    name: &str,
    scenario: Scenario,
) -> ScenarioResult {
    let harness = Harness::new(config.clone(), Arc::clone(assets))?;
    let outcome = scenario(&harness);
    match &outcome {
        Ok(()) => info!(scenario = name, "scenario passed"),
        Err(e) => info!(scenario = name, error = %e, "scenario failed"),
    }
    outcome
}
