// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The package object: every package-level function, exposed as capability
// `testpkg.Package`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tether_asset::AssetSource;
use tether_bridge::{
    Args, Bridge, CapabilityImpl, Handle, HandleTable, HostObject, MethodFn, ObjectRef, Value,
    WeakBridge, receiver,
};
use tether_core::HostError;
use tether_core::error::{Result, TetherError};
use tracing::{debug, info, instrument};

use crate::glue::{
    self, ByteSink, ConcreteDupper, EmptyErrorer, ForeignI, GoCallback, I2 as _, InterfaceDupper,
    NullTest, Receiver, cap,
};
use crate::types::{Collected, Concrete, MyI2, S, S2, S4};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const A_STRING: &str = "a string";
pub const AN_INT: i64 = 7;
pub const A_BOOL: bool = true;
pub const A_FLOAT: f64 = 0.12345;

pub const MIN_INT32: i32 = i32::MIN;
pub const MAX_INT32: i32 = i32::MAX;
pub const MIN_INT64: i64 = i64::MIN;
pub const MAX_INT64: i64 = i64::MAX;
pub const SMALLEST_NONZERO_FLOAT64: f64 = f64::from_bits(1);
pub const MAX_FLOAT64: f64 = f64::MAX;
pub const MAX_FLOAT32: f32 = f32::MAX;
pub const LOG2E: f64 = std::f64::consts::LOG2_E;

/// Name of the asset `ReadAsset` returns.
pub const HELLO_ASSET: &str = "hello.txt";

/// `VarUpdate` calls made by `CallWithCallback`.
pub const CALLBACK_ROUNDS: usize = 1000;

/// `Hello` calls made by `GoroutineCallback`.
pub const GOROUTINE_CALLS: usize = 100_000;

static GLOBAL_ERR: LazyLock<HostError> = LazyLock::new(|| HostError::new("global err"));

/// The package-level error value. The same error every time.
pub fn global_err() -> &'static HostError {
    &GLOBAL_ERR
}

// ---------------------------------------------------------------------------
// Pinned I2 values
// ---------------------------------------------------------------------------

/// Caller-chosen indices aliasing handles in a generational table, so an
/// index reused after `unregister` can never reach the old value.
struct PinnedI2s {
    aliases: Mutex<HashMap<i32, Handle>>,
    table: HandleTable<Arc<dyn glue::I2>>,
}

impl PinnedI2s {
    fn new() -> Self {
        Self {
            aliases: Mutex::new(HashMap::new()),
            table: HandleTable::new(1, 1 << 16),
        }
    }

    fn register(&self, idx: i32, i: Arc<dyn glue::I2>) -> Result<()> {
        let mut aliases = self.aliases.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = self.table.register(i)?;
        if let Some(old) = aliases.insert(idx, handle) {
            self.table.release(old);
        }
        debug!(idx, %handle, "I2 pinned");
        Ok(())
    }

    fn unregister(&self, idx: i32) {
        let mut aliases = self.aliases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = aliases.remove(&idx) {
            self.table.release(handle);
        }
    }

    fn get(&self, idx: i32) -> Result<Arc<dyn glue::I2>> {
        let handle = self
            .aliases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&idx)
            .copied()
            .ok_or_else(|| HostError::new(format!("unknown I2 with index {idx}")))?;
        self.table.resolve(handle)
    }
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

pub struct Package {
    bridge: WeakBridge,
    assets: Arc<dyn AssetSource>,
    kept: Mutex<Vec<ObjectRef>>,
    s_seq: AtomicU64,
    s_collected: Arc<AtomicI64>,
    s2_collected: Arc<Collected>,
    pinned: PinnedI2s,
}

impl Package {
    pub fn new(bridge: &Bridge, assets: Arc<dyn AssetSource>) -> Self {
        Self {
            bridge: bridge.downgrade(),
            assets,
            kept: Mutex::new(Vec::new()),
            s_seq: AtomicU64::new(0),
            s_collected: Arc::new(AtomicI64::new(0)),
            s2_collected: Arc::new(Collected::default()),
            pinned: PinnedI2s::new(),
        }
    }

    fn bridge(&self) -> Result<Bridge> {
        self.bridge.upgrade().ok_or(TetherError::ShutDown)
    }

    /// Objects held by `Keep`.
    pub fn kept(&self) -> usize {
        self.kept.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn num_s_collected(&self) -> i64 {
        self.s_collected.load(Ordering::SeqCst)
    }

    /// Let the bridge release what the foreign side no longer holds.
    pub fn gc(&self) -> Result<usize> {
        Ok(self.bridge()?.drain_signals(usize::MAX, Duration::ZERO))
    }

    /// Wait for up to `want` `S2` objects to be dropped, collecting in
    /// between. Returns how many were seen before `timeout`.
    #[instrument(skip(self))]
    pub fn collect_s2(&self, want: usize, timeout: Duration) -> Result<usize> {
        let bridge = self.bridge()?;
        let deadline = Instant::now() + timeout;
        let poll = bridge.config().drain_poll_interval();
        let mut seen = 0;
        while seen < want {
            bridge.drain_signals(usize::MAX, Duration::ZERO);
            let now = Instant::now();
            if now >= deadline {
                info!(seen, want, "S2 collection timed out");
                break;
            }
            seen += self.s2_collected.take(want - seen, deadline.min(now + poll));
        }
        Ok(seen)
    }

    pub fn read_asset(&self) -> Result<String> {
        let bytes = self.assets.open(HELLO_ASSET)?;
        String::from_utf8(bytes).map_err(|e| HostError::new(e.to_string()).into())
    }
}

fn pkg(this: &dyn Any) -> Result<&Package> {
    receiver::<Package>(this)
}

// -- constants --

fn a_string(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::Str(A_STRING.to_string()))
}

fn an_int(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::I64(AN_INT))
}

fn a_bool(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::Bool(A_BOOL))
}

fn a_float(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::F64(A_FLOAT))
}

fn min_int32(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::I32(MIN_INT32))
}

fn max_int32(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::I32(MAX_INT32))
}

fn min_int64(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::I64(MIN_INT64))
}

fn max_int64(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::I64(MAX_INT64))
}

fn smallest_nonzero_float64(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::F64(SMALLEST_NONZERO_FLOAT64))
}

fn max_float64(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::F64(MAX_FLOAT64))
}

fn max_float32(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::F32(MAX_FLOAT32))
}

fn log2e(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::F64(LOG2E))
}

// -- scalars, strings and bytes --

fn add(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::I64(args.i64(0)?.wrapping_add(args.i64(1)?)))
}

fn negate(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::Bool(!args.bool(0)?))
}

fn str_dup(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::Str(args.string(0)?))
}

fn append_hello(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::Str(format!("Hello, {}!", args.string(0)?)))
}

fn bytes_append(_: &dyn Any, mut args: Args) -> Result<Value> {
    let mut a = args.bytes(0)?;
    a.extend_from_slice(&args.bytes(1)?);
    Ok(Value::Bytes(a))
}

fn append_to_string(_: &dyn Any, mut args: Args) -> Result<Value> {
    let mut out = args.string(0)?.into_bytes();
    out.extend_from_slice(&args.bytes(1)?);
    Ok(Value::Bytes(out))
}

fn unnamed_params(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::I64(args.string(2)?.len() as i64))
}

// -- errors --

fn err(_: &dyn Any, mut args: Args) -> Result<Value> {
    let s = args.string(0)?;
    if s.is_empty() {
        return Ok(Value::Void);
    }
    Err(HostError::new(s).into())
}

fn returns_error(_: &dyn Any, mut args: Args) -> Result<Value> {
    if args.bool(0)? {
        return Err(HostError::new("Error").into());
    }
    Ok(Value::Str("OK".into()))
}

fn empty_error(_: &dyn Any, _: Args) -> Result<Value> {
    Err(HostError::new("").into())
}

fn call_empty_error(_: &dyn Any, mut args: Args) -> Result<Value> {
    EmptyErrorer::from_arg(args.object(0)?)?.empty_error()?;
    Ok(Value::Void)
}

fn error_message(_: &dyn Any, mut args: Args) -> Result<Value> {
    let message = args
        .error(0)?
        .map(|e| e.message().to_string())
        .unwrap_or_default();
    Ok(Value::Str(message))
}

fn global_err_value(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::Error(Some(global_err().clone())))
}

fn is_global_err(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::Bool(args.error(0)?.as_ref() == Some(global_err())))
}

// -- I2 --

fn new_i(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::host(Arc::new(MyI2)))
}

fn call_i_error(_: &dyn Any, mut args: Args) -> Result<Value> {
    let trigger = args.bool(1)?;
    glue::i2(args.object(0)?)?.error(trigger)?;
    Ok(Value::Void)
}

fn call_i_string_error(_: &dyn Any, mut args: Args) -> Result<Value> {
    let s = args.string(1)?;
    Ok(Value::Str(glue::i2(args.object(0)?)?.string_error(&s)?))
}

/// Hands its argument straight back; identity is the point.
fn dup(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::Object(args.object(0)?))
}

// -- I --

fn call_f(_: &dyn Any, mut args: Args) -> Result<Value> {
    ForeignI::from_arg(args.object(0)?)?.f()?;
    Ok(Value::Void)
}

fn call_e(_: &dyn Any, mut args: Args) -> Result<Value> {
    ForeignI::from_arg(args.object(0)?)?.e()?;
    Ok(Value::Void)
}

fn call_v(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::I64(ForeignI::from_arg(args.object(0)?)?.v()?))
}

fn call_ve(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::I64(ForeignI::from_arg(args.object(0)?)?.ve()?))
}

fn call_s(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::host(Arc::new(S::untracked(""))))
}

fn keep(this: &dyn Any, mut args: Args) -> Result<Value> {
    let this = pkg(this)?;
    if let Some(obj) = args.object(0)? {
        this.kept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(obj);
    }
    Ok(Value::Void)
}

// -- S --

fn new_s(this: &dyn Any, _: Args) -> Result<Value> {
    let this = pkg(this)?;
    let seq = this.s_seq.fetch_add(1, Ordering::Relaxed);
    Ok(Value::host(Arc::new(S::tracked(
        format!("new{seq}"),
        Arc::clone(&this.s_collected),
    ))))
}

fn num_s_collected(this: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::I64(pkg(this)?.num_s_collected()))
}

// -- duppers and nulls --

fn call_i_dupper(_: &dyn Any, mut args: Args) -> Result<Value> {
    let dupper = InterfaceDupper::from_arg(args.object(0)?)?;
    let want = Arc::new(Concrete);
    let got = dupper.idup(Arc::clone(&want) as Arc<dyn glue::Interface>)?;
    let same = got.is_some_and(|g| glue::Interface::object_ref(g).same(&ObjectRef::host(want)));
    Ok(Value::Bool(same))
}

fn call_c_dupper(_: &dyn Any, mut args: Args) -> Result<Value> {
    let dupper = ConcreteDupper::from_arg(args.object(0)?)?;
    let want = Arc::new(Concrete);
    let got = dupper.cdup(Arc::clone(&want))?;
    Ok(Value::Bool(got.is_some_and(|g| Arc::ptr_eq(&g, &want))))
}

fn new_concrete(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::host(Arc::new(Concrete)))
}

fn call_with_null(_: &dyn Any, mut args: Args) -> Result<Value> {
    let null = args.object(0)?;
    let nuller = NullTest::from_arg(args.object(1)?)?;
    Ok(Value::Bool(null.is_none() && nuller.null()?.is_none()))
}

fn new_null(_: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::null())
}

// -- callbacks --

fn hello(_: &dyn Any, mut args: Args) -> Result<Value> {
    let name = args.string(1)?;
    Receiver::from_arg(args.object(0)?)?.hello(&format!("Hello, {name}!\n"))?;
    Ok(Value::Void)
}

fn call_with_callback(_: &dyn Any, mut args: Args) -> Result<Value> {
    let cb = GoCallback::from_arg(args.object(0)?)?;
    for _ in 0..CALLBACK_ROUNDS {
        cb.var_update()?;
    }
    Ok(Value::Void)
}

/// Calls back from a thread the foreign side has never seen.
fn goroutine_callback(_: &dyn Any, mut args: Args) -> Result<Value> {
    let r = Receiver::from_arg(args.object(0)?)?;
    let worker = std::thread::Builder::new()
        .name("testpkg-callback".into())
        .spawn(move || -> Result<()> {
            let message = "Hello".repeat(46);
            for _ in 0..GOROUTINE_CALLS {
                r.hello(&message)?;
            }
            Ok(())
        })?;
    worker
        .join()
        .map_err(|_| HostError::new("callback thread panicked"))??;
    Ok(Value::Void)
}

fn pass_byte_array(_: &dyn Any, mut args: Args) -> Result<Value> {
    ByteSink::from_arg(args.object(0)?)?.b(vec![1, 2, 3, 4])?;
    Ok(Value::Void)
}

// -- pinned I2 --

fn register_i(this: &dyn Any, mut args: Args) -> Result<Value> {
    let idx = args.i32(0)?;
    let i = glue::i2(args.object(1)?)?;
    pkg(this)?.pinned.register(idx, i)?;
    Ok(Value::Void)
}

fn unregister_i(this: &dyn Any, mut args: Args) -> Result<Value> {
    pkg(this)?.pinned.unregister(args.i32(0)?);
    Ok(Value::Void)
}

fn multiply(this: &dyn Any, mut args: Args) -> Result<Value> {
    let idx = args.i32(0)?;
    let val = args.i32(1)?;
    Ok(Value::I64(pkg(this)?.pinned.get(idx)?.times(val)?))
}

// -- S2 and collection --

fn new_s2(this: &dyn Any, mut args: Args) -> Result<Value> {
    let this = pkg(this)?;
    let x = args.f64(0)?;
    let y = args.f64(1)?;
    Ok(Value::host(Arc::new(S2::new(
        x,
        y,
        Arc::clone(&this.s2_collected),
    ))))
}

fn call_s_sum(_: &dyn Any, mut args: Args) -> Result<Value> {
    let s = args
        .object(0)?
        .and_then(|obj| obj.downcast::<S2>())
        .ok_or_else(|| HostError::new("nil S2"))?;
    Ok(Value::F64(s.sum()))
}

fn collect_s2(this: &dyn Any, mut args: Args) -> Result<Value> {
    let want = usize::try_from(args.i64(0)?).unwrap_or(0);
    let timeout = Duration::from_secs(u64::try_from(args.i64(1)?).unwrap_or(0));
    let seen = pkg(this)?.collect_s2(want, timeout)?;
    Ok(Value::I64(seen as i64))
}

fn gc(this: &dyn Any, _: Args) -> Result<Value> {
    pkg(this)?.gc()?;
    Ok(Value::Void)
}

// -- assets and S4 --

fn read_asset(this: &dyn Any, _: Args) -> Result<Value> {
    Ok(Value::Str(pkg(this)?.read_asset()?))
}

fn new_s4_with_int(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::host(Arc::new(S4 { i: args.i64(0)? })))
}

fn new_s4_with_float(_: &dyn Any, mut args: Args) -> Result<Value> {
    Ok(Value::host(Arc::new(S4 {
        i: args.f64(0)? as i64,
    })))
}

fn new_s4_with_bool_and_error(_: &dyn Any, mut args: Args) -> Result<Value> {
    if args.bool(0)? {
        return Err(HostError::new("some error").into());
    }
    Ok(Value::host(Arc::new(S4::default())))
}

static PACKAGE_METHODS: [(&str, MethodFn); 61] = [
    ("AString", a_string),
    ("AnInt", an_int),
    ("ABool", a_bool),
    ("AFloat", a_float),
    ("MinInt32", min_int32),
    ("MaxInt32", max_int32),
    ("MinInt64", min_int64),
    ("MaxInt64", max_int64),
    ("SmallestNonzeroFloat64", smallest_nonzero_float64),
    ("MaxFloat64", max_float64),
    ("MaxFloat32", max_float32),
    ("Log2E", log2e),
    ("Add", add),
    ("Negate", negate),
    ("StrDup", str_dup),
    ("AppendHello", append_hello),
    ("BytesAppend", bytes_append),
    ("AppendToString", append_to_string),
    ("UnnamedParams", unnamed_params),
    ("Err", err),
    ("ReturnsError", returns_error),
    ("EmptyError", empty_error),
    ("CallEmptyError", call_empty_error),
    ("ErrorMessage", error_message),
    ("GlobalErr", global_err_value),
    ("IsGlobalErr", is_global_err),
    ("NewI", new_i),
    ("CallIError", call_i_error),
    ("CallIStringError", call_i_string_error),
    ("I2Dup", dup),
    ("IDup", dup),
    ("CallF", call_f),
    ("CallE", call_e),
    ("CallV", call_v),
    ("CallVE", call_ve),
    ("CallI", dup),
    ("CallS", call_s),
    ("Keep", keep),
    ("New", new_s),
    ("NumSCollected", num_s_collected),
    ("CallIDupper", call_i_dupper),
    ("CallCDupper", call_c_dupper),
    ("NewConcrete", new_concrete),
    ("CallWithNull", call_with_null),
    ("NewNullInterface", new_null),
    ("NewNullStruct", new_null),
    ("Hello", hello),
    ("CallWithCallback", call_with_callback),
    ("GoroutineCallback", goroutine_callback),
    ("PassByteArray", pass_byte_array),
    ("RegisterI", register_i),
    ("UnregisterI", unregister_i),
    ("Multiply", multiply),
    ("NewS2", new_s2),
    ("CallSSum", call_s_sum),
    ("CollectS2", collect_s2),
    ("GC", gc),
    ("ReadAsset", read_asset),
    ("NewS4WithInt", new_s4_with_int),
    ("NewS4WithFloat", new_s4_with_float),
    ("NewS4WithBoolAndError", new_s4_with_bool_and_error),
];

static PACKAGE_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
    name: cap::PACKAGE,
    methods: &PACKAGE_METHODS,
}];

impl HostObject for Package {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn capabilities(&self) -> &'static [CapabilityImpl] {
        &PACKAGE_CAPS
    }
}
