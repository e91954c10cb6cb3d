// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host types the package hands out.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use tether_bridge::{Args, CapabilityImpl, HostObject, MethodFn, ObjectRef, Value, receiver};
use tether_core::HostError;
use tether_core::error::Result;
use tracing::debug;

use crate::glue::{self, cap};

macro_rules! host_object {
    ($ty:ty, $caps:expr) => {
        impl HostObject for $ty {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
                self
            }

            fn capabilities(&self) -> &'static [CapabilityImpl] {
                &$caps
            }
        }
    };
}

// ---------------------------------------------------------------------------
// MyI2
// ---------------------------------------------------------------------------

/// The host's own `I2`.
#[derive(Debug, Default)]
pub struct MyI2;

impl glue::I2 for MyI2 {
    fn times(&self, v: i32) -> Result<i64> {
        Ok(i64::from(v) * 10)
    }

    fn error(&self, trigger: bool) -> Result<()> {
        if trigger {
            return Err(HostError::new("some error").into());
        }
        Ok(())
    }

    fn string_error(&self, s: &str) -> Result<String> {
        Ok(s.to_string())
    }

    fn object_ref(self: Arc<Self>) -> ObjectRef {
        ObjectRef::Host(self)
    }
}

fn my_i2_times(this: &dyn Any, mut args: Args) -> Result<Value> {
    let this = receiver::<MyI2>(this)?;
    Ok(Value::I64(glue::I2::times(this, args.i32(0)?)?))
}

fn my_i2_error(this: &dyn Any, mut args: Args) -> Result<Value> {
    let this = receiver::<MyI2>(this)?;
    glue::I2::error(this, args.bool(0)?)?;
    Ok(Value::Void)
}

fn my_i2_string_error(this: &dyn Any, mut args: Args) -> Result<Value> {
    let this = receiver::<MyI2>(this)?;
    Ok(Value::Str(glue::I2::string_error(this, &args.string(0)?)?))
}

static MY_I2_METHODS: [(&str, MethodFn); 3] = [
    ("Times", my_i2_times),
    ("Error", my_i2_error),
    ("StringError", my_i2_string_error),
];

static MY_I2_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
    name: cap::I2,
    methods: &MY_I2_METHODS,
}];

host_object!(MyI2, MY_I2_CAPS);

// ---------------------------------------------------------------------------
// Concrete
// ---------------------------------------------------------------------------

/// Implements `Interface` and is also exposed as a concrete type.
#[derive(Debug, Default)]
pub struct Concrete;

impl glue::Interface for Concrete {
    fn f(&self) -> Result<()> {
        Ok(())
    }

    fn object_ref(self: Arc<Self>) -> ObjectRef {
        ObjectRef::Host(self)
    }
}

fn concrete_f(this: &dyn Any, _args: Args) -> Result<Value> {
    glue::Interface::f(receiver::<Concrete>(this)?)?;
    Ok(Value::Void)
}

static CONCRETE_METHODS: [(&str, MethodFn); 1] = [("F", concrete_f)];

static CONCRETE_CAPS: [CapabilityImpl; 2] = [
    CapabilityImpl {
        name: cap::CONCRETE,
        methods: &CONCRETE_METHODS,
    },
    CapabilityImpl {
        name: cap::INTERFACE,
        methods: &CONCRETE_METHODS,
    },
];

host_object!(Concrete, CONCRETE_CAPS);

// ---------------------------------------------------------------------------
// S
// ---------------------------------------------------------------------------

/// Named object. Tracked instances count their drops.
#[derive(Debug)]
pub struct S {
    name: String,
    collected: Option<Arc<AtomicI64>>,
}

impl S {
    pub fn tracked(name: impl Into<String>, collected: Arc<AtomicI64>) -> Self {
        Self {
            name: name.into(),
            collected: Some(collected),
        }
    }

    pub fn untracked(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collected: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for S {
    fn drop(&mut self) {
        if let Some(n) = &self.collected {
            n.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn s_f(this: &dyn Any, _args: Args) -> Result<Value> {
    let this = receiver::<S>(this)?;
    debug!(name = %this.name, "F called");
    Ok(Value::Void)
}

fn s_string(this: &dyn Any, _args: Args) -> Result<Value> {
    Ok(Value::Str(receiver::<S>(this)?.name.clone()))
}

static S_METHODS: [(&str, MethodFn); 2] = [("F", s_f), ("String", s_string)];

static S_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
    name: cap::S,
    methods: &S_METHODS,
}];

host_object!(S, S_CAPS);

// ---------------------------------------------------------------------------
// S2
// ---------------------------------------------------------------------------

/// Counts `S2` drops and lets a caller wait for them.
#[derive(Debug, Default)]
pub struct Collected {
    count: Mutex<usize>,
    ready: Condvar,
}

impl Collected {
    fn note(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.ready.notify_all();
    }

    /// Consume up to `want` recorded drops, waiting until `deadline` for at
    /// least one if none are recorded yet.
    pub fn take(&self, want: usize, deadline: Instant) -> usize {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if *count == 0 && now < deadline {
            count = self
                .ready
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let taken = want.min(*count);
        *count -= taken;
        taken
    }

    pub fn pending(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct S2 {
    pub x: f64,
    pub y: f64,
    collected: Arc<Collected>,
}

impl S2 {
    pub fn new(x: f64, y: f64, collected: Arc<Collected>) -> Self {
        Self { x, y, collected }
    }

    pub fn sum(&self) -> f64 {
        self.x + self.y
    }
}

impl Drop for S2 {
    fn drop(&mut self) {
        self.collected.note();
    }
}

fn s2_sum(this: &dyn Any, _args: Args) -> Result<Value> {
    Ok(Value::F64(receiver::<S2>(this)?.sum()))
}

fn s2_try_two_strings(_this: &dyn Any, mut args: Args) -> Result<Value> {
    let first = args.string(0)?;
    let second = args.string(1)?;
    Ok(Value::Str(first + &second))
}

static S2_METHODS: [(&str, MethodFn); 2] = [
    ("Sum", s2_sum),
    ("TryTwoStrings", s2_try_two_strings),
];

static S2_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
    name: cap::S2,
    methods: &S2_METHODS,
}];

host_object!(S2, S2_CAPS);

// ---------------------------------------------------------------------------
// S4
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct S4 {
    pub i: i64,
}

fn s4_i(this: &dyn Any, _args: Args) -> Result<Value> {
    Ok(Value::I64(receiver::<S4>(this)?.i))
}

static S4_METHODS: [(&str, MethodFn); 1] = [("I", s4_i)];

static S4_CAPS: [CapabilityImpl; 1] = [CapabilityImpl {
    name: cap::S4,
    methods: &S4_METHODS,
}];

host_object!(S4, S4_CAPS);
