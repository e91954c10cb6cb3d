// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Static capability catalogue.
//
// The catalogue is produced at build time by the binding generator and handed
// to the bridge as-is. It names every capability (interface or concrete
// exposed type), its methods and their typed parameters. The bridge never
// discovers interfaces at run time; every selector is resolved against this
// table.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherError};

/// Index of a capability inside the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityId(pub u16);

/// A method selector: capability plus method index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
    pub capability: CapabilityId,
    pub method: u16,
}

impl Selector {
    /// Integer form handed to the foreign side.
    pub fn pack(self) -> u32 {
        (u32::from(self.capability.0) << 16) | u32::from(self.method)
    }

    pub fn unpack(raw: u32) -> Self {
        Self {
            capability: CapabilityId((raw >> 16) as u16),
            method: raw as u16,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.capability.0, self.method)
    }
}

/// How the foreign side names a selector: packed integer or `"Cap.Method"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorRef {
    Id(u32),
    Name(String),
}

impl From<Selector> for SelectorRef {
    fn from(s: Selector) -> Self {
        Self::Id(s.pack())
    }
}

impl From<u32> for SelectorRef {
    fn from(raw: u32) -> Self {
        Self::Id(raw)
    }
}

impl From<&str> for SelectorRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl fmt::Display for SelectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(raw) => write!(f, "{}", Selector::unpack(*raw)),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Parameter / result types known to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeDesc {
    Void,
    Bool,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Error,
    /// Object reference implementing the named capability (nullable).
    Object(String),
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("bool"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::Error => f.write_str("error"),
            Self::Object(cap) => write!(f, "object<{cap}>"),
        }
    }
}

fn void() -> TypeDesc {
    TypeDesc::Void
}

/// One method of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDesc {
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeDesc>,
    #[serde(default = "void")]
    pub returns: TypeDesc,
    /// Whether the method can fail with a domain error.
    #[serde(default)]
    pub fallible: bool,
}

impl MethodDesc {
    pub fn new(name: impl Into<String>, params: Vec<TypeDesc>, returns: TypeDesc) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            fallible: false,
        }
    }

    pub fn fallible(mut self) -> Self {
        self.fallible = true;
        self
    }
}

/// A named set of methods an object may implement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDesc {
    #[serde(skip)]
    pub id: CapabilityId,
    pub name: String,
    /// Proxies for this capability are memoised per foreign handle, so
    /// wrapping the same foreign object twice yields the same proxy.
    #[serde(default)]
    pub identity_preserving: bool,
    #[serde(default)]
    pub methods: Vec<MethodDesc>,
}

impl Default for CapabilityId {
    fn default() -> Self {
        Self(0)
    }
}

impl CapabilityDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CapabilityId::default(),
            name: name.into(),
            identity_preserving: false,
            methods: Vec::new(),
        }
    }

    pub fn identity_preserving(mut self) -> Self {
        self.identity_preserving = true;
        self
    }

    pub fn method(mut self, method: MethodDesc) -> Self {
        self.methods.push(method);
        self
    }

    /// Index of a method by name.
    pub fn method_index(&self, name: &str) -> Option<u16> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as u16)
    }

    pub fn selector(&self, method: &str) -> Option<Selector> {
        self.method_index(method).map(|m| Selector {
            capability: self.id,
            method: m,
        })
    }
}

/// On-disk / generated form of the catalogue.
#[derive(Debug, Deserialize, Serialize)]
struct CatalogueFile {
    capabilities: Vec<CapabilityDesc>,
}

/// The validated, indexed catalogue.
#[derive(Debug, Clone)]
pub struct Catalogue {
    capabilities: Vec<CapabilityDesc>,
    by_name: HashMap<String, CapabilityId>,
}

impl Catalogue {
    /// Validate and index a list of capabilities. Ids are assigned in order.
    pub fn new(capabilities: Vec<CapabilityDesc>) -> Result<Self> {
        if capabilities.len() > usize::from(u16::MAX) {
            return Err(TetherError::Catalogue(format!(
                "{} capabilities exceed the selector space",
                capabilities.len()
            )));
        }

        let mut by_name = HashMap::with_capacity(capabilities.len());
        let mut indexed = Vec::with_capacity(capabilities.len());
        for (i, mut cap) in capabilities.into_iter().enumerate() {
            cap.id = CapabilityId(i as u16);
            if by_name.insert(cap.name.clone(), cap.id).is_some() {
                return Err(TetherError::Catalogue(format!(
                    "duplicate capability `{}`",
                    cap.name
                )));
            }
            if cap.methods.len() > usize::from(u16::MAX) {
                return Err(TetherError::Catalogue(format!(
                    "capability `{}` has too many methods",
                    cap.name
                )));
            }
            for (j, m) in cap.methods.iter().enumerate() {
                if cap.methods[..j].iter().any(|other| other.name == m.name) {
                    return Err(TetherError::Catalogue(format!(
                        "duplicate method `{}.{}`",
                        cap.name, m.name
                    )));
                }
                if m.params.contains(&TypeDesc::Void) {
                    return Err(TetherError::Catalogue(format!(
                        "`{}.{}` takes a void parameter",
                        cap.name, m.name
                    )));
                }
            }
            indexed.push(cap);
        }

        // Object types must name capabilities that exist.
        for cap in &indexed {
            for m in &cap.methods {
                for ty in m.params.iter().chain(std::iter::once(&m.returns)) {
                    if let TypeDesc::Object(target) = ty {
                        if !by_name.contains_key(target) {
                            return Err(TetherError::Catalogue(format!(
                                "`{}.{}` refers to unknown capability `{target}`",
                                cap.name, m.name
                            )));
                        }
                    }
                }
            }
        }

        tracing::debug!(capabilities = indexed.len(), "capability catalogue indexed");
        Ok(Self {
            capabilities: indexed,
            by_name,
        })
    }

    /// Parse the generator's JSON output.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogueFile = serde_json::from_str(json)?;
        Self::new(file.capabilities)
    }

    pub fn to_json(&self) -> Result<String> {
        let file = CatalogueFile {
            capabilities: self.capabilities.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn capabilities(&self) -> &[CapabilityDesc] {
        &self.capabilities
    }

    pub fn capability(&self, id: CapabilityId) -> Option<&CapabilityDesc> {
        self.capabilities.get(usize::from(id.0))
    }

    pub fn by_name(&self, name: &str) -> Option<&CapabilityDesc> {
        self.by_name.get(name).and_then(|id| self.capability(*id))
    }

    /// Look a capability up by name, failing with `UnknownCapability`.
    pub fn require(&self, name: &str) -> Result<&CapabilityDesc> {
        self.by_name(name)
            .ok_or_else(|| TetherError::UnknownCapability(name.to_string()))
    }

    /// Capability and method behind a selector.
    pub fn method(&self, selector: Selector) -> Option<(&CapabilityDesc, &MethodDesc)> {
        let cap = self.capability(selector.capability)?;
        let method = cap.methods.get(usize::from(selector.method))?;
        Some((cap, method))
    }

    /// Resolve a foreign-supplied selector to a checked `Selector`.
    pub fn resolve(&self, selector: &SelectorRef) -> Result<Selector> {
        match selector {
            SelectorRef::Id(raw) => {
                let sel = Selector::unpack(*raw);
                match self.capability(sel.capability) {
                    Some(cap) if usize::from(sel.method) < cap.methods.len() => Ok(sel),
                    Some(cap) => Err(TetherError::NoSuchMethod {
                        capability: cap.name.clone(),
                        selector: sel.to_string(),
                    }),
                    None => Err(TetherError::NoSuchMethod {
                        capability: format!("#{}", sel.capability.0),
                        selector: sel.to_string(),
                    }),
                }
            }
            SelectorRef::Name(name) => {
                let Some((cap_name, method)) = name.rsplit_once('.') else {
                    return Err(TetherError::NoSuchMethod {
                        capability: String::new(),
                        selector: name.clone(),
                    });
                };
                let cap = self.by_name(cap_name).ok_or_else(|| TetherError::NoSuchMethod {
                    capability: cap_name.to_string(),
                    selector: name.clone(),
                })?;
                cap.selector(method).ok_or_else(|| TetherError::NoSuchMethod {
                    capability: cap.name.clone(),
                    selector: method.to_string(),
                })
            }
        }
    }

    /// `Cap.Method` form of a selector, for logs and errors.
    pub fn selector_name(&self, selector: Selector) -> String {
        match self.method(selector) {
            Some((cap, m)) => format!("{}.{}", cap.name, m.name),
            None => selector.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "capabilities": [
            {
                "name": "pkg.I2",
                "identity_preserving": true,
                "methods": [
                    { "name": "Times", "params": ["i32"], "returns": "i64" },
                    { "name": "Error", "params": ["bool"], "fallible": true }
                ]
            },
            {
                "name": "pkg.Dupper",
                "methods": [
                    { "name": "Dup", "params": [{ "object": "pkg.I2" }], "returns": { "object": "pkg.I2" } }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_generator_output() {
        let cat = Catalogue::from_json(SAMPLE).expect("parse catalogue");
        assert_eq!(cat.len(), 2);

        let i2 = cat.by_name("pkg.I2").expect("I2 present");
        assert!(i2.identity_preserving);
        assert_eq!(i2.methods[1].returns, TypeDesc::Void);
        assert!(i2.methods[1].fallible);

        let dupper = cat.by_name("pkg.Dupper").expect("Dupper present");
        assert_eq!(dupper.id, CapabilityId(1));
        assert_eq!(dupper.methods[0].params, vec![TypeDesc::Object("pkg.I2".into())]);
    }

    #[test]
    fn resolves_named_and_packed_selectors() {
        let cat = Catalogue::from_json(SAMPLE).expect("parse catalogue");
        let by_name = cat.resolve(&"pkg.I2.Error".into()).expect("named selector");
        assert_eq!(by_name.method, 1);

        let by_id = cat.resolve(&SelectorRef::from(by_name)).expect("packed selector");
        assert_eq!(by_id, by_name);
        assert_eq!(cat.selector_name(by_id), "pkg.I2.Error");
    }

    #[test]
    fn unknown_selectors_are_no_such_method() {
        let cat = Catalogue::from_json(SAMPLE).expect("parse catalogue");
        assert!(matches!(
            cat.resolve(&"pkg.I2.Missing".into()),
            Err(TetherError::NoSuchMethod { .. })
        ));
        assert!(matches!(
            cat.resolve(&SelectorRef::Id(Selector::unpack(0x0000_0009).pack())),
            Err(TetherError::NoSuchMethod { .. })
        ));
        assert!(matches!(
            cat.resolve(&SelectorRef::Id(0x00ff_0000)),
            Err(TetherError::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn rejects_dangling_object_types() {
        let caps = vec![CapabilityDesc::new("a").method(MethodDesc::new(
            "F",
            vec![TypeDesc::Object("missing".into())],
            TypeDesc::Void,
        ))];
        assert!(matches!(Catalogue::new(caps), Err(TetherError::Catalogue(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let caps = vec![CapabilityDesc::new("a"), CapabilityDesc::new("a")];
        assert!(matches!(Catalogue::new(caps), Err(TetherError::Catalogue(_))));
    }

    #[test]
    fn json_round_trips_through_builder() {
        let cat = Catalogue::new(vec![
            CapabilityDesc::new("x")
                .identity_preserving()
                .method(MethodDesc::new("F", vec![TypeDesc::I32], TypeDesc::Bool).fallible()),
        ])
        .expect("build catalogue");
        let json = cat.to_json().expect("serialize");
        let back = Catalogue::from_json(&json).expect("reparse");
        assert_eq!(back.capabilities(), cat.capabilities());
    }
}
