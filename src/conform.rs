//! Conformance engine
//!
//! `conform` walks a spec against a value and produces either the canonical
//! conformed value or `Invalid`. `Invalid` is a dedicated sentinel case:
//! nil is a legal conformed value, so failure can never be represented by a
//! value.
//!
//! Non-conformance is data, not an error. The only `Err` paths out of this
//! module are registry misses (`UnknownSpec`) surfaced while resolving
//! named references.
//!
//! `valid` runs a cheaper boolean walk that skips building conformed
//! containers wherever threading does not require them (`and` children
//! still see their predecessor's conformed output).

use std::collections::BTreeMap;

use crate::error::Result;
use crate::ident::Ident;
use crate::registry;
use crate::spec::{CollKind, KeysSpec, Spec, SpecRef};
use crate::value::Value;

/// Outcome of conforming a value against a spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConformResult {
    /// The canonical conformed value
    Conformed(Value),
    /// The value does not conform; explain produces the reasons
    Invalid,
}

impl ConformResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ConformResult::Conformed(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            ConformResult::Conformed(v) => Some(v),
            ConformResult::Invalid => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ConformResult::Conformed(v) => Some(v),
            ConformResult::Invalid => None,
        }
    }
}

/// Conform a value against a spec
pub fn conform(spec: impl Into<SpecRef>, value: &Value) -> Result<ConformResult> {
    conform_ref(&spec.into(), value)
}

/// Whether a value conforms, without materializing the conformed value
pub fn valid(spec: impl Into<SpecRef>, value: &Value) -> Result<bool> {
    accepts_ref(&spec.into(), value)
}

pub(crate) fn conform_ref(spec: &SpecRef, value: &Value) -> Result<ConformResult> {
    let spec = spec.resolve()?;
    conform_spec(&spec, value)
}

pub(crate) fn accepts_ref(spec: &SpecRef, value: &Value) -> Result<bool> {
    let spec = spec.resolve()?;
    accepts(&spec, value)
}

/// Map lookup for an identifier key: keyword form first, then the string
/// form the JSON bridge produces
pub(crate) fn find_key<'a>(map: &'a BTreeMap<Value, Value>, id: &Ident) -> Option<&'a Value> {
    map.get(&Value::Keyword(id.clone()))
        .or_else(|| map.get(&Value::Str(id.to_string())))
}

/// Interpret a map key as an identifier where possible
pub(crate) fn key_ident(key: &Value) -> Option<Ident> {
    match key {
        Value::Keyword(id) => Some(id.clone()),
        Value::Str(s) if !s.is_empty() => Some(Ident::parse(s)),
        _ => None,
    }
}

fn conform_spec(spec: &Spec, value: &Value) -> Result<ConformResult> {
    use ConformResult::{Conformed, Invalid};

    match spec {
        Spec::Predicate(p) => Ok(if p.test(value) {
            Conformed(value.clone())
        } else {
            Invalid
        }),

        Spec::And(children) => {
            let mut current = value.clone();
            for child in children {
                match conform_ref(child, &current)? {
                    Conformed(v) => current = v,
                    Invalid => return Ok(Invalid),
                }
            }
            Ok(Conformed(current))
        }

        Spec::Or(branches) => {
            for branch in branches {
                if let Conformed(v) = conform_ref(&branch.spec, value)? {
                    return Ok(Conformed(Value::vec([
                        Value::Keyword(branch.tag.clone()),
                        v,
                    ])));
                }
            }
            Ok(Invalid)
        }

        Spec::Keys(ks) => conform_keys(ks, value),

        Spec::CollOf(cs) => {
            let (input_kind, items) = match collection_items(value) {
                Some(pair) => pair,
                None => return Ok(Invalid),
            };
            if cs.kind.map_or(false, |k| k != input_kind) {
                return Ok(Invalid);
            }
            if cs.count.map_or(false, |n| items.len() != n)
                || cs.min_count.map_or(false, |n| items.len() < n)
                || cs.max_count.map_or(false, |n| items.len() > n)
            {
                return Ok(Invalid);
            }
            if cs.distinct && !all_distinct(&items) {
                return Ok(Invalid);
            }
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                match conform_ref(&cs.element, item)? {
                    Conformed(v) => out.push(v),
                    Invalid => return Ok(Invalid),
                }
            }
            Ok(Conformed(build_collection(cs.into.unwrap_or(input_kind), out)))
        }

        Spec::MapOf(ms) => {
            let map = match value.as_map() {
                Some(m) => m,
                None => return Ok(Invalid),
            };
            if ms.count.map_or(false, |n| map.len() != n)
                || ms.min_count.map_or(false, |n| map.len() < n)
                || ms.max_count.map_or(false, |n| map.len() > n)
            {
                return Ok(Invalid);
            }
            let mut out = BTreeMap::new();
            for (k, v) in map {
                let conformed_key = match conform_ref(&ms.key, k)? {
                    Conformed(ck) => ck,
                    Invalid => return Ok(Invalid),
                };
                let conformed_val = match conform_ref(&ms.value, v)? {
                    Conformed(cv) => cv,
                    Invalid => return Ok(Invalid),
                };
                // Conformed keys may collide; the later entry wins only
                // when the caller opted into key rewriting.
                let key = if ms.conform_keys { conformed_key } else { k.clone() };
                out.insert(key, conformed_val);
            }
            Ok(Conformed(Value::Map(out)))
        }

        Spec::Tuple(positions) => {
            let items = match value.as_vector() {
                Some(v) => v,
                None => return Ok(Invalid),
            };
            if items.len() != positions.len() {
                return Ok(Invalid);
            }
            let mut out = Vec::with_capacity(items.len());
            for (pos, item) in positions.iter().zip(items) {
                match conform_ref(pos, item)? {
                    Conformed(v) => out.push(v),
                    Invalid => return Ok(Invalid),
                }
            }
            Ok(Conformed(Value::Vector(out)))
        }

        Spec::Cat(_) | Spec::Alt(_) | Spec::Rep(_) => {
            let items = match value.as_vector() {
                Some(v) => v,
                None => return Ok(Invalid),
            };
            match re_conform(spec, items, 0)? {
                Some((end, conformed)) if end == items.len() => Ok(Conformed(conformed)),
                _ => Ok(Invalid),
            }
        }

        Spec::Merge(components) => {
            let map = match value.as_map() {
                Some(m) => m,
                None => return Ok(Invalid),
            };
            let mut out = map.clone();
            for component in components {
                match conform_ref(component, value)? {
                    Conformed(Value::Map(m)) => out.extend(m),
                    _ => return Ok(Invalid),
                }
            }
            Ok(Conformed(Value::Map(out)))
        }

        Spec::Nilable(inner) => {
            if value.is_nil() {
                Ok(Conformed(Value::Nil))
            } else {
                conform_ref(inner, value)
            }
        }

        // Generator override is invisible to conform
        Spec::WithGen(inner, _) => conform_ref(inner, value),
    }
}

fn conform_keys(ks: &KeysSpec, value: &Value) -> Result<ConformResult> {
    use ConformResult::{Conformed, Invalid};

    let map = match value.as_map() {
        Some(m) => m,
        None => return Ok(Invalid),
    };
    for required in &ks.required {
        if find_key(map, &ks.data_key_for(required)).is_none() {
            return Ok(Invalid);
        }
    }
    // Every present key that is registered is checked, not only the
    // req/opt-listed ones. The map keeps exposing the original key; only
    // the value is replaced by its conformed form.
    let mut out = map.clone();
    for (key, val) in map {
        let spec_id = match key_ident(key).map(|id| ks.spec_id_for_key(&id)) {
            Some(id) => id,
            None => continue,
        };
        if !registry::is_registered(&spec_id) {
            continue;
        }
        match conform_ref(&SpecRef::Named(spec_id), val)? {
            Conformed(cv) => {
                out.insert(key.clone(), cv);
            }
            Invalid => return Ok(Invalid),
        }
    }
    Ok(Conformed(Value::Map(out)))
}

fn collection_items(value: &Value) -> Option<(CollKind, Vec<&Value>)> {
    match value {
        Value::Vector(v) => Some((CollKind::Vector, v.iter().collect())),
        Value::Set(s) => Some((CollKind::Set, s.iter().collect())),
        _ => None,
    }
}

fn all_distinct(items: &[&Value]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    items.iter().all(|item| seen.insert(*item))
}

fn build_collection(kind: CollKind, items: Vec<Value>) -> Value {
    match kind {
        CollKind::Vector => Value::Vector(items),
        CollKind::Set => Value::Set(items.into_iter().collect()),
    }
}

/// Peel `with_gen` wrappers so regex operators nested behind overrides or
/// named references still splice into the surrounding sequence
fn deref_spec(spec: std::sync::Arc<Spec>) -> Result<std::sync::Arc<Spec>> {
    let mut current = spec;
    loop {
        let next = match &*current {
            Spec::WithGen(inner, _) => inner.resolve()?,
            _ => return Ok(current),
        };
        current = next;
    }
}

/// Regex-operator walk over a flat sequence cursor.
///
/// Returns the cursor position after the consumed span and the span's
/// conformed value, or `None` when the span does not match. A non-regex
/// spec consumes exactly one element.
fn re_conform(spec: &Spec, items: &[Value], start: usize) -> Result<Option<(usize, Value)>> {
    use ConformResult::{Conformed, Invalid};

    match spec {
        Spec::Cat(parts) => {
            let mut pos = start;
            let mut out = BTreeMap::new();
            for (tag, part) in parts {
                let part = deref_spec(part.resolve()?)?;
                match re_conform(&part, items, pos)? {
                    Some((next, conformed)) => {
                        out.insert(Value::Keyword(tag.clone()), conformed);
                        pos = next;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((pos, Value::Map(out))))
        }

        Spec::Alt(branches) => {
            for (tag, branch) in branches {
                let branch = deref_spec(branch.resolve()?)?;
                if let Some((next, conformed)) = re_conform(&branch, items, start)? {
                    return Ok(Some((
                        next,
                        Value::vec([Value::Keyword(tag.clone()), conformed]),
                    )));
                }
            }
            Ok(None)
        }

        Spec::Rep(rs) => {
            let inner = deref_spec(rs.inner.resolve()?)?;
            let mut pos = start;
            let mut out = Vec::new();
            while rs.upper.map_or(true, |hi| out.len() < hi) {
                match re_conform(&inner, items, pos)? {
                    // Zero-width matches would never advance the cursor
                    Some((next, conformed)) if next > pos => {
                        out.push(conformed);
                        pos = next;
                    }
                    _ => break,
                }
            }
            if out.len() < rs.lower {
                return Ok(None);
            }
            Ok(Some((pos, Value::Vector(out))))
        }

        other => {
            if start >= items.len() {
                return Ok(None);
            }
            match conform_spec(other, &items[start])? {
                Conformed(v) => Ok(Some((start + 1, v))),
                Invalid => Ok(None),
            }
        }
    }
}

/// Boolean twin of `re_conform`: cursor advance only, no span values
pub(crate) fn re_accepts(spec: &Spec, items: &[Value], start: usize) -> Result<Option<usize>> {
    match spec {
        Spec::Cat(parts) => {
            let mut pos = start;
            for (_, part) in parts {
                let part = deref_spec(part.resolve()?)?;
                match re_accepts(&part, items, pos)? {
                    Some(next) => pos = next,
                    None => return Ok(None),
                }
            }
            Ok(Some(pos))
        }

        Spec::Alt(branches) => {
            for (_, branch) in branches {
                let branch = deref_spec(branch.resolve()?)?;
                if let Some(next) = re_accepts(&branch, items, start)? {
                    return Ok(Some(next));
                }
            }
            Ok(None)
        }

        Spec::Rep(rs) => {
            let inner = deref_spec(rs.inner.resolve()?)?;
            let mut pos = start;
            let mut matched = 0usize;
            while rs.upper.map_or(true, |hi| matched < hi) {
                match re_accepts(&inner, items, pos)? {
                    Some(next) if next > pos => {
                        matched += 1;
                        pos = next;
                    }
                    _ => break,
                }
            }
            if matched < rs.lower {
                return Ok(None);
            }
            Ok(Some(pos))
        }

        other => {
            if start >= items.len() {
                return Ok(None);
            }
            Ok(accepts(other, &items[start])?.then_some(start + 1))
        }
    }
}

pub(crate) fn accepts(spec: &Spec, value: &Value) -> Result<bool> {
    match spec {
        Spec::Predicate(p) => Ok(p.test(value)),

        Spec::And(children) => {
            // Threading forces materialized intermediates for all but the
            // last child; the last one only needs the boolean.
            let mut current = value.clone();
            for (i, child) in children.iter().enumerate() {
                if i + 1 == children.len() {
                    return accepts_ref(child, &current);
                }
                match conform_ref(child, &current)? {
                    ConformResult::Conformed(v) => current = v,
                    ConformResult::Invalid => return Ok(false),
                }
            }
            Ok(true)
        }

        Spec::Or(branches) => {
            for branch in branches {
                if accepts_ref(&branch.spec, value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }

        Spec::Keys(ks) => {
            let map = match value.as_map() {
                Some(m) => m,
                None => return Ok(false),
            };
            for required in &ks.required {
                if find_key(map, &ks.data_key_for(required)).is_none() {
                    return Ok(false);
                }
            }
            for (key, val) in map {
                let spec_id = match key_ident(key).map(|id| ks.spec_id_for_key(&id)) {
                    Some(id) => id,
                    None => continue,
                };
                if registry::is_registered(&spec_id)
                    && !accepts_ref(&SpecRef::Named(spec_id), val)?
                {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Spec::CollOf(cs) => {
            let (input_kind, items) = match collection_items(value) {
                Some(pair) => pair,
                None => return Ok(false),
            };
            if cs.kind.map_or(false, |k| k != input_kind)
                || cs.count.map_or(false, |n| items.len() != n)
                || cs.min_count.map_or(false, |n| items.len() < n)
                || cs.max_count.map_or(false, |n| items.len() > n)
                || (cs.distinct && !all_distinct(&items))
            {
                return Ok(false);
            }
            for item in &items {
                if !accepts_ref(&cs.element, item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Spec::MapOf(ms) => {
            let map = match value.as_map() {
                Some(m) => m,
                None => return Ok(false),
            };
            if ms.count.map_or(false, |n| map.len() != n)
                || ms.min_count.map_or(false, |n| map.len() < n)
                || ms.max_count.map_or(false, |n| map.len() > n)
            {
                return Ok(false);
            }
            for (k, v) in map {
                if !accepts_ref(&ms.key, k)? || !accepts_ref(&ms.value, v)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Spec::Tuple(positions) => {
            let items = match value.as_vector() {
                Some(v) => v,
                None => return Ok(false),
            };
            if items.len() != positions.len() {
                return Ok(false);
            }
            for (pos, item) in positions.iter().zip(items) {
                if !accepts_ref(pos, item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Spec::Cat(_) | Spec::Alt(_) | Spec::Rep(_) => {
            let items = match value.as_vector() {
                Some(v) => v,
                None => return Ok(false),
            };
            Ok(matches!(re_accepts(spec, items, 0)?, Some(end) if end == items.len()))
        }

        Spec::Merge(components) => {
            if value.as_map().is_none() {
                return Ok(false);
            }
            for component in components {
                if !accepts_ref(component, value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Spec::Nilable(inner) => {
            if value.is_nil() {
                Ok(true)
            } else {
                accepts_ref(inner, value)
            }
        }

        Spec::WithGen(inner, _) => accepts_ref(inner, value),
    }
}
