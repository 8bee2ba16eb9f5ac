//! The spec algebra
//!
//! A [`Spec`] is a closed tagged union with one case per constructor:
//! predicate, and, or, keys, coll-of, map-of, tuple, cat, alt, rep, merge,
//! nilable, with-gen. Keeping the union closed keeps conform/explain/gen
//! exhaustive and compiler-checked.
//!
//! Composite children are [`SpecRef`]s: either an anonymous inline spec or a
//! named reference resolved through the registry at evaluation time. Lazy
//! resolution is what lets named specs reference each other (including
//! indirectly, or recursively) and still terminate: nothing is inlined at
//! registration time.
//!
//! Constructors validate their own shape and fail fast with
//! [`SpecError::MalformedSpec`].

use regex::Regex;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SpecError};
use crate::gen::Generator;
use crate::ident::Ident;
use crate::registry;
use crate::value::Value;

/// Boolean test over one value
pub type PredFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Reference to a spec: inline composite or named registry entry
#[derive(Debug, Clone)]
pub enum SpecRef {
    /// Looked up in the registry at evaluation time
    Named(Ident),
    /// Anonymous inline spec
    Inline(Arc<Spec>),
}

impl SpecRef {
    /// Resolve to a concrete spec, failing with `UnknownSpec` for an
    /// unregistered name. Named entries are cloned out of the registry so
    /// evaluation never holds the registry lock.
    pub fn resolve(&self) -> Result<Arc<Spec>> {
        match self {
            SpecRef::Named(id) => registry::lookup(id),
            SpecRef::Inline(spec) => Ok(Arc::clone(spec)),
        }
    }

    /// Short human-readable label for problem reports
    pub fn describe(&self) -> String {
        match self {
            SpecRef::Named(id) => id.to_string(),
            SpecRef::Inline(spec) => spec.describe(),
        }
    }
}

impl From<Spec> for SpecRef {
    fn from(spec: Spec) -> Self {
        SpecRef::Inline(Arc::new(spec))
    }
}

impl From<Ident> for SpecRef {
    fn from(id: Ident) -> Self {
        SpecRef::Named(id)
    }
}

impl From<&Ident> for SpecRef {
    fn from(id: &Ident) -> Self {
        SpecRef::Named(id.clone())
    }
}

impl From<&str> for SpecRef {
    fn from(s: &str) -> Self {
        SpecRef::Named(Ident::parse(s))
    }
}

impl From<&SpecRef> for SpecRef {
    fn from(r: &SpecRef) -> Self {
        r.clone()
    }
}

/// Named reference convenience
pub fn named(id: impl Into<Ident>) -> SpecRef {
    SpecRef::Named(id.into())
}

/// Semantic category a predicate declares so a generator can be derived.
///
/// Arbitrary boolean predicates are not invertible into generators; a
/// predicate without a hint (and without a `with_gen` override) is
/// `Ungeneratable`.
#[derive(Debug, Clone)]
pub enum GenHint {
    /// Any scalar
    Any,
    Bool,
    Int,
    IntIn(i64, i64),
    Float,
    /// Int or float
    Number,
    Str,
    Keyword,
    /// Uniform choice among fixed elements
    OneOf(Vec<Value>),
}

/// A predicate spec: boolean test, description, optional generator hint
#[derive(Clone)]
pub struct Predicate {
    description: String,
    hint: Option<GenHint>,
    test: PredFn,
}

impl Predicate {
    pub fn test(&self, value: &Value) -> bool {
        (self.test)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn hint(&self) -> Option<&GenHint> {
        self.hint.as_ref()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .field("hint", &self.hint)
            .finish_non_exhaustive()
    }
}

/// Deferred generator construction for `with_gen`.
///
/// The factory is zero-argument and runs when a generator is actually
/// needed, not when the spec is built. It is not memoized across `gen`
/// calls.
#[derive(Clone)]
pub struct GenFactory(Arc<dyn Fn() -> Generator + Send + Sync>);

impl GenFactory {
    pub fn new(f: impl Fn() -> Generator + Send + Sync + 'static) -> Self {
        GenFactory(Arc::new(f))
    }

    pub fn invoke(&self) -> Generator {
        (self.0)()
    }
}

impl fmt::Debug for GenFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenFactory(..)")
    }
}

/// One `or` branch: tag, spec, generation weight
#[derive(Debug, Clone)]
pub struct OrBranch {
    pub tag: Ident,
    pub spec: SpecRef,
    /// Relative weight for branch selection during generation; conform
    /// ignores it. Uniform selection when all weights are equal.
    pub weight: u32,
}

/// Map-of-keys spec
///
/// `required`/`optional` list qualified registry identifiers. `aliases`
/// maps an unqualified data key to its qualified registry entry for
/// `req_un`/`opt_un` usage: conformance is checked against the qualified
/// entry while the map keeps exposing the unqualified key.
#[derive(Debug, Clone)]
pub struct KeysSpec {
    pub required: Vec<Ident>,
    pub optional: Vec<Ident>,
    pub aliases: BTreeMap<Ident, Ident>,
}

impl KeysSpec {
    /// The key a value map is expected to carry for a listed identifier
    pub fn data_key_for(&self, id: &Ident) -> Ident {
        self.aliases
            .iter()
            .find(|(_, qualified)| *qualified == id)
            .map(|(unqualified, _)| unqualified.clone())
            .unwrap_or_else(|| id.clone())
    }

    /// The registry identifier a present data key is checked against
    pub fn spec_id_for_key(&self, key: &Ident) -> Ident {
        self.aliases.get(key).cloned().unwrap_or_else(|| key.clone())
    }
}

/// Input/output container kinds for `coll_of`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollKind {
    Vector,
    Set,
}

/// Homogeneous collection spec
#[derive(Debug, Clone)]
pub struct CollSpec {
    pub element: SpecRef,
    pub kind: Option<CollKind>,
    pub count: Option<usize>,
    pub min_count: Option<usize>,
    pub max_count: Option<usize>,
    pub distinct: bool,
    pub into: Option<CollKind>,
}

/// Homogeneous map spec
#[derive(Debug, Clone)]
pub struct MapSpec {
    pub key: SpecRef,
    pub value: SpecRef,
    /// Keys are always validated; they are only rewritten to their
    /// conformed form when this is set, to avoid post-conform key
    /// collisions.
    pub conform_keys: bool,
    pub count: Option<usize>,
    pub min_count: Option<usize>,
    pub max_count: Option<usize>,
}

/// Bounded repetition over a flat sequence
#[derive(Debug, Clone)]
pub struct RepSpec {
    pub inner: SpecRef,
    pub lower: usize,
    pub upper: Option<usize>,
}

/// The spec algebra: one case per constructor
#[derive(Debug, Clone)]
pub enum Spec {
    Predicate(Predicate),
    And(Vec<SpecRef>),
    Or(Vec<OrBranch>),
    Keys(KeysSpec),
    CollOf(CollSpec),
    MapOf(MapSpec),
    Tuple(Vec<SpecRef>),
    Cat(Vec<(Ident, SpecRef)>),
    Alt(Vec<(Ident, SpecRef)>),
    Rep(RepSpec),
    Merge(Vec<SpecRef>),
    Nilable(SpecRef),
    WithGen(SpecRef, GenFactory),
}

impl Spec {
    /// Short human-readable label for problem reports
    pub fn describe(&self) -> String {
        match self {
            Spec::Predicate(p) => p.description.clone(),
            Spec::And(_) => "and".to_string(),
            Spec::Or(_) => "or".to_string(),
            Spec::Keys(_) => "keys".to_string(),
            Spec::CollOf(_) => "coll-of".to_string(),
            Spec::MapOf(_) => "map-of".to_string(),
            Spec::Tuple(_) => "tuple".to_string(),
            Spec::Cat(_) => "cat".to_string(),
            Spec::Alt(_) => "alt".to_string(),
            Spec::Rep(_) => "rep".to_string(),
            Spec::Merge(_) => "merge".to_string(),
            Spec::Nilable(_) => "nilable".to_string(),
            Spec::WithGen(inner, _) => inner.describe(),
        }
    }

    /// Whether this spec consumes a flat sequence cursor rather than a
    /// single value (`cat`/`alt`/`rep`)
    pub fn is_regex_op(&self) -> bool {
        matches!(self, Spec::Cat(_) | Spec::Alt(_) | Spec::Rep(_))
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// Wrap a boolean test with a description
pub fn predicate(
    description: impl Into<String>,
    test: impl Fn(&Value) -> bool + Send + Sync + 'static,
) -> Spec {
    Spec::Predicate(Predicate {
        description: description.into(),
        hint: None,
        test: Arc::new(test),
    })
}

/// Wrap a boolean test with a description and a generator hint
pub fn predicate_with_hint(
    description: impl Into<String>,
    hint: GenHint,
    test: impl Fn(&Value) -> bool + Send + Sync + 'static,
) -> Spec {
    Spec::Predicate(Predicate {
        description: description.into(),
        hint: Some(hint),
        test: Arc::new(test),
    })
}

/// All children must conform; the value threads through each child's
/// conform in declared order
pub fn and(children: Vec<impl Into<SpecRef>>) -> Result<Spec> {
    if children.is_empty() {
        return Err(SpecError::malformed("and requires at least one child"));
    }
    Ok(Spec::And(children.into_iter().map(Into::into).collect()))
}

fn check_unique_tags(op: &str, tags: &[Ident]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for tag in tags {
        if !seen.insert(tag) {
            return Err(SpecError::malformed(format!(
                "{} branch tags must be unique, `{}` repeats",
                op, tag
            )));
        }
    }
    Ok(())
}

/// First conforming branch wins; conform result is a `[tag conformed]` pair
pub fn or<T: Into<Ident>, S: Into<SpecRef>>(branches: Vec<(T, S)>) -> Result<Spec> {
    or_weighted(branches.into_iter().map(|(t, s)| (t, s, 1)).collect())
}

/// `or` with per-branch generation weights
pub fn or_weighted<T: Into<Ident>, S: Into<SpecRef>>(branches: Vec<(T, S, u32)>) -> Result<Spec> {
    if branches.is_empty() {
        return Err(SpecError::malformed("or requires at least one branch"));
    }
    let branches: Vec<OrBranch> = branches
        .into_iter()
        .map(|(tag, spec, weight)| OrBranch {
            tag: tag.into(),
            spec: spec.into(),
            weight,
        })
        .collect();
    let tags: Vec<Ident> = branches.iter().map(|b| b.tag.clone()).collect();
    check_unique_tags("or", &tags)?;
    if branches.iter().any(|b| b.weight == 0) {
        return Err(SpecError::malformed("or branch weights must be positive"));
    }
    Ok(Spec::Or(branches))
}

/// Builder for `keys` specs
#[derive(Default)]
pub struct KeysBuilder {
    required: Vec<Ident>,
    optional: Vec<Ident>,
    aliases: BTreeMap<Ident, Ident>,
    error: Option<String>,
}

/// Map-of-keys spec builder; see [`KeysSpec`]
pub fn keys() -> KeysBuilder {
    KeysBuilder::default()
}

impl KeysBuilder {
    /// Required qualified keys, present under their qualified name
    pub fn req(mut self, ids: Vec<impl Into<Ident>>) -> Self {
        self.required.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Optional qualified keys
    pub fn opt(mut self, ids: Vec<impl Into<Ident>>) -> Self {
        self.optional.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Required keys checked against their qualified registry entry but
    /// present in the map under the unqualified name
    pub fn req_un(mut self, ids: Vec<impl Into<Ident>>) -> Self {
        for id in ids {
            let id = id.into();
            self.add_alias(&id);
            self.required.push(id);
        }
        self
    }

    /// Optional unqualified-alias keys
    pub fn opt_un(mut self, ids: Vec<impl Into<Ident>>) -> Self {
        for id in ids {
            let id = id.into();
            self.add_alias(&id);
            self.optional.push(id);
        }
        self
    }

    fn add_alias(&mut self, id: &Ident) {
        if !id.is_qualified() {
            self.error = Some(format!("unqualified-alias key `{}` must be qualified", id));
            return;
        }
        let unqualified = id.unqualify();
        if let Some(existing) = self.aliases.get(&unqualified) {
            if existing != id {
                self.error = Some(format!(
                    "unqualified key `{}` is ambiguous: `{}` vs `{}`",
                    unqualified, existing, id
                ));
            }
            return;
        }
        self.aliases.insert(unqualified, id.clone());
    }

    pub fn build(self) -> Result<Spec> {
        if let Some(msg) = self.error {
            return Err(SpecError::malformed(msg));
        }
        let req: BTreeSet<&Ident> = self.required.iter().collect();
        if req.len() != self.required.len() {
            return Err(SpecError::malformed("duplicate required key"));
        }
        for opt in &self.optional {
            if req.contains(opt) {
                return Err(SpecError::malformed(format!(
                    "key `{}` listed as both required and optional",
                    opt
                )));
            }
        }
        Ok(Spec::Keys(KeysSpec {
            required: self.required,
            optional: self.optional,
            aliases: self.aliases,
        }))
    }
}

/// Builder for `coll_of` specs
pub struct CollOfBuilder {
    spec: CollSpec,
}

/// Homogeneous collection of `element`
pub fn coll_of(element: impl Into<SpecRef>) -> CollOfBuilder {
    CollOfBuilder {
        spec: CollSpec {
            element: element.into(),
            kind: None,
            count: None,
            min_count: None,
            max_count: None,
            distinct: false,
            into: None,
        },
    }
}

impl CollOfBuilder {
    /// Require the input container to be of this kind
    pub fn kind(mut self, kind: CollKind) -> Self {
        self.spec.kind = Some(kind);
        self
    }

    /// Exact element count (exclusive with min/max)
    pub fn count(mut self, n: usize) -> Self {
        self.spec.count = Some(n);
        self
    }

    pub fn min_count(mut self, n: usize) -> Self {
        self.spec.min_count = Some(n);
        self
    }

    pub fn max_count(mut self, n: usize) -> Self {
        self.spec.max_count = Some(n);
        self
    }

    /// Require all elements distinct
    pub fn distinct(mut self, on: bool) -> Self {
        self.spec.distinct = on;
        self
    }

    /// Conformed result container shape; mirrors the input when unset
    pub fn into_kind(mut self, kind: CollKind) -> Self {
        self.spec.into = Some(kind);
        self
    }

    pub fn build(self) -> Result<Spec> {
        let s = &self.spec;
        if s.count.is_some() && (s.min_count.is_some() || s.max_count.is_some()) {
            return Err(SpecError::malformed(
                "coll-of count is exclusive with min_count/max_count",
            ));
        }
        if let (Some(lo), Some(hi)) = (s.min_count, s.max_count) {
            if lo > hi {
                return Err(SpecError::malformed(format!(
                    "coll-of min_count {} exceeds max_count {}",
                    lo, hi
                )));
            }
        }
        Ok(Spec::CollOf(self.spec))
    }
}

/// Builder for `map_of` specs
pub struct MapOfBuilder {
    spec: MapSpec,
}

/// Homogeneous mapping of `key` to `value`
pub fn map_of(key: impl Into<SpecRef>, value: impl Into<SpecRef>) -> MapOfBuilder {
    MapOfBuilder {
        spec: MapSpec {
            key: key.into(),
            value: value.into(),
            conform_keys: false,
            count: None,
            min_count: None,
            max_count: None,
        },
    }
}

impl MapOfBuilder {
    /// Rewrite keys to their conformed form. Off by default: conforming
    /// keys can collapse two distinct input keys into one.
    pub fn conform_keys(mut self, on: bool) -> Self {
        self.spec.conform_keys = on;
        self
    }

    pub fn count(mut self, n: usize) -> Self {
        self.spec.count = Some(n);
        self
    }

    pub fn min_count(mut self, n: usize) -> Self {
        self.spec.min_count = Some(n);
        self
    }

    pub fn max_count(mut self, n: usize) -> Self {
        self.spec.max_count = Some(n);
        self
    }

    pub fn build(self) -> Result<Spec> {
        let s = &self.spec;
        if s.count.is_some() && (s.min_count.is_some() || s.max_count.is_some()) {
            return Err(SpecError::malformed(
                "map-of count is exclusive with min_count/max_count",
            ));
        }
        if let (Some(lo), Some(hi)) = (s.min_count, s.max_count) {
            if lo > hi {
                return Err(SpecError::malformed(format!(
                    "map-of min_count {} exceeds max_count {}",
                    lo, hi
                )));
            }
        }
        Ok(Spec::MapOf(self.spec))
    }
}

/// Fixed-arity positional sequence; exact length match required
pub fn tuple(positions: Vec<impl Into<SpecRef>>) -> Result<Spec> {
    if positions.is_empty() {
        return Err(SpecError::malformed("tuple requires at least one position"));
    }
    Ok(Spec::Tuple(positions.into_iter().map(Into::into).collect()))
}

/// Sequence concatenation: consumes parts in order, tagging each span
pub fn cat<T: Into<Ident>, S: Into<SpecRef>>(parts: Vec<(T, S)>) -> Result<Spec> {
    if parts.is_empty() {
        return Err(SpecError::malformed("cat requires at least one part"));
    }
    let parts: Vec<(Ident, SpecRef)> = parts
        .into_iter()
        .map(|(t, s)| (t.into(), s.into()))
        .collect();
    let tags: Vec<Ident> = parts.iter().map(|(t, _)| t.clone()).collect();
    check_unique_tags("cat", &tags)?;
    Ok(Spec::Cat(parts))
}

/// Sequence alternation: first matching branch wins, result is tagged
pub fn alt<T: Into<Ident>, S: Into<SpecRef>>(branches: Vec<(T, S)>) -> Result<Spec> {
    if branches.is_empty() {
        return Err(SpecError::malformed("alt requires at least one branch"));
    }
    let branches: Vec<(Ident, SpecRef)> = branches
        .into_iter()
        .map(|(t, s)| (t.into(), s.into()))
        .collect();
    let tags: Vec<Ident> = branches.iter().map(|(t, _)| t.clone()).collect();
    check_unique_tags("alt", &tags)?;
    Ok(Spec::Alt(branches))
}

/// Greedy bounded repetition over a flat sequence
pub fn rep(inner: impl Into<SpecRef>, lower: usize, upper: Option<usize>) -> Result<Spec> {
    if let Some(hi) = upper {
        if lower > hi {
            return Err(SpecError::malformed(format!(
                "rep lower bound {} exceeds upper bound {}",
                lower, hi
            )));
        }
    }
    Ok(Spec::Rep(RepSpec {
        inner: inner.into(),
        lower,
        upper,
    }))
}

/// Union of keys-spec requirements applied to the same map
pub fn merge(components: Vec<impl Into<SpecRef>>) -> Result<Spec> {
    if components.is_empty() {
        return Err(SpecError::malformed("merge requires at least one component"));
    }
    Ok(Spec::Merge(
        components.into_iter().map(Into::into).collect(),
    ))
}

/// Valid for nil or for `inner`
pub fn nilable(inner: impl Into<SpecRef>) -> Spec {
    Spec::Nilable(inner.into())
}

/// Identical conformance to `inner`; generation replaced by the factory.
/// The factory runs when a generator is needed, once per `gen` call, and is
/// not memoized across calls.
pub fn with_gen(
    inner: impl Into<SpecRef>,
    factory: impl Fn() -> Generator + Send + Sync + 'static,
) -> Spec {
    Spec::WithGen(inner.into(), GenFactory::new(factory))
}

// ---------------------------------------------------------------------------
// Built-in predicate vocabulary
// ---------------------------------------------------------------------------

/// Accepts every value
pub fn any() -> Spec {
    predicate_with_hint("any", GenHint::Any, |_| true)
}

pub fn is_bool() -> Spec {
    predicate_with_hint("boolean", GenHint::Bool, |v| matches!(v, Value::Bool(_)))
}

pub fn is_int() -> Spec {
    predicate_with_hint("integer", GenHint::Int, |v| matches!(v, Value::Int(_)))
}

/// Integer in the inclusive range `[lo, hi]`
pub fn int_in(lo: i64, hi: i64) -> Result<Spec> {
    if lo > hi {
        return Err(SpecError::malformed(format!(
            "int-in lower bound {} exceeds upper bound {}",
            lo, hi
        )));
    }
    Ok(predicate_with_hint(
        format!("integer in [{}, {}]", lo, hi),
        GenHint::IntIn(lo, hi),
        move |v| matches!(v, Value::Int(n) if (lo..=hi).contains(n)),
    ))
}

pub fn is_float() -> Spec {
    predicate_with_hint("float", GenHint::Float, |v| matches!(v, Value::Float(_)))
}

pub fn is_number() -> Spec {
    predicate_with_hint("number", GenHint::Number, |v| {
        matches!(v, Value::Int(_) | Value::Float(_))
    })
}

pub fn is_string() -> Spec {
    predicate_with_hint("string", GenHint::Str, |v| matches!(v, Value::Str(_)))
}

/// String matching an anchored regex pattern. The pattern compiles at
/// construction time; no generator is derivable from it.
pub fn string_matching(pattern: &str) -> Result<Spec> {
    let re = Regex::new(pattern)
        .map_err(|e| SpecError::malformed(format!("invalid pattern `{}`: {}", pattern, e)))?;
    Ok(predicate(
        format!("string matching `{}`", pattern),
        move |v| match v {
            Value::Str(s) => re.is_match(s),
            _ => false,
        },
    ))
}

pub fn is_keyword() -> Spec {
    predicate_with_hint("keyword", GenHint::Keyword, |v| {
        matches!(v, Value::Keyword(_))
    })
}

/// Set membership among fixed elements
pub fn one_of(elements: Vec<Value>) -> Result<Spec> {
    if elements.is_empty() {
        return Err(SpecError::malformed("one-of requires at least one element"));
    }
    let set: BTreeSet<Value> = elements.iter().cloned().collect();
    let desc = format!(
        "one of {}",
        Value::Set(set.clone())
    );
    Ok(predicate_with_hint(desc, GenHint::OneOf(elements), move |v| {
        set.contains(v)
    }))
}

pub fn is_map() -> Spec {
    predicate("map", |v| matches!(v, Value::Map(_)))
}

pub fn is_coll() -> Spec {
    predicate("collection", |v| {
        matches!(v, Value::Vector(_) | Value::Set(_))
    })
}
