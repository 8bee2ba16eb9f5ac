//! Generator engine
//!
//! Derives a seeded, deterministic producer of values satisfying a spec.
//! Predicates generate from their declared semantic hint; `and` generates
//! from its first derivable child and filters by re-validating against the
//! whole spec (rejection sampling, bounded retry); `with_gen` overrides
//! are trusted for shape but every sample is still re-validated before it
//! is surfaced.
//!
//! Generation is deterministic given a seed: `generate(seed)` and
//! `sample(seed, n)` are pure functions of the seed and the current
//! registry contents.
//!
//! Recursive named specs terminate through a recursion depth budget: at
//! depth zero `or` takes its first branch, collections take their minimum
//! count, optional keys are skipped, and `nilable` yields nil.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::conform;
use crate::error::{Result, SpecError};
use crate::ident::Ident;
use crate::spec::{GenHint, Spec, SpecRef};
use crate::value::Value;

/// Rejection-sampling retry budget for `and` and distinctness loops
pub const RETRY_BUDGET: usize = 100;

/// Recursion depth budget; bounds generation of recursive named specs
const RECURSION_DEPTH: u32 = 4;

/// Elements added above a collection's minimum count when no maximum binds
const GROWTH: usize = 3;

/// A seeded producer of values satisfying a spec
#[derive(Clone)]
pub struct Generator {
    f: Arc<dyn Fn(&mut StdRng) -> Result<Value> + Send + Sync>,
}

impl Generator {
    /// Build a generator from a drawing function; the usual way to write a
    /// `with_gen` override
    pub fn from_fn(f: impl Fn(&mut StdRng) -> Result<Value> + Send + Sync + 'static) -> Self {
        Generator { f: Arc::new(f) }
    }

    /// Generator that always yields the same value
    pub fn constant(value: Value) -> Self {
        Generator::from_fn(move |_| Ok(value.clone()))
    }

    /// Uniform choice among fixed values
    pub fn elements(values: Vec<Value>) -> Self {
        Generator::from_fn(move |rng| {
            values
                .choose(rng)
                .cloned()
                .ok_or_else(|| SpecError::Ungeneratable("elements of empty set".into()))
        })
    }

    /// Draw one value
    pub fn generate(&self, seed: u64) -> Result<Value> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.run(&mut rng)
    }

    /// Draw `n` values from one seeded stream
    pub fn sample(&self, seed: u64, n: usize) -> Result<Vec<Value>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| self.run(&mut rng)).collect()
    }

    pub(crate) fn run(&self, rng: &mut StdRng) -> Result<Value> {
        (self.f)(rng)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generator(..)")
    }
}

/// Derive a generator from a spec.
///
/// A `with_gen` override at the top level runs its factory here, once per
/// `gen` call; derivation below the top level is lazy so redefinition and
/// recursion through the registry keep working.
pub fn gen(spec: impl Into<SpecRef>) -> Result<Generator> {
    let spec = spec.into();
    let resolved = spec.resolve()?;
    if let Spec::WithGen(inner, factory) = &*resolved {
        let override_gen = factory.invoke();
        let inner = inner.clone();
        return Ok(Generator::from_fn(move |rng| {
            checked_override_draw(&override_gen, &inner, rng)
        }));
    }
    Ok(Generator::from_fn(move |rng| {
        gen_ref(&spec, rng, RECURSION_DEPTH)
    }))
}

/// Generate `n` samples and pair each with its conformed value
pub fn exercise(spec: impl Into<SpecRef>, n: usize, seed: u64) -> Result<Vec<(Value, Value)>> {
    let spec = spec.into();
    let generator = gen(&spec)?;
    let samples = generator.sample(seed, n)?;
    samples
        .into_iter()
        .map(|sample| {
            match conform::conform_ref(&spec, &sample)? {
                conform::ConformResult::Conformed(c) => Ok((sample, c)),
                conform::ConformResult::Invalid => Err(SpecError::GeneratorContractViolation {
                    spec: spec.describe(),
                    value: sample,
                }),
            }
        })
        .collect()
}

/// Draw from an override and re-validate: custom generators are not
/// trusted to be correct, and a non-conforming sample is a defect in the
/// override, never silently accepted.
fn checked_override_draw(
    override_gen: &Generator,
    inner: &SpecRef,
    rng: &mut StdRng,
) -> Result<Value> {
    let value = override_gen.run(rng)?;
    if !conform::accepts_ref(inner, &value)? {
        return Err(SpecError::GeneratorContractViolation {
            spec: inner.describe(),
            value,
        });
    }
    Ok(value)
}

fn gen_ref(spec: &SpecRef, rng: &mut StdRng, depth: u32) -> Result<Value> {
    let spec = spec.resolve()?;
    gen_spec(&spec, rng, depth)
}

fn gen_spec(spec: &Spec, rng: &mut StdRng, depth: u32) -> Result<Value> {
    match spec {
        Spec::Predicate(p) => match p.hint() {
            Some(hint) => Ok(gen_from_hint(hint, rng)),
            None => Err(SpecError::Ungeneratable(p.description().to_string())),
        },

        Spec::And(children) => {
            // First derivable child is the source; the full `and` filters.
            let mut source = None;
            for child in children {
                match gen_ref(child, rng, depth) {
                    Ok(candidate) => {
                        source = Some((child, candidate));
                        break;
                    }
                    Err(SpecError::Ungeneratable(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            let Some((child, first)) = source else {
                return Err(SpecError::Ungeneratable("and with no derivable child".into()));
            };
            if conform::accepts(spec, &first)? {
                return Ok(first);
            }
            for attempt in 1..RETRY_BUDGET {
                let candidate = gen_ref(child, rng, depth)?;
                if conform::accepts(spec, &candidate)? {
                    trace!(attempt, "and rejection sampling succeeded");
                    return Ok(candidate);
                }
            }
            warn!(budget = RETRY_BUDGET, "and rejection sampling exhausted");
            Err(SpecError::GeneratorExhausted {
                spec: "and".into(),
                budget: RETRY_BUDGET,
            })
        }

        Spec::Or(branches) => {
            if depth == 0 {
                return gen_ref(&branches[0].spec, rng, 0);
            }
            let total: u32 = branches.iter().map(|b| b.weight).sum();
            let mut roll = rng.gen_range(0..total);
            for branch in branches {
                if roll < branch.weight {
                    return gen_ref(&branch.spec, rng, depth - 1);
                }
                roll -= branch.weight;
            }
            unreachable!("roll bounded by total weight")
        }

        Spec::Keys(ks) => {
            let mut out = std::collections::BTreeMap::new();
            for id in &ks.required {
                let value = gen_ref(&SpecRef::Named(id.clone()), rng, depth.saturating_sub(1))?;
                out.insert(Value::Keyword(ks.data_key_for(id)), value);
            }
            for id in &ks.optional {
                if depth > 0 && rng.gen_bool(0.5) {
                    let value = gen_ref(&SpecRef::Named(id.clone()), rng, depth - 1)?;
                    out.insert(Value::Keyword(ks.data_key_for(id)), value);
                }
            }
            Ok(Value::Map(out))
        }

        Spec::CollOf(cs) => {
            let n = pick_len(cs.count, cs.min_count, cs.max_count, rng, depth);
            let into = cs.into.or(cs.kind).unwrap_or(crate::spec::CollKind::Vector);
            let want_distinct = cs.distinct || into == crate::spec::CollKind::Set;
            if want_distinct {
                let mut seen = std::collections::BTreeSet::new();
                let mut attempts = 0usize;
                while seen.len() < n {
                    let v = gen_ref(&cs.element, rng, depth.saturating_sub(1))?;
                    seen.insert(v);
                    attempts += 1;
                    if attempts > n * RETRY_BUDGET.max(1) {
                        return Err(SpecError::GeneratorExhausted {
                            spec: "coll-of distinct".into(),
                            budget: RETRY_BUDGET,
                        });
                    }
                }
                let items: Vec<Value> = seen.into_iter().collect();
                return Ok(match into {
                    crate::spec::CollKind::Vector => Value::Vector(items),
                    crate::spec::CollKind::Set => Value::Set(items.into_iter().collect()),
                });
            }
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(gen_ref(&cs.element, rng, depth.saturating_sub(1))?);
            }
            Ok(match into {
                crate::spec::CollKind::Vector => Value::Vector(items),
                crate::spec::CollKind::Set => Value::Set(items.into_iter().collect()),
            })
        }

        Spec::MapOf(ms) => {
            let n = pick_len(ms.count, ms.min_count, ms.max_count, rng, depth);
            let mut out = std::collections::BTreeMap::new();
            let mut attempts = 0usize;
            while out.len() < n {
                let k = gen_ref(&ms.key, rng, depth.saturating_sub(1))?;
                let v = gen_ref(&ms.value, rng, depth.saturating_sub(1))?;
                out.insert(k, v);
                attempts += 1;
                if attempts > n * RETRY_BUDGET.max(1) {
                    return Err(SpecError::GeneratorExhausted {
                        spec: "map-of".into(),
                        budget: RETRY_BUDGET,
                    });
                }
            }
            Ok(Value::Map(out))
        }

        Spec::Tuple(positions) => {
            let mut items = Vec::with_capacity(positions.len());
            for position in positions {
                items.push(gen_ref(position, rng, depth.saturating_sub(1))?);
            }
            Ok(Value::Vector(items))
        }

        Spec::Cat(_) | Spec::Alt(_) | Spec::Rep(_) => {
            let mut out = Vec::new();
            gen_seq(spec, rng, depth, &mut out)?;
            Ok(Value::Vector(out))
        }

        Spec::Merge(components) => {
            let mut out = std::collections::BTreeMap::new();
            for component in components {
                match gen_ref(component, rng, depth)? {
                    Value::Map(m) => out.extend(m),
                    other => {
                        return Err(SpecError::GeneratorContractViolation {
                            spec: "merge component".into(),
                            value: other,
                        })
                    }
                }
            }
            Ok(Value::Map(out))
        }

        Spec::Nilable(inner) => {
            if depth == 0 || rng.gen_bool(0.2) {
                Ok(Value::Nil)
            } else {
                gen_ref(inner, rng, depth - 1)
            }
        }

        Spec::WithGen(inner, factory) => {
            let override_gen = factory.invoke();
            checked_override_draw(&override_gen, inner, rng)
        }
    }
}

/// Generate the flat span a regex operator contributes to a sequence
fn gen_seq(spec: &Spec, rng: &mut StdRng, depth: u32, out: &mut Vec<Value>) -> Result<()> {
    match spec {
        Spec::Cat(parts) => {
            for (_, part) in parts {
                gen_seq_ref(part, rng, depth, out)?;
            }
            Ok(())
        }
        Spec::Alt(branches) => {
            let idx = if depth == 0 {
                0
            } else {
                rng.gen_range(0..branches.len())
            };
            gen_seq_ref(&branches[idx].1, rng, depth, out)
        }
        Spec::Rep(rs) => {
            let upper = rs.upper.unwrap_or(rs.lower + GROWTH);
            let n = if depth == 0 {
                rs.lower
            } else {
                rng.gen_range(rs.lower..=upper)
            };
            for _ in 0..n {
                gen_seq_ref(&rs.inner, rng, depth.saturating_sub(1), out)?;
            }
            Ok(())
        }
        // A non-regex spec contributes exactly one element
        other => {
            out.push(gen_spec(other, rng, depth.saturating_sub(1))?);
            Ok(())
        }
    }
}

fn gen_seq_ref(spec: &SpecRef, rng: &mut StdRng, depth: u32, out: &mut Vec<Value>) -> Result<()> {
    let resolved = spec.resolve()?;
    match &*resolved {
        // Overrides in sequence position draw whole spans: regex inners
        // splice the drawn vector, plain inners contribute one element.
        Spec::WithGen(inner, factory) => {
            let override_gen = factory.invoke();
            let value = checked_override_draw(&override_gen, inner, rng)?;
            let spliced = inner.resolve()?.is_regex_op();
            match value {
                Value::Vector(items) if spliced => out.extend(items),
                other => out.push(other),
            }
            Ok(())
        }
        other => gen_seq(other, rng, depth, out),
    }
}

fn pick_len(
    count: Option<usize>,
    min_count: Option<usize>,
    max_count: Option<usize>,
    rng: &mut StdRng,
    depth: u32,
) -> usize {
    if let Some(n) = count {
        return n;
    }
    let lo = min_count.unwrap_or(0);
    if depth == 0 {
        return lo;
    }
    let hi = max_count.unwrap_or(lo + GROWTH);
    rng.gen_range(lo..=hi)
}

fn gen_from_hint(hint: &GenHint, rng: &mut StdRng) -> Value {
    match hint {
        GenHint::Any => match rng.gen_range(0..6u8) {
            0 => Value::Nil,
            1 => Value::Bool(rng.gen_bool(0.5)),
            2 => Value::Int(rng.gen_range(-1000i64..=1000)),
            3 => Value::Float((rng.gen::<f64>() - 0.5) * 2000.0),
            4 => Value::Str(gen_string(rng)),
            _ => Value::Keyword(gen_ident(rng)),
        },
        GenHint::Bool => Value::Bool(rng.gen_bool(0.5)),
        GenHint::Int => Value::Int(rng.gen_range(-1_000_000i64..=1_000_000)),
        GenHint::IntIn(lo, hi) => Value::Int(rng.gen_range(*lo..=*hi)),
        GenHint::Float => Value::Float((rng.gen::<f64>() - 0.5) * 2000.0),
        GenHint::Number => {
            if rng.gen_bool(0.5) {
                Value::Int(rng.gen_range(-1_000_000i64..=1_000_000))
            } else {
                Value::Float((rng.gen::<f64>() - 0.5) * 2000.0)
            }
        }
        GenHint::Str => Value::Str(gen_string(rng)),
        GenHint::Keyword => Value::Keyword(gen_ident(rng)),
        GenHint::OneOf(values) => values
            .choose(rng)
            .cloned()
            .unwrap_or(Value::Nil),
    }
}

fn gen_string(rng: &mut StdRng) -> String {
    let len = rng.gen_range(0..=12usize);
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

fn gen_ident(rng: &mut StdRng) -> Ident {
    let len = rng.gen_range(1..=8usize);
    let name: String = (0..len)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect();
    Ident::unqualified(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conform::valid;
    use crate::registry;
    use crate::spec::{
        self, and, cat, coll_of, int_in, is_int, is_string, keys, nilable, or, predicate, rep,
        tuple, with_gen, CollKind, SpecRef,
    };

    #[test]
    fn test_same_seed_same_samples() {
        let g = gen(is_int()).unwrap();
        assert_eq!(g.sample(7, 20).unwrap(), g.sample(7, 20).unwrap());
    }

    #[test]
    fn test_int_in_range_respected() {
        let g = gen(int_in(10, 20).unwrap()).unwrap();
        for v in g.sample(1, 200).unwrap() {
            let n = v.as_int().unwrap();
            assert!((10..=20).contains(&n));
        }
    }

    #[test]
    fn test_hintless_predicate_is_ungeneratable() {
        let spec = predicate("prime", |v| v.as_int().map_or(false, |n| n == 2));
        let g = gen(spec).unwrap();
        assert!(matches!(g.generate(1), Err(SpecError::Ungeneratable(_))));
    }

    #[test]
    fn test_and_rejection_sampling() {
        let even = predicate("even", |v| v.as_int().map_or(false, |n| n % 2 == 0));
        let spec = and(vec![SpecRef::from(int_in(0, 100).unwrap()), SpecRef::from(even)]).unwrap();
        let g = gen(spec).unwrap();
        for v in g.sample(3, 50).unwrap() {
            assert_eq!(v.as_int().unwrap() % 2, 0);
        }
    }

    #[test]
    fn test_and_exhausts_on_unsatisfiable_filter() {
        let never = predicate("greater than a thousand", |v| {
            v.as_int().map_or(false, |n| n > 1000)
        });
        let spec = and(vec![SpecRef::from(int_in(0, 10).unwrap()), SpecRef::from(never)]).unwrap();
        let g = gen(spec).unwrap();
        assert!(matches!(
            g.generate(1),
            Err(SpecError::GeneratorExhausted { .. })
        ));
    }

    #[test]
    fn test_or_covers_branches() {
        let spec = or(vec![("n", is_int()), ("s", is_string())]).unwrap();
        let g = gen(spec).unwrap();
        let samples = g.sample(11, 100).unwrap();
        assert!(samples.iter().any(|v| v.as_int().is_some()));
        assert!(samples.iter().any(|v| v.as_str().is_some()));
    }

    #[test]
    fn test_keys_generates_required_and_sometimes_optional() {
        registry::register("gen-keys/name", is_string());
        registry::register("gen-keys/age", int_in(0, 120).unwrap());
        let spec = keys()
            .req(vec!["gen-keys/name"])
            .opt(vec!["gen-keys/age"])
            .build()
            .unwrap();
        let g = gen(spec).unwrap();
        let samples = g.sample(5, 100).unwrap();
        let mut with_age = 0;
        for v in &samples {
            let m = v.as_map().unwrap();
            assert!(m.contains_key(&Value::kw("gen-keys/name")));
            if m.contains_key(&Value::kw("gen-keys/age")) {
                with_age += 1;
            }
        }
        assert!(with_age > 0 && with_age < samples.len());
    }

    #[test]
    fn test_coll_count_and_distinct() {
        let spec = coll_of(int_in(0, 1000).unwrap())
            .count(5)
            .distinct(true)
            .build()
            .unwrap();
        let g = gen(spec).unwrap();
        for v in g.sample(13, 30).unwrap() {
            let items = v.as_vector().unwrap();
            assert_eq!(items.len(), 5);
            let set: std::collections::BTreeSet<_> = items.iter().collect();
            assert_eq!(set.len(), 5);
        }
    }

    #[test]
    fn test_coll_into_set() {
        let spec = coll_of(int_in(0, 1000).unwrap())
            .count(3)
            .into_kind(CollKind::Set)
            .build()
            .unwrap();
        let g = gen(spec).unwrap();
        let v = g.generate(17).unwrap();
        assert_eq!(v.as_set().unwrap().len(), 3);
    }

    #[test]
    fn test_with_gen_override_used_and_validated() {
        let good = with_gen(is_string(), || Generator::constant(Value::from("fixed")));
        let g = gen(good).unwrap();
        assert_eq!(g.generate(1).unwrap(), Value::from("fixed"));

        let bad = with_gen(is_string(), || Generator::constant(Value::from(5)));
        let g = gen(bad).unwrap();
        assert!(matches!(
            g.generate(1),
            Err(SpecError::GeneratorContractViolation { .. })
        ));
    }

    #[test]
    fn test_recursive_spec_generation_terminates() {
        registry::register(
            "gen-rec/tree",
            or(vec![
                ("leaf", SpecRef::from(int_in(0, 9).unwrap())),
                (
                    "node",
                    SpecRef::from(
                        coll_of(SpecRef::Named("gen-rec/tree".into()))
                            .max_count(2)
                            .build()
                            .unwrap(),
                    ),
                ),
            ])
            .unwrap(),
        );
        let g = gen(SpecRef::Named("gen-rec/tree".into())).unwrap();
        for v in g.sample(23, 50).unwrap() {
            assert!(valid(SpecRef::Named("gen-rec/tree".into()), &v).unwrap());
        }
    }

    #[test]
    fn test_cat_generation_conforms() {
        let spec = cat(vec![
            ("ints", rep(int_in(0, 9).unwrap(), 1, Some(3)).unwrap()),
            ("tail", is_string()),
        ])
        .unwrap();
        let g = gen(spec.clone()).unwrap();
        for v in g.sample(29, 50).unwrap() {
            assert!(valid(spec.clone(), &v).unwrap(), "{} fails cat", v);
        }
    }

    #[test]
    fn test_exercise_pairs_samples_with_conformed() {
        let spec = or(vec![("n", is_int()), ("s", is_string())]).unwrap();
        let pairs = exercise(spec, 10, 31).unwrap();
        assert_eq!(pairs.len(), 10);
        for (sample, conformed) in pairs {
            let tagged = conformed.as_vector().unwrap();
            assert_eq!(tagged.len(), 2);
            assert_eq!(tagged[1], sample);
        }
    }

    #[test]
    fn test_generated_samples_always_valid() {
        registry::register("gen-prop/name", is_string());
        let specs = vec![
            SpecRef::from(is_int()),
            SpecRef::from(nilable(is_string())),
            SpecRef::from(tuple(vec![is_int(), is_string()]).unwrap()),
            SpecRef::from(coll_of(int_in(-5, 5).unwrap()).min_count(1).build().unwrap()),
            SpecRef::from(
                spec::map_of(spec::is_keyword(), is_int())
                    .min_count(1)
                    .max_count(4)
                    .build()
                    .unwrap(),
            ),
            SpecRef::from(keys().req(vec!["gen-prop/name"]).build().unwrap()),
        ];
        for spec in specs {
            let g = gen(&spec).unwrap();
            for v in g.sample(41, 1000).unwrap() {
                assert!(
                    valid(&spec, &v).unwrap(),
                    "generated sample {} fails its spec",
                    v
                );
            }
        }
    }
}
