//! Instrumentation layer
//!
//! `fdef` registers a function contract (args spec, ret spec, optional
//! relational spec over `{args, ret}`) alongside the callable itself.
//! `instrument` returns a wrapper that checks the contract on every call,
//! failing fast with full explain data; `unstrument` hands back the raw
//! callable. `check` closes the loop with the generator engine: arguments
//! are generated from the args spec, the ORIGINAL callable runs, and the
//! first failing sample is shrunk to a minimal failing input.
//!
//! Args specs describe the flat argument vector, so `cat`/`tuple` are the
//! usual shapes. The relational spec sees the conformed args and return
//! value under the `:args` and `:ret` keys.

use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::conform::{conform, valid, ConformResult};
use crate::error::{Result, SpecError};
use crate::explain::explain_str;
use crate::gen;
use crate::ident::Ident;
use crate::spec::SpecRef;
use crate::value::Value;

/// A dynamically-typed callable under contract
pub type DynFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A function's declared contract
#[derive(Debug, Clone)]
pub struct FnContract {
    pub args: SpecRef,
    pub ret: SpecRef,
    pub rel: Option<SpecRef>,
}

#[derive(Clone, Default)]
struct FnEntry {
    contract: Option<FnContract>,
    callable: Option<DynFn>,
}

static FNS: OnceCell<RwLock<HashMap<Ident, FnEntry>>> = OnceCell::new();

fn cell() -> &'static RwLock<HashMap<Ident, FnEntry>> {
    FNS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn with_entry<T>(id: &Ident, f: impl FnOnce(&mut FnEntry) -> T) -> T {
    let mut map = match cell().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(map.entry(id.clone()).or_default())
}

fn entry(id: &Ident) -> Option<FnEntry> {
    let map = match cell().read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.get(id).cloned()
}

/// Register a function contract, overwriting any previous one
pub fn fdef(
    id: impl Into<Ident>,
    args: impl Into<SpecRef>,
    ret: impl Into<SpecRef>,
    rel: Option<SpecRef>,
) {
    let id = id.into();
    debug!(ident = %id, "registering function contract");
    let contract = FnContract {
        args: args.into(),
        ret: ret.into(),
        rel,
    };
    with_entry(&id, |e| e.contract = Some(contract));
}

/// Register the callable a contract describes
pub fn register_fn(id: impl Into<Ident>, f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) {
    let id = id.into();
    with_entry(&id, |e| e.callable = Some(Arc::new(f)));
}

fn contract_and_callable(id: &Ident) -> Result<(FnContract, DynFn)> {
    let entry = entry(id).ok_or_else(|| SpecError::UnknownFn(id.clone()))?;
    let contract = entry
        .contract
        .ok_or_else(|| SpecError::UnknownFn(id.clone()))?;
    let callable = entry
        .callable
        .ok_or_else(|| SpecError::UnknownFn(id.clone()))?;
    Ok((contract, callable))
}

/// A callable wrapped with contract checking on every invocation
#[derive(Clone)]
pub struct InstrumentedFn {
    ident: Ident,
    contract: FnContract,
    inner: DynFn,
}

impl InstrumentedFn {
    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    /// Invoke with checking: args are conformed before the call, the
    /// return value after it, then the relational spec over both
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let args_value = Value::Vector(args.to_vec());
        let conformed_args = match conform(&self.contract.args, &args_value)? {
            ConformResult::Conformed(v) => v,
            ConformResult::Invalid => {
                return Err(SpecError::ArgsInvalid {
                    report: explain_str(&self.contract.args, &args_value)?,
                })
            }
        };

        let ret = (self.inner)(args);

        let conformed_ret = match conform(&self.contract.ret, &ret)? {
            ConformResult::Conformed(v) => v,
            ConformResult::Invalid => {
                return Err(SpecError::RetInvalid {
                    report: explain_str(&self.contract.ret, &ret)?,
                })
            }
        };

        if let Some(rel) = &self.contract.rel {
            let ctx = rel_context(conformed_args, conformed_ret);
            if !valid(rel, &ctx)? {
                return Err(SpecError::FnInvalid {
                    report: explain_str(rel, &ctx)?,
                });
            }
        }
        Ok(ret)
    }
}

fn rel_context(conformed_args: Value, conformed_ret: Value) -> Value {
    Value::map([
        (Value::kw("args"), conformed_args),
        (Value::kw("ret"), conformed_ret),
    ])
}

/// Wrap a registered function with contract checking
pub fn instrument(id: impl Into<Ident>) -> Result<InstrumentedFn> {
    let id = id.into();
    let (contract, inner) = contract_and_callable(&id)?;
    Ok(InstrumentedFn {
        ident: id,
        contract,
        inner,
    })
}

/// The raw, unchecked callable
pub fn unstrument(id: impl Into<Ident>) -> Result<DynFn> {
    let id = id.into();
    let (_, callable) = contract_and_callable(&id)?;
    Ok(callable)
}

/// Bounds for a generative check run
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Number of generated trials
    pub num_tests: usize,
    /// Seed for the whole run; same seed, same report
    pub seed: u64,
    /// Upper bound on accepted shrink steps
    pub max_shrink_steps: usize,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            num_tests: 100,
            seed: 0,
            max_shrink_steps: 1000,
        }
    }
}

/// Outcome of a generative check
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed {
        /// The first failing argument vector as generated
        args: Value,
        /// The minimal failing argument vector found by shrinking
        shrunk_args: Value,
        shrink_steps: usize,
        /// The violation observed on the shrunk input
        violation: String,
    },
}

/// Result of `check`, the only structured output an embedding application
/// renders besides `Problem`
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub ident: Ident,
    pub trials: usize,
    pub seed: u64,
    pub outcome: CheckOutcome,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Passed)
    }
}

/// Generatively check a registered function against its contract with
/// default bounds
pub fn check(id: impl Into<Ident>) -> Result<CheckReport> {
    check_with(id, &CheckConfig::default())
}

/// Generatively check with explicit bounds
pub fn check_with(id: impl Into<Ident>, config: &CheckConfig) -> Result<CheckReport> {
    let id = id.into();
    let (contract, callable) = contract_and_callable(&id)?;
    let generator = gen::gen(&contract.args)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    debug!(ident = %id, trials = config.num_tests, "starting generative check");
    for trial in 0..config.num_tests {
        let args_value = generator.run(&mut rng)?;
        if let Some(violation) = run_trial(&contract, &callable, &args_value)? {
            let (shrunk, steps) =
                shrink(&contract, &callable, args_value.clone(), config.max_shrink_steps)?;
            let final_violation =
                run_trial(&contract, &callable, &shrunk)?.unwrap_or(violation);
            debug!(ident = %id, trial, steps, "check found a counterexample");
            return Ok(CheckReport {
                ident: id,
                trials: trial + 1,
                seed: config.seed,
                outcome: CheckOutcome::Failed {
                    args: args_value,
                    shrunk_args: shrunk,
                    shrink_steps: steps,
                    violation: final_violation,
                },
            });
        }
    }
    Ok(CheckReport {
        ident: id,
        trials: config.num_tests,
        seed: config.seed,
        outcome: CheckOutcome::Passed,
    })
}

/// Call the original function on one argument vector; `Some(violation)`
/// when the ret or relational spec fails
fn run_trial(contract: &FnContract, callable: &DynFn, args_value: &Value) -> Result<Option<String>> {
    let args: Vec<Value> = match args_value.as_vector() {
        Some(items) => items.to_vec(),
        None => vec![args_value.clone()],
    };
    let ret = callable(&args);

    let conformed_ret = match conform(&contract.ret, &ret)? {
        ConformResult::Conformed(v) => v,
        ConformResult::Invalid => {
            return Ok(Some(format!(
                "return value does not conform:\n{}",
                explain_str(&contract.ret, &ret)?
            )))
        }
    };

    if let Some(rel) = &contract.rel {
        let conformed_args = match conform(&contract.args, args_value)? {
            ConformResult::Conformed(v) => v,
            // Generated args failing their own spec would be a generator
            // defect; surface it rather than blame the function.
            ConformResult::Invalid => {
                return Err(SpecError::GeneratorContractViolation {
                    spec: contract.args.describe(),
                    value: args_value.clone(),
                })
            }
        };
        let ctx = rel_context(conformed_args, conformed_ret);
        if !valid(rel, &ctx)? {
            return Ok(Some(format!(
                "args/ret relation does not hold:\n{}",
                explain_str(rel, &ctx)?
            )));
        }
    }
    Ok(None)
}

/// Greedy structural shrink: repeatedly accept the first simpler candidate
/// that still satisfies the args spec and still fails the contract
fn shrink(
    contract: &FnContract,
    callable: &DynFn,
    start: Value,
    max_steps: usize,
) -> Result<(Value, usize)> {
    let mut current = start;
    let mut steps = 0usize;
    'outer: while steps < max_steps {
        for candidate in shrink_candidates(&current) {
            if !valid(&contract.args, &candidate)? {
                continue;
            }
            if run_trial(contract, callable, &candidate)?.is_some() {
                current = candidate;
                steps += 1;
                continue 'outer;
            }
        }
        break;
    }
    Ok((current, steps))
}

/// Simpler variants of a value, simplest first
fn shrink_candidates(value: &Value) -> Vec<Value> {
    match value {
        Value::Int(n) => {
            let mut out = Vec::new();
            if *n != 0 {
                out.push(Value::Int(0));
                let half = n / 2;
                if half != *n {
                    out.push(Value::Int(half));
                }
                // Stepping by one and by two keeps both parities reachable
                // when a constraint pins the faster candidates.
                out.push(Value::Int(n - n.signum()));
                if n.abs() >= 2 {
                    out.push(Value::Int(n - 2 * n.signum()));
                }
            }
            out
        }
        Value::Float(x) => {
            let mut out = Vec::new();
            if *x != 0.0 {
                out.push(Value::Float(0.0));
                if x.trunc() != *x {
                    out.push(Value::Float(x.trunc()));
                }
            }
            out
        }
        Value::Str(s) => {
            let mut out = Vec::new();
            if !s.is_empty() {
                out.push(Value::Str(String::new()));
                out.push(Value::Str(s.chars().take(s.chars().count() / 2).collect()));
            }
            out
        }
        Value::Bool(true) => vec![Value::Bool(false)],
        Value::Vector(items) => {
            let mut out = Vec::new();
            if !items.is_empty() {
                out.push(Value::Vector(items[..items.len() - 1].to_vec()));
                out.push(Value::Vector(items[..items.len() / 2].to_vec()));
            }
            for (i, item) in items.iter().enumerate() {
                for candidate in shrink_candidates(item) {
                    let mut next = items.clone();
                    next[i] = candidate;
                    out.push(Value::Vector(next));
                }
            }
            out
        }
        Value::Set(items) => {
            let mut out = Vec::new();
            for drop in items {
                let rest: std::collections::BTreeSet<Value> =
                    items.iter().filter(|v| *v != drop).cloned().collect();
                out.push(Value::Set(rest));
            }
            out
        }
        Value::Map(entries) => {
            let mut out = Vec::new();
            for key in entries.keys() {
                let mut rest = entries.clone();
                rest.remove(key);
                out.push(Value::Map(rest));
            }
            for (key, val) in entries {
                for candidate in shrink_candidates(val) {
                    let mut next = entries.clone();
                    next.insert(key.clone(), candidate);
                    out.push(Value::Map(next));
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{cat, int_in, is_int, predicate, SpecRef};

    fn sum_contract(ns: &str) -> Ident {
        let id = Ident::parse(&format!("{}/add", ns));
        let args = cat(vec![
            ("a", int_in(0, 100).unwrap()),
            ("b", int_in(0, 100).unwrap()),
        ])
        .unwrap();
        let rel = predicate("ret equals a plus b", |ctx| {
            let Some(m) = ctx.as_map() else { return false };
            let args = m.get(&Value::kw("args")).and_then(Value::as_map);
            let ret = m.get(&Value::kw("ret")).and_then(Value::as_int);
            match (args, ret) {
                (Some(args), Some(ret)) => {
                    let a = args.get(&Value::kw("a")).and_then(Value::as_int);
                    let b = args.get(&Value::kw("b")).and_then(Value::as_int);
                    matches!((a, b), (Some(a), Some(b)) if a + b == ret)
                }
                _ => false,
            }
        });
        fdef(&id, args, is_int(), Some(SpecRef::from(rel)));
        id
    }

    #[test]
    fn test_instrumented_passthrough() {
        let id = sum_contract("instr-ok");
        register_fn(&id, |args| {
            Value::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap())
        });
        let wrapped = instrument(&id).unwrap();
        let ret = wrapped.call(&[Value::from(2), Value::from(3)]).unwrap();
        assert_eq!(ret, Value::from(5));
    }

    #[test]
    fn test_args_invalid() {
        let id = sum_contract("instr-args");
        register_fn(&id, |_| Value::Int(0));
        let wrapped = instrument(&id).unwrap();
        let err = wrapped.call(&[Value::from("two"), Value::from(3)]).unwrap_err();
        assert!(matches!(err, SpecError::ArgsInvalid { .. }));
    }

    #[test]
    fn test_ret_invalid() {
        let id = sum_contract("instr-ret");
        register_fn(&id, |_| Value::from("not an int"));
        let wrapped = instrument(&id).unwrap();
        let err = wrapped.call(&[Value::from(1), Value::from(2)]).unwrap_err();
        assert!(matches!(err, SpecError::RetInvalid { .. }));
    }

    #[test]
    fn test_fn_invalid() {
        let id = sum_contract("instr-rel");
        register_fn(&id, |args| {
            Value::Int(args[0].as_int().unwrap() * args[1].as_int().unwrap())
        });
        let wrapped = instrument(&id).unwrap();
        // 2 * 3 != 2 + 3
        let err = wrapped.call(&[Value::from(2), Value::from(3)]).unwrap_err();
        assert!(matches!(err, SpecError::FnInvalid { .. }));
    }

    #[test]
    fn test_unstrument_returns_unchecked_callable() {
        let id = sum_contract("instr-raw");
        register_fn(&id, |_| Value::from("anything"));
        let raw = unstrument(&id).unwrap();
        assert_eq!(raw(&[Value::from(1)]), Value::from("anything"));
    }

    #[test]
    fn test_unknown_fn() {
        assert!(matches!(
            instrument("instr-missing/none"),
            Err(SpecError::UnknownFn(_))
        ));
    }

    #[test]
    fn test_check_passes_for_correct_impl() {
        let id = sum_contract("check-ok");
        register_fn(&id, |args| {
            Value::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap())
        });
        let report = check(&id).unwrap();
        assert!(report.passed());
        assert_eq!(report.trials, 100);
    }

    #[test]
    fn test_check_finds_and_shrinks_counterexample() {
        let id = sum_contract("check-bad");
        // Correct except when the first argument is even.
        register_fn(&id, |args| {
            let a = args[0].as_int().unwrap();
            let b = args[1].as_int().unwrap();
            if a % 2 == 0 {
                Value::Int(a + b + 1)
            } else {
                Value::Int(a + b)
            }
        });
        let report = check(&id).unwrap();
        let CheckOutcome::Failed {
            args,
            shrunk_args,
            violation,
            ..
        } = &report.outcome
        else {
            panic!("expected a counterexample");
        };
        assert!(violation.contains("relation"));
        let original = args.as_vector().unwrap();
        let shrunk = shrunk_args.as_vector().unwrap();
        assert_eq!(shrunk.len(), 2);
        // Shrinking never grows either argument.
        for (orig, small) in original.iter().zip(shrunk) {
            assert!(small.as_int().unwrap().abs() <= orig.as_int().unwrap().abs());
        }
        // The minimal failing pair for an even-parity bug is [0, 0].
        assert_eq!(shrunk_args, &Value::vec([Value::from(0), Value::from(0)]));
    }

    #[test]
    fn test_check_deterministic_for_seed() {
        let id = sum_contract("check-seed");
        register_fn(&id, |args| {
            let a = args[0].as_int().unwrap();
            let b = args[1].as_int().unwrap();
            if a > 50 {
                Value::Int(0)
            } else {
                Value::Int(a + b)
            }
        });
        let config = CheckConfig {
            num_tests: 200,
            seed: 9,
            ..CheckConfig::default()
        };
        let one = check_with(&id, &config).unwrap();
        let two = check_with(&id, &config).unwrap();
        assert_eq!(one.trials, two.trials);
        assert_eq!(
            serde_json::to_value(&one.outcome).unwrap(),
            serde_json::to_value(&two.outcome).unwrap()
        );
    }
}
