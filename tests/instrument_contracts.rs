//! Instrumentation contract enforcement and generative checking through
//! the public API.

use dataspec::{
    cat, check_with, fdef, instrument, int_in, is_int, predicate, register_fn, CheckConfig,
    CheckOutcome, SpecError, SpecRef, Value,
};

/// Contract: two ints in [1, 50]; the result must exceed both arguments.
fn exceeds_both_contract(ns: &str) -> String {
    let id = format!("{}/combine", ns);
    let args = cat(vec![
        ("x", int_in(1, 50).unwrap()),
        ("y", int_in(1, 50).unwrap()),
    ])
    .unwrap();
    let rel = predicate("ret exceeds both arguments", |ctx| {
        let Some(m) = ctx.as_map() else { return false };
        let args = m.get(&Value::kw("args")).and_then(Value::as_map);
        let ret = m.get(&Value::kw("ret")).and_then(Value::as_int);
        match (args, ret) {
            (Some(args), Some(ret)) => {
                let x = args.get(&Value::kw("x")).and_then(Value::as_int);
                let y = args.get(&Value::kw("y")).and_then(Value::as_int);
                matches!((x, y), (Some(x), Some(y)) if ret > x && ret > y)
            }
            _ => false,
        }
    });
    fdef(id.as_str(), args, is_int(), Some(SpecRef::from(rel)));
    id
}

#[test]
fn wrapped_fn_passes_when_contract_holds() {
    let id = exceeds_both_contract("contracts-pass");
    register_fn(id.as_str(), |args| {
        Value::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap())
    });
    let wrapped = instrument(id.as_str()).unwrap();
    let ret = wrapped.call(&[Value::from(10), Value::from(20)]).unwrap();
    assert_eq!(ret, Value::from(30));
}

#[test]
fn wrapped_fn_raises_on_violating_mock() {
    let id = exceeds_both_contract("contracts-mock");
    // Mock returns the larger argument, never exceeding both.
    register_fn(id.as_str(), |args| {
        Value::Int(
            args[0]
                .as_int()
                .unwrap()
                .max(args[1].as_int().unwrap()),
        )
    });
    let wrapped = instrument(id.as_str()).unwrap();
    let err = wrapped.call(&[Value::from(10), Value::from(20)]).unwrap_err();
    assert!(matches!(err, SpecError::FnInvalid { .. }));
}

#[test]
fn wrapped_fn_rejects_bad_args_before_calling() {
    let id = exceeds_both_contract("contracts-args");
    register_fn(id.as_str(), |_| panic!("must not be reached"));
    let wrapped = instrument(id.as_str()).unwrap();
    let err = wrapped.call(&[Value::from(0), Value::from(20)]).unwrap_err();
    assert!(matches!(err, SpecError::ArgsInvalid { .. }));
}

/// `check` must find a counterexample when the relation is deliberately
/// violated for one parity of input.
#[test]
fn check_finds_parity_counterexample() {
    let id = exceeds_both_contract("contracts-parity");
    register_fn(id.as_str(), |args| {
        let x = args[0].as_int().unwrap();
        let y = args[1].as_int().unwrap();
        if x % 2 == 0 {
            // Violates `ret > x && ret > y` for even x.
            Value::Int(x.min(y))
        } else {
            Value::Int(x + y)
        }
    });
    let config = CheckConfig {
        num_tests: 300,
        seed: 7,
        ..CheckConfig::default()
    };
    let report = check_with(id.as_str(), &config).unwrap();
    let CheckOutcome::Failed {
        shrunk_args,
        violation,
        ..
    } = &report.outcome
    else {
        panic!("parity violation must be caught within {} trials", config.num_tests);
    };
    assert!(violation.contains("relation"));

    // The shrunk arguments still satisfy the args spec and still fail:
    // both land on the spec minimum with an even first argument.
    let shrunk = shrunk_args.as_vector().unwrap();
    let x = shrunk[0].as_int().unwrap();
    let y = shrunk[1].as_int().unwrap();
    assert!((1..=50).contains(&x) && (1..=50).contains(&y));
    assert_eq!(x % 2, 0);
    assert_eq!((x, y), (2, 1));
}

#[test]
fn check_passes_honest_impl() {
    let id = exceeds_both_contract("contracts-honest");
    register_fn(id.as_str(), |args| {
        Value::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap())
    });
    let report = check_with(
        id.as_str(),
        &CheckConfig {
            num_tests: 500,
            seed: 11,
            ..CheckConfig::default()
        },
    )
    .unwrap();
    assert!(report.passed());
    assert_eq!(report.trials, 500);
}
