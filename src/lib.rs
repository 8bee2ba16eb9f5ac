//! Dataspec
//!
//! A predicate-based data specification engine: compose small predicates
//! into rich schemas, validate arbitrary values against them, conform
//! values into a canonical shape, explain every way a value fails
//! (including across alternative branches), and derive seeded random test
//! data guaranteed to satisfy the same spec used to validate it.
//!
//! ## Features
//!
//! - **Spec Algebra**: `and`, `or`, `keys`, `coll_of`, `map_of`, `tuple`,
//!   `cat`/`alt`/`rep`, `merge`, `nilable`, `with_gen`
//! - **Registry**: process-wide namespaced identifiers, lazily resolved so
//!   named specs may reference each other recursively
//! - **Conformance**: validate and canonicalize in one walk; failure is a
//!   dedicated sentinel, never a value
//! - **Explanation**: every problem with its data path, spec path, and
//!   via chain
//! - **Generation**: seeded deterministic samples, rejection sampling for
//!   refined specs, validated custom overrides
//! - **Instrumentation**: function contracts checked per call and verified
//!   generatively with shrinking
//!
//! ## Example
//!
//! ```
//! use dataspec::{conform, explain_data, gen, int_in, keys, registry, valid, Value};
//!
//! registry::register("player/score", int_in(0, 100).unwrap());
//! let player = keys().req(vec!["player/score"]).build().unwrap();
//!
//! let good = Value::map([(Value::kw("player/score"), Value::from(71))]);
//! assert!(valid(player.clone(), &good).unwrap());
//!
//! let bad = Value::map([(Value::kw("player/score"), Value::from(-3))]);
//! assert!(!explain_data(player.clone(), &bad).unwrap().is_empty());
//!
//! let samples = gen(player).unwrap().sample(42, 10).unwrap();
//! assert_eq!(samples.len(), 10);
//! ```

pub mod conform;
pub mod error;
pub mod explain;
pub mod gen;
pub mod ident;
pub mod instrument;
pub mod registry;
pub mod spec;
pub mod value;

pub use conform::{conform, valid, ConformResult};
pub use error::{Result, SpecError};
pub use explain::{explain, explain_data, explain_str, PathSeg, Problem};
pub use gen::{exercise, gen, Generator};
pub use ident::Ident;
pub use registry::{lookup, register};
pub use instrument::{
    check, check_with, fdef, instrument, register_fn, unstrument, CheckConfig, CheckOutcome,
    CheckReport, DynFn, FnContract, InstrumentedFn,
};
pub use spec::{
    alt, and, any, cat, coll_of, int_in, is_bool, is_coll, is_float, is_int, is_keyword, is_map,
    is_number, is_string, keys, map_of, merge, named, nilable, one_of, or, or_weighted, predicate,
    predicate_with_hint, rep, string_matching, tuple, with_gen, CollKind, GenHint, Spec, SpecRef,
};
pub use value::Value;
