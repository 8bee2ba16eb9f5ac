//! Explain engine
//!
//! Re-walks a spec against a failing value and collects every problem,
//! instead of short-circuiting the way `conform` does: `or`/`alt` report
//! one problem per failing branch, `keys` reports each missing required
//! key and each failing per-key value. `and` stops at its first failing
//! child (downstream children would only see an already-invalid input) but
//! still descends into that child for its nested problems.
//!
//! An empty problem list and `valid` agree on every input.

use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::conform::{self, ConformResult};
use crate::error::Result;
use crate::ident::Ident;
use crate::registry;
use crate::spec::{CollKind, Spec, SpecRef};
use crate::value::Value;

/// One step of a path into a data value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSeg {
    /// Map key
    Key(Value),
    /// Sequence position
    Index(usize),
}

/// One reason a value fails a spec
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    /// Path into the data to the offending value
    #[serde(rename = "in")]
    pub in_: Vec<PathSeg>,
    /// Path into the spec: branch tags, part tags, key names
    pub path: Vec<String>,
    /// Registry identifiers traversed to reach the failing spec
    pub via: Vec<Ident>,
    /// Description of the failing test
    pub predicate: String,
    /// The offending value
    pub value: Value,
}

/// Collect every problem a value has against a spec.
///
/// Empty result means the value is valid.
pub fn explain_data(spec: impl Into<SpecRef>, value: &Value) -> Result<Vec<Problem>> {
    let mut out = Vec::new();
    explain_ref(&spec.into(), &Ctx::root(), value, &mut out)?;
    Ok(out)
}

/// Render the problems as text without printing them
pub fn explain_str(spec: impl Into<SpecRef>, value: &Value) -> Result<String> {
    let problems = explain_data(spec, value)?;
    Ok(render(&problems))
}

/// Render the problems to standard output
pub fn explain(spec: impl Into<SpecRef>, value: &Value) -> Result<()> {
    print!("{}", explain_str(spec, value)?);
    Ok(())
}

fn render(problems: &[Problem]) -> String {
    if problems.is_empty() {
        return "Success!\n".to_string();
    }
    let mut out = String::new();
    for p in problems {
        let _ = write!(out, "{} - failed: {}", p.value, p.predicate);
        if !p.in_.is_empty() {
            let segs: Vec<String> = p
                .in_
                .iter()
                .map(|seg| match seg {
                    PathSeg::Key(k) => k.to_string(),
                    PathSeg::Index(i) => i.to_string(),
                })
                .collect();
            let _ = write!(out, " in: [{}]", segs.join(" "));
        }
        if !p.path.is_empty() {
            let _ = write!(out, " at: [{}]", p.path.join(" "));
        }
        if !p.via.is_empty() {
            let vias: Vec<String> = p.via.iter().map(ToString::to_string).collect();
            let _ = write!(out, " via: [{}]", vias.join(" "));
        }
        out.push('\n');
    }
    out
}

/// Walk context: current data path, spec path, and via chain
#[derive(Clone)]
struct Ctx {
    in_: Vec<PathSeg>,
    path: Vec<String>,
    via: Vec<Ident>,
}

impl Ctx {
    fn root() -> Self {
        Ctx {
            in_: Vec::new(),
            path: Vec::new(),
            via: Vec::new(),
        }
    }

    fn push_in(&self, seg: PathSeg) -> Self {
        let mut next = self.clone();
        next.in_.push(seg);
        next
    }

    fn push_path(&self, tag: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.path.push(tag.into());
        next
    }

    fn push_via(&self, id: &Ident) -> Self {
        let mut next = self.clone();
        next.via.push(id.clone());
        next
    }

    fn problem(&self, predicate: impl Into<String>, value: Value) -> Problem {
        Problem {
            in_: self.in_.clone(),
            path: self.path.clone(),
            via: self.via.clone(),
            predicate: predicate.into(),
            value,
        }
    }
}

/// Resolve a reference, extending the via chain for named entries
fn resolve_tracking(spec: &SpecRef, ctx: &Ctx) -> Result<(Arc<Spec>, Ctx)> {
    match spec {
        SpecRef::Named(id) => Ok((registry::lookup(id)?, ctx.push_via(id))),
        SpecRef::Inline(s) => Ok((Arc::clone(s), ctx.clone())),
    }
}

/// Peel `with_gen` wrappers, tracking via through named layers
fn deref_tracking(spec: Arc<Spec>, ctx: Ctx) -> Result<(Arc<Spec>, Ctx)> {
    let mut current = spec;
    let mut ctx = ctx;
    loop {
        let inner = match &*current {
            Spec::WithGen(inner, _) => inner,
            _ => return Ok((current, ctx)),
        };
        let (next, next_ctx) = resolve_tracking(inner, &ctx)?;
        current = next;
        ctx = next_ctx;
    }
}

fn explain_ref(spec: &SpecRef, ctx: &Ctx, value: &Value, out: &mut Vec<Problem>) -> Result<()> {
    let (spec, ctx) = resolve_tracking(spec, ctx)?;
    explain_spec(&spec, &ctx, value, out)
}

fn explain_spec(spec: &Spec, ctx: &Ctx, value: &Value, out: &mut Vec<Problem>) -> Result<()> {
    match spec {
        Spec::Predicate(p) => {
            if !p.test(value) {
                out.push(ctx.problem(p.description(), value.clone()));
            }
            Ok(())
        }

        Spec::And(children) => {
            let mut current = value.clone();
            for child in children {
                match conform::conform_ref(child, &current)? {
                    ConformResult::Conformed(v) => current = v,
                    ConformResult::Invalid => {
                        return explain_ref(child, ctx, &current, out);
                    }
                }
            }
            Ok(())
        }

        Spec::Or(branches) => {
            if conform::accepts(spec, value)? {
                return Ok(());
            }
            for branch in branches {
                let branch_ctx = ctx.push_path(branch.tag.to_string());
                explain_ref(&branch.spec, &branch_ctx, value, out)?;
            }
            Ok(())
        }

        Spec::Keys(ks) => {
            let map = match value.as_map() {
                Some(m) => m,
                None => {
                    out.push(ctx.problem("map", value.clone()));
                    return Ok(());
                }
            };
            for required in &ks.required {
                let data_key = ks.data_key_for(required);
                if conform::find_key(map, &data_key).is_none() {
                    out.push(
                        ctx.push_path(data_key.to_string())
                            .problem("all required identifiers present", value.clone()),
                    );
                }
            }
            for (key, val) in map {
                let spec_id = match conform::key_ident(key).map(|id| ks.spec_id_for_key(&id)) {
                    Some(id) => id,
                    None => continue,
                };
                if !registry::is_registered(&spec_id) {
                    continue;
                }
                let key_ctx = ctx
                    .push_in(PathSeg::Key(key.clone()))
                    .push_path(spec_id.to_string());
                explain_ref(&SpecRef::Named(spec_id), &key_ctx, val, out)?;
            }
            Ok(())
        }

        Spec::CollOf(cs) => {
            let (input_kind, items) = match value {
                Value::Vector(v) => (CollKind::Vector, v.iter().collect::<Vec<_>>()),
                Value::Set(s) => (CollKind::Set, s.iter().collect::<Vec<_>>()),
                _ => {
                    out.push(ctx.problem("collection", value.clone()));
                    return Ok(());
                }
            };
            if let Some(kind) = cs.kind {
                if kind != input_kind {
                    let wanted = match kind {
                        CollKind::Vector => "vector",
                        CollKind::Set => "set",
                    };
                    out.push(ctx.problem(wanted, value.clone()));
                    return Ok(());
                }
            }
            if let Some(n) = cs.count {
                if items.len() != n {
                    out.push(ctx.problem(format!("count {}", n), value.clone()));
                    return Ok(());
                }
            }
            if let Some(n) = cs.min_count {
                if items.len() < n {
                    out.push(ctx.problem(format!("count at least {}", n), value.clone()));
                    return Ok(());
                }
            }
            if let Some(n) = cs.max_count {
                if items.len() > n {
                    out.push(ctx.problem(format!("count at most {}", n), value.clone()));
                    return Ok(());
                }
            }
            if cs.distinct {
                let mut seen = std::collections::BTreeSet::new();
                if !items.iter().all(|item| seen.insert(*item)) {
                    out.push(ctx.problem("elements not distinct", value.clone()));
                    return Ok(());
                }
            }
            for (i, item) in items.iter().enumerate() {
                let item_ctx = ctx.push_in(PathSeg::Index(i));
                explain_ref(&cs.element, &item_ctx, item, out)?;
            }
            Ok(())
        }

        Spec::MapOf(ms) => {
            let map = match value.as_map() {
                Some(m) => m,
                None => {
                    out.push(ctx.problem("map", value.clone()));
                    return Ok(());
                }
            };
            if let Some(n) = ms.count {
                if map.len() != n {
                    out.push(ctx.problem(format!("count {}", n), value.clone()));
                    return Ok(());
                }
            }
            if let Some(n) = ms.min_count {
                if map.len() < n {
                    out.push(ctx.problem(format!("count at least {}", n), value.clone()));
                    return Ok(());
                }
            }
            if let Some(n) = ms.max_count {
                if map.len() > n {
                    out.push(ctx.problem(format!("count at most {}", n), value.clone()));
                    return Ok(());
                }
            }
            for (k, v) in map {
                let key_ctx = ctx.push_in(PathSeg::Key(k.clone())).push_path("key");
                explain_ref(&ms.key, &key_ctx, k, out)?;
                let val_ctx = ctx.push_in(PathSeg::Key(k.clone())).push_path("val");
                explain_ref(&ms.value, &val_ctx, v, out)?;
            }
            Ok(())
        }

        Spec::Tuple(positions) => {
            let items = match value.as_vector() {
                Some(v) => v,
                None => {
                    out.push(ctx.problem("vector", value.clone()));
                    return Ok(());
                }
            };
            if items.len() != positions.len() {
                out.push(ctx.problem(format!("length {}", positions.len()), value.clone()));
                return Ok(());
            }
            for (i, (pos, item)) in positions.iter().zip(items).enumerate() {
                let item_ctx = ctx.push_in(PathSeg::Index(i)).push_path(i.to_string());
                explain_ref(pos, &item_ctx, item, out)?;
            }
            Ok(())
        }

        Spec::Cat(_) | Spec::Alt(_) | Spec::Rep(_) => {
            let items = match value.as_vector() {
                Some(v) => v,
                None => {
                    out.push(ctx.problem("sequence", value.clone()));
                    return Ok(());
                }
            };
            match re_explain(spec, ctx, items, 0, out)? {
                Some(end) if end == items.len() => Ok(()),
                Some(end) => {
                    out.push(
                        ctx.push_in(PathSeg::Index(end))
                            .problem("extra input", items[end].clone()),
                    );
                    Ok(())
                }
                None => Ok(()),
            }
        }

        Spec::Merge(components) => {
            if value.as_map().is_none() {
                out.push(ctx.problem("map", value.clone()));
                return Ok(());
            }
            // Components all see the same original value, so unlike `and`
            // every failing component reports.
            for component in components {
                explain_ref(component, ctx, value, out)?;
            }
            Ok(())
        }

        Spec::Nilable(inner) => {
            if value.is_nil() {
                Ok(())
            } else {
                explain_ref(inner, ctx, value, out)
            }
        }

        Spec::WithGen(inner, _) => explain_ref(inner, ctx, value, out),
    }
}

/// Regex-operator explain over a flat sequence cursor. Mirrors the conform
/// cursor walk; pushes problems and returns `None` when the span fails.
fn re_explain(
    spec: &Spec,
    ctx: &Ctx,
    items: &[Value],
    start: usize,
    out: &mut Vec<Problem>,
) -> Result<Option<usize>> {
    match spec {
        Spec::Cat(parts) => {
            let mut pos = start;
            for (tag, part) in parts {
                let part_ctx = ctx.push_path(tag.to_string());
                let (part, part_ctx) = resolve_tracking(part, &part_ctx)
                    .and_then(|(s, c)| deref_tracking(s, c))?;
                if part.is_regex_op() {
                    match re_explain(&part, &part_ctx, items, pos, out)? {
                        Some(next) => pos = next,
                        None => return Ok(None),
                    }
                } else if pos >= items.len() {
                    out.push(part_ctx.problem("insufficient input", Value::Vector(items.to_vec())));
                    return Ok(None);
                } else if conform::accepts(&part, &items[pos])? {
                    pos += 1;
                } else {
                    let item_ctx = part_ctx.push_in(PathSeg::Index(pos));
                    explain_spec(&part, &item_ctx, &items[pos], out)?;
                    return Ok(None);
                }
            }
            Ok(Some(pos))
        }

        Spec::Alt(branches) => {
            for (_, branch) in branches {
                let (branch, _) = resolve_tracking(branch, ctx)
                    .and_then(|(s, c)| deref_tracking(s, c))?;
                if let Some(next) = re_probe(&branch, items, start)? {
                    return Ok(Some(next));
                }
            }
            for (tag, branch) in branches {
                let branch_ctx = ctx.push_path(tag.to_string());
                let (branch, branch_ctx) = resolve_tracking(branch, &branch_ctx)
                    .and_then(|(s, c)| deref_tracking(s, c))?;
                if branch.is_regex_op() {
                    re_explain(&branch, &branch_ctx, items, start, out)?;
                } else if start >= items.len() {
                    out.push(
                        branch_ctx.problem("insufficient input", Value::Vector(items.to_vec())),
                    );
                } else {
                    let item_ctx = branch_ctx.push_in(PathSeg::Index(start));
                    explain_spec(&branch, &item_ctx, &items[start], out)?;
                }
            }
            Ok(None)
        }

        Spec::Rep(rs) => {
            let (inner, inner_ctx) = resolve_tracking(&rs.inner, ctx)
                .and_then(|(s, c)| deref_tracking(s, c))?;
            let mut pos = start;
            let mut matched = 0usize;
            while rs.upper.map_or(true, |hi| matched < hi) {
                match re_probe(&inner, items, pos)? {
                    Some(next) if next > pos => {
                        matched += 1;
                        pos = next;
                    }
                    _ => break,
                }
            }
            if matched >= rs.lower {
                return Ok(Some(pos));
            }
            if pos < items.len() {
                let item_ctx = inner_ctx.push_in(PathSeg::Index(pos));
                explain_spec(&inner, &item_ctx, &items[pos], out)?;
            } else {
                out.push(inner_ctx.problem("insufficient input", Value::Vector(items.to_vec())));
            }
            Ok(None)
        }

        _ => unreachable!("re_explain is only entered for regex operators"),
    }
}

/// Silent cursor probe used before deciding which branches to explain
fn re_probe(spec: &Spec, items: &[Value], start: usize) -> Result<Option<usize>> {
    if spec.is_regex_op() {
        conform::re_accepts(spec, items, start)
    } else if start < items.len() && conform::accepts(spec, &items[start])? {
        Ok(Some(start + 1))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conform::valid;
    use crate::spec::{
        self, and, cat, coll_of, is_int, is_string, keys, nilable, or, rep, tuple,
    };

    #[test]
    fn test_valid_value_explains_empty() {
        let spec = is_int();
        let problems = explain_data(spec.clone(), &Value::from(1)).unwrap();
        assert!(problems.is_empty());
        assert_eq!(explain_str(spec, &Value::from(1)).unwrap(), "Success!\n");
    }

    #[test]
    fn test_or_reports_every_branch() {
        let spec = or(vec![("name", is_string()), ("id", is_int())]).unwrap();
        let problems = explain_data(spec, &Value::kw("foo")).unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].path, vec!["name"]);
        assert_eq!(problems[1].path, vec!["id"]);
        for p in &problems {
            assert_eq!(p.value, Value::kw("foo"));
        }
    }

    #[test]
    fn test_and_descends_into_first_failure_only() {
        let spec = and(vec![is_int(), is_string()]).unwrap();
        let problems = explain_data(spec, &Value::from("x")).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].predicate, "integer");
    }

    #[test]
    fn test_keys_missing_required() {
        crate::registry::register("explain-keys/a", is_int());
        crate::registry::register("explain-keys/b", is_int());
        let spec = keys()
            .req(vec!["explain-keys/a", "explain-keys/b"])
            .build()
            .unwrap();
        let v = Value::map([(Value::kw("explain-keys/a"), Value::from(1))]);
        let problems = explain_data(spec, &v).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].predicate, "all required identifiers present");
        assert_eq!(problems[0].path, vec!["explain-keys/b"]);
    }

    #[test]
    fn test_keys_bad_value_extends_in_and_via() {
        crate::registry::register("explain-via/name", is_string());
        let spec = keys().req(vec!["explain-via/name"]).build().unwrap();
        let v = Value::map([(Value::kw("explain-via/name"), Value::from(42))]);
        let problems = explain_data(spec, &v).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(
            problems[0].in_,
            vec![PathSeg::Key(Value::kw("explain-via/name"))]
        );
        assert_eq!(problems[0].via, vec![Ident::parse("explain-via/name")]);
        assert_eq!(problems[0].predicate, "string");
        assert_eq!(problems[0].value, Value::from(42));
    }

    #[test]
    fn test_via_accumulates_through_named_chain() {
        crate::registry::register("explain-chain/leaf", is_int());
        crate::registry::register(
            "explain-chain/list",
            coll_of(SpecRef::Named("explain-chain/leaf".into()))
                .build()
                .unwrap(),
        );
        let problems = explain_data(
            SpecRef::Named("explain-chain/list".into()),
            &Value::vec([Value::from("bad")]),
        )
        .unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(
            problems[0].via,
            vec![
                Ident::parse("explain-chain/list"),
                Ident::parse("explain-chain/leaf")
            ]
        );
        assert_eq!(problems[0].in_, vec![PathSeg::Index(0)]);
    }

    #[test]
    fn test_distinct_predicate_description() {
        let spec = coll_of(spec::is_number())
            .count(3)
            .distinct(true)
            .build()
            .unwrap();
        let problems = explain_data(
            spec,
            &Value::vec([Value::from(1), Value::from(1), Value::from(1)]),
        )
        .unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].predicate, "elements not distinct");
    }

    #[test]
    fn test_tuple_position_problem() {
        let spec = tuple(vec![is_int(), is_string()]).unwrap();
        let problems =
            explain_data(spec, &Value::vec([Value::from(1), Value::from(2)])).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].in_, vec![PathSeg::Index(1)]);
        assert_eq!(problems[0].predicate, "string");
    }

    #[test]
    fn test_cat_insufficient_input() {
        let spec = cat(vec![("a", is_int()), ("b", is_string())]).unwrap();
        let problems = explain_data(spec, &Value::vec([Value::from(1)])).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].predicate, "insufficient input");
        assert_eq!(problems[0].path, vec!["b"]);
    }

    #[test]
    fn test_cat_extra_input() {
        let spec = cat(vec![("a", is_int())]).unwrap();
        let problems =
            explain_data(spec, &Value::vec([Value::from(1), Value::from(2)])).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].predicate, "extra input");
        assert_eq!(problems[0].in_, vec![PathSeg::Index(1)]);
    }

    #[test]
    fn test_rep_lower_bound_failure() {
        let spec = rep(is_int(), 2, None).unwrap();
        let problems =
            explain_data(spec, &Value::vec([Value::from(1), Value::from("x")])).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].in_, vec![PathSeg::Index(1)]);
        assert_eq!(problems[0].predicate, "integer");
    }

    #[test]
    fn test_agreement_with_valid() {
        crate::registry::register("explain-agree/n", is_int());
        let specs = vec![
            SpecRef::from(is_int()),
            SpecRef::from(nilable(is_string())),
            SpecRef::from(or(vec![("n", is_int()), ("s", is_string())]).unwrap()),
            SpecRef::from(coll_of(is_int()).distinct(true).build().unwrap()),
            SpecRef::from(cat(vec![("xs", rep(is_int(), 0, None).unwrap())]).unwrap()),
            SpecRef::from(
                keys()
                    .req(vec!["explain-agree/n"])
                    .build()
                    .unwrap(),
            ),
        ];
        let values = vec![
            Value::Nil,
            Value::from(1),
            Value::from("x"),
            Value::vec([Value::from(1), Value::from(1)]),
            Value::vec([Value::from(1), Value::from("x")]),
            Value::map([(Value::kw("explain-agree/n"), Value::from(2))]),
            Value::map([(Value::kw("explain-agree/n"), Value::from("bad"))]),
        ];
        for spec in &specs {
            for value in &values {
                let is_valid = valid(spec, value).unwrap();
                let problems = explain_data(spec, value).unwrap();
                assert_eq!(
                    is_valid,
                    problems.is_empty(),
                    "agreement law broken for {:?} on {}",
                    spec,
                    value
                );
            }
        }
    }

    #[test]
    fn test_render_shape() {
        let spec = or(vec![("name", is_string()), ("id", is_int())]).unwrap();
        let text = explain_str(spec, &Value::kw("foo")).unwrap();
        assert!(text.contains(":foo - failed: string at: [name]"));
        assert!(text.contains(":foo - failed: integer at: [id]"));
    }

    #[test]
    fn test_problem_serializes() {
        let spec = is_int();
        let problems = explain_data(spec, &Value::from("x")).unwrap();
        let json = serde_json::to_value(&problems).unwrap();
        assert_eq!(json[0]["predicate"], "integer");
        assert_eq!(json[0]["value"], "x");
    }
}
