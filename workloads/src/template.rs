//! Query templates with random placeholders
//!
//! String values of the form `RANDINT(a,b)` and `RANDINTLIST(a,b,n)` are
//! replaced on every render. Both draw from `[a - 1, b - 1]`, matching the
//! offset existing benchmark configurations were written against.

use std::collections::BTreeSet;

use rand::Rng;
use serde_json::{Map, Value};

use unibench_core::WorkloadError;

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Literal(Value),
    RandInt { from: i64, to: i64 },
    RandIntList { from: i64, to: i64, len: usize },
    Object(Vec<(String, Slot)>),
    Array(Vec<Slot>),
}

/// Compiled query template
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    root: Slot,
}

/// `NAME(1,2,3)` with non-negative integer arguments
fn parse_call(text: &str, name: &str) -> Option<Vec<i64>> {
    let args = text.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')?;
    args.split(',')
        .map(|a| {
            if a.is_empty() || !a.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            a.parse::<i64>().ok()
        })
        .collect()
}

fn compile(value: &Value) -> Result<Slot, WorkloadError> {
    Ok(match value {
        Value::String(s) => {
            if let Some(args) = parse_call(s, "RANDINTLIST") {
                let &[from, to, len] = args.as_slice() else {
                    return Err(WorkloadError::InvalidParameter(format!(
                        "{s}: expected three arguments"
                    )));
                };
                check_range(s, from, to)?;
                if len > to - from + 1 {
                    return Err(WorkloadError::InvalidParameter(format!(
                        "{s}: not enough distinct values in range for length {len}"
                    )));
                }
                Slot::RandIntList {
                    from,
                    to,
                    len: len as usize,
                }
            } else if let Some(args) = parse_call(s, "RANDINT") {
                let &[from, to] = args.as_slice() else {
                    return Err(WorkloadError::InvalidParameter(format!(
                        "{s}: expected two arguments"
                    )));
                };
                check_range(s, from, to)?;
                Slot::RandInt { from, to }
            } else {
                Slot::Literal(value.clone())
            }
        }
        Value::Object(map) => Slot::Object(
            map.iter()
                .map(|(k, v)| -> Result<(String, Slot), WorkloadError> {
                    Ok((k.clone(), compile(v)?))
                })
                .collect::<Result<_, WorkloadError>>()?,
        ),
        Value::Array(items) => {
            Slot::Array(items.iter().map(compile).collect::<Result<_, _>>()?)
        }
        other => Slot::Literal(other.clone()),
    })
}

fn check_range(text: &str, from: i64, to: i64) -> Result<(), WorkloadError> {
    if from > to {
        return Err(WorkloadError::InvalidParameter(format!(
            "{text}: empty range"
        )));
    }
    Ok(())
}

fn draw<R: Rng + ?Sized>(rng: &mut R, from: i64, to: i64) -> i64 {
    rng.gen_range(0..=to - from) + from - 1
}

fn render_slot<R: Rng + ?Sized>(slot: &Slot, rng: &mut R) -> Value {
    match slot {
        Slot::Literal(v) => v.clone(),
        Slot::RandInt { from, to } => Value::from(draw(rng, *from, *to)),
        Slot::RandIntList { from, to, len } => {
            let mut seen = BTreeSet::new();
            let mut values = Vec::with_capacity(*len);
            while values.len() < *len {
                let v = draw(rng, *from, *to);
                if seen.insert(v) {
                    values.push(Value::from(v));
                }
            }
            Value::Array(values)
        }
        Slot::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, s)| (k.clone(), render_slot(s, rng)))
                .collect::<Map<_, _>>(),
        ),
        Slot::Array(items) => Value::Array(items.iter().map(|s| render_slot(s, rng)).collect()),
    }
}

impl QueryTemplate {
    /// Compile a template, validating every placeholder
    pub fn compile(template: &Value) -> Result<Self, WorkloadError> {
        if !template.is_object() {
            return Err(WorkloadError::InvalidParameter(format!(
                "query template must be an object, got {template}"
            )));
        }
        Ok(Self {
            root: compile(template)?,
        })
    }

    /// Produce a concrete query document
    pub fn render<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        render_slot(&self.root, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    #[test]
    fn test_randint_range_is_offset_by_one() {
        let template = QueryTemplate::compile(&json!({ "group": "RANDINT(1,3)" })).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            seen.insert(template.render(&mut rng)["group"].as_i64().unwrap());
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_randintlist_is_distinct() {
        let template =
            QueryTemplate::compile(&json!({ "_id": { "$in": "RANDINTLIST(1,10,10)" } })).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let rendered = template.render(&mut rng);
        let mut values: Vec<i64> = rendered["_id"]["$in"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_literals_and_nesting_survive() {
        let template = QueryTemplate::compile(&json!({
            "name": "RANDINT",
            "tags": ["a", "RANDINT(5,5)"],
            "n": 3
        }))
        .unwrap();
        let rendered = template.render(&mut StdRng::seed_from_u64(0));
        assert_eq!(rendered, json!({ "name": "RANDINT", "tags": ["a", 4], "n": 3 }));
    }

    #[test]
    fn test_same_seed_same_queries() {
        let template = QueryTemplate::compile(&json!({ "g": "RANDINT(1,1000)" })).unwrap();
        let a: Vec<Value> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..5).map(|_| template.render(&mut rng)).collect()
        };
        let b: Vec<Value> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..5).map(|_| template.render(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_placeholders_rejected() {
        assert!(QueryTemplate::compile(&json!({ "a": "RANDINTLIST(1,3,4)" })).is_err());
        assert!(QueryTemplate::compile(&json!({ "a": "RANDINT(5,1)" })).is_err());
        assert!(QueryTemplate::compile(&json!({ "a": "RANDINT(1)" })).is_err());
        assert!(QueryTemplate::compile(&json!(["RANDINT(1,2)"])).is_err());
    }
}
