use serde_json::{Map, Value};

/// Deep-merge `incoming` into `base`, returning the merged tree.
///
/// - A null `base` yields `incoming`; a null `incoming` replaces whatever `base` held.
/// - A key missing from one map passes the other side's value through.
/// - Two maps merge key by key; keys present on both sides are merged recursively.
/// - Two sequences are concatenated, `base` first, so page order is preserved.
/// - Anything else (two scalars, or mismatched kinds) resolves to `incoming`.
///
/// Numbers are never combined here; rate-limit counters get their own post-merge
/// step in [`crate::policy::merge_page`].
#[must_use]
pub fn merge(base: Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Null, incoming) => incoming,
        (Value::Object(mut base), Value::Object(incoming)) => {
            merge_maps(&mut base, incoming);
            Value::Object(base)
        }
        (Value::Array(mut base), Value::Array(incoming)) => {
            base.extend(incoming);
            Value::Array(base)
        }
        (_, incoming) => incoming,
    }
}

/// Merge `incoming` into `base` in place.
pub fn merge_into(base: &mut Value, incoming: Value) {
    let current = core::mem::take(base);
    *base = merge(current, incoming);
}

fn merge_maps(base: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match base.get_mut(&key) {
            Some(existing) => merge_into(existing, value),
            None => {
                let _ = base.insert(key, value);
            }
        }
    }
}

/// Shallow union of a task result into a channel accumulator.
///
/// Channel outputs are expected to use disjoint top-level keys, so a collision
/// simply replaces the earlier value. Returns the keys that were overwritten.
pub fn union_top_level(acc: &mut Map<String, Value>, fragment: Map<String, Value>) -> Vec<String> {
    let mut replaced = Vec::new();
    for (key, value) in fragment {
        if acc.insert(key.clone(), value).is_some() {
            replaced.push(key);
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_base_yields_incoming() {
        assert_eq!(merge(Value::Null, json!({"a": 1})), json!({"a": 1}));
        assert_eq!(merge(Value::Null, Value::Null), Value::Null);
    }

    #[test]
    fn maps_merge_recursively() {
        let base = json!({"repository": {"name": "x", "issues": {"totalCount": 3}}});
        let page = json!({"repository": {"issues": {"totalCount": 4}, "stargazerCount": 9}});

        assert_eq!(
            merge(base, page),
            json!({"repository": {"name": "x", "issues": {"totalCount": 4}, "stargazerCount": 9}})
        );
    }

    #[test]
    fn sequences_append_in_order() {
        assert_eq!(merge(json!({"edges": [1, 2]}), json!({"edges": [3]})), json!({"edges": [1, 2, 3]}));
    }

    #[test]
    fn scalars_take_newest_value() {
        assert_eq!(merge(json!({"cost": 1}), json!({"cost": 2})), json!({"cost": 2}));
        assert_eq!(merge(json!("a"), json!("b")), json!("b"));
    }

    #[test]
    fn mismatched_kinds_take_incoming() {
        assert_eq!(merge(json!({"x": {"a": 1}}), json!({"x": [1]})), json!({"x": [1]}));
        assert_eq!(merge(json!({"x": [1]}), json!({"x": 5})), json!({"x": 5}));
        assert_eq!(merge(json!({"x": 5}), json!({"x": {"a": 1}})), json!({"x": {"a": 1}}));
    }

    #[test]
    fn null_incoming_overwrites() {
        assert_eq!(merge(json!({"x": {"a": 1}}), json!({"x": null})), json!({"x": null}));
        assert_eq!(merge(json!({"x": [1, 2]}), json!({"x": null})), json!({"x": null}));
        assert_eq!(merge(json!({"a": 1}), Value::Null), Value::Null);
    }

    #[test]
    fn missing_key_keeps_other_side() {
        assert_eq!(merge(json!({"x": {"a": 1}, "y": 2}), json!({"y": 3})), json!({"x": {"a": 1}, "y": 3}));
        assert_eq!(merge(json!({"y": 2}), json!({"x": null})), json!({"x": null, "y": 2}));
    }

    #[test]
    fn merge_is_associative() {
        let a = json!({"r": {"edges": [1], "n": 1, "m": {"k": "a"}}, "only_a": true});
        let b = json!({"r": {"edges": [2, 3], "n": 2}, "list": ["b"]});
        let c = json!({"r": {"edges": [4], "m": {"k": "c", "z": null}}, "list": ["c"], "n": [1]});

        let left = merge(merge(a.clone(), b.clone()), c.clone());
        let right = merge(a, merge(b, c));
        assert_eq!(left, right);
    }

    #[test]
    fn disjoint_channel_outputs_commute() {
        let graph = json!({"repository": {"name": "x"}});
        let rest = json!({"contributors": {"users": []}});
        let scrape = json!({"dependents": 12});

        let one = merge(merge(graph.clone(), rest.clone()), scrape.clone());
        let two = merge(merge(scrape, graph), rest);
        assert_eq!(one, two);
    }

    #[test]
    fn union_reports_replaced_keys() {
        let mut acc = Map::new();
        let _ = acc.insert("a".into(), json!(1));

        let replaced = union_top_level(&mut acc, json!({"a": 2, "b": 3}).as_object().cloned().unwrap());

        assert_eq!(replaced, vec!["a".to_string()]);
        assert_eq!(Value::Object(acc), json!({"a": 2, "b": 3}));
    }
}
