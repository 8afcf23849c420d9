//! The merge rule shared by parallel dispatch and batch aggregation.

use crate::context::Payload;
use std::collections::BTreeMap;

/// Merges the payloads of successful parallel branches, in branch order.
///
/// - All maps: one map, later keys override earlier ones.
/// - All lists: one list, concatenated in order.
/// - Maps and lists mixed: one map, list items keyed by their running
///   position across every list, so later lists never overwrite earlier ones.
/// - Anything else: the ordered list of all payloads.
/// - No payloads: an empty map.
#[must_use]
pub fn merge_payloads(payloads: Vec<Payload>) -> Payload {
    if payloads.is_empty() {
        return Payload::map();
    }
    if !payloads.iter().all(Payload::is_collection) {
        return Payload::List(payloads);
    }
    if payloads.iter().all(|p| matches!(p, Payload::List(_))) {
        let items = payloads
            .into_iter()
            .flat_map(|p| match p {
                Payload::List(items) => items,
                _ => Vec::new(),
            })
            .collect();
        return Payload::List(items);
    }

    let mut merged = BTreeMap::new();
    let mut next_index = 0usize;
    for payload in payloads {
        match payload {
            Payload::Map(entries) => merged.extend(entries),
            Payload::List(items) => {
                for item in items {
                    merged.insert(next_index.to_string(), item);
                    next_index += 1;
                }
            }
            _ => {}
        }
    }
    Payload::Map(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn p(value: serde_json::Value) -> Payload {
        Payload::from(value)
    }

    #[test]
    fn test_later_map_wins_on_collision() {
        let merged = merge_payloads(vec![p(json!({"a": 1})), p(json!({"a": 2, "b": 3}))]);
        assert_eq!(merged, p(json!({"a": 2, "b": 3})));
    }

    #[test]
    fn test_lists_concatenate() {
        let merged = merge_payloads(vec![p(json!([1, 2])), p(json!([3]))]);
        assert_eq!(merged, p(json!([1, 2, 3])));
    }

    #[test]
    fn test_mixed_collections_key_list_items_by_index() {
        let merged = merge_payloads(vec![p(json!(["x"])), p(json!({"k": true}))]);
        assert_eq!(merged, p(json!({"0": "x", "k": true})));
    }

    #[test]
    fn test_mixed_collections_number_items_across_lists() {
        let merged = merge_payloads(vec![p(json!(["x"])), p(json!({"k": 1})), p(json!(["y", "z"]))]);
        assert_eq!(merged, p(json!({"0": "x", "k": 1, "1": "y", "2": "z"})));
        assert_eq!(merged.as_map().map(BTreeMap::len), Some(4));
    }

    #[test]
    fn test_scalars_are_collected_in_order() {
        let merged = merge_payloads(vec![p(json!("a")), p(json!({"b": 1})), p(json!(3))]);
        assert_eq!(merged, p(json!(["a", {"b": 1}, 3])));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(merge_payloads(Vec::new()), Payload::map());
    }
}
