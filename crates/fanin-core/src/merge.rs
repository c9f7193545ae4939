//! Partial-result merging.

use serde_json::{Map, Value};

/// Mapping contributed by one source in one emission.
pub type PartialResult = Map<String, Value>;

/// Combination of every slot of a completed round.
pub type MergedResult = Map<String, Value>;

/// Shallow-merge partials in the order given; later entries win on key
/// conflicts.
///
/// Callers pass slots in source registration order, so the outcome never
/// depends on the order emissions arrived in.
pub fn merge_in_order<'a, I>(partials: I) -> MergedResult
where
    I: IntoIterator<Item = &'a PartialResult>,
{
    let mut merged = MergedResult::new();
    for partial in partials {
        for (key, value) in partial {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(value: Value) -> PartialResult {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn later_partials_overwrite_earlier_keys() {
        let a = partial(json!({"a": 1, "shared": "a"}));
        let b = partial(json!({"b": 2, "shared": "b"}));

        let merged = merge_in_order([&a, &b]);
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 2, "shared": "b"}));
    }

    #[test]
    fn merge_is_shallow() {
        let a = partial(json!({"nested": {"x": 1}}));
        let b = partial(json!({"nested": {"y": 2}}));

        let merged = merge_in_order([&a, &b]);
        assert_eq!(merged["nested"], json!({"y": 2}));
    }

    #[test]
    fn empty_input_yields_empty_merge() {
        assert!(merge_in_order(std::iter::empty()).is_empty());
    }
}
