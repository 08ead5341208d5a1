use serde_json::Value;

/// Deep-merges `overlay` onto `base`: objects merge key-by-key recursively,
/// anything else (scalars, arrays) is replaced wholesale by the overlay's
/// value. Unknown keys in `overlay` are preserved, not dropped, matching the
/// "unknown middleware config keys are a warning, not a failure" rule —
/// validation of the merged value is the middleware's job, not the merge's.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                match merged.get(key) {
                    Some(base_value) => {
                        merged.insert(key.clone(), deep_merge(base_value, overlay_value));
                    }
                    None => {
                        merged.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let overlay = json!({"nested": {"y": 20, "z": 3}});
        assert_eq!(
            deep_merge(&base, &overlay),
            json!({"a": 1, "nested": {"x": 1, "y": 20, "z": 3}})
        );
    }

    #[test]
    fn scalars_and_arrays_are_replaced_not_merged() {
        let base = json!({"tags": ["a", "b"], "n": 1});
        let overlay = json!({"tags": ["c"], "n": 2});
        assert_eq!(deep_merge(&base, &overlay), json!({"tags": ["c"], "n": 2}));
    }

    #[test]
    fn overlay_alone_wins_when_base_is_missing() {
        let base = json!({});
        let overlay = json!({"max_requests": 120});
        assert_eq!(deep_merge(&base, &overlay), json!({"max_requests": 120}));
    }
}
