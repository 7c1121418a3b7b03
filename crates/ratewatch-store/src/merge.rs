//! Structural deep merge for stored rate documents.

use serde_json::Value;

/// Overlay `patch` onto `base`: every field present in the patch overwrites
/// the same field in the base, recursing where both sides are objects; fields
/// absent from the patch are left untouched.
///
/// The merge happens entirely in memory; the store applies the result in a
/// single atomic write rather than leaning on an engine patch operator.
pub fn merge_patch(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (field, patch_value) in patch_map {
                match base_map.get_mut(field) {
                    Some(base_value) => merge_patch(base_value, patch_value),
                    None => {
                        base_map.insert(field.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
