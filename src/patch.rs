use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single RFC 6902 JSON-Patch operation, restricted to the subset this service
/// ever emits (`add`/`replace`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}

/// Escapes a JSON-Pointer (RFC 6901) path segment. Order matters: `~` must be
/// escaped to `~0` before `/` is escaped to `~1`, otherwise a `/` in the key would
/// turn into `~01` instead of `~1`.
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Builds the JSON-Pointer path for a map key under a parent path.
pub fn key_path(parent: &str, key: &str) -> String {
    format!("{parent}/{}", escape_pointer_segment(key))
}

/// Tracks, per array path, whether the array-first operation has already been
/// emitted. A single template-list injection may span several templates that
/// all write into the same array (e.g. `/spec/containers`); the array-first rule
/// applies once to the whole run, not once per template, so this
/// state must be threaded across every template that touches the same path.
#[derive(Debug, Default)]
pub struct ArrayCursor {
    started: bool,
}

impl ArrayCursor {
    /// `existing_len` is the length of the sequence already present on the pod
    /// at this path before any patch is applied.
    pub fn new(existing_len: usize) -> Self {
        Self {
            started: existing_len > 0,
        }
    }

    /// Emits the array-append patches for `new_items`, advancing the cursor.
    pub fn append<T: Serialize>(&mut self, path: &str, new_items: &[T]) -> Vec<PatchOperation> {
        let mut ops = Vec::with_capacity(new_items.len());
        for item in new_items {
            if self.started {
                ops.push(PatchOperation {
                    op: "add",
                    path: format!("{path}/-"),
                    value: serde_json::to_value(item).unwrap_or(Value::Null),
                });
            } else {
                self.started = true;
                ops.push(PatchOperation {
                    op: "add",
                    path: path.to_string(),
                    value: serde_json::json!([item]),
                });
            }
        }
        ops
    }
}

/// The array-append primitive, for a single call site with
/// no further writes to the same path. See [`ArrayCursor`] for the multi-template
/// case where several callers share one path.
pub fn array_append_patches<T: Serialize>(
    path: &str,
    existing_len: usize,
    new_items: &[T],
) -> Vec<PatchOperation> {
    ArrayCursor::new(existing_len).append(path, new_items)
}

/// The object-merge primitive.
///
/// `existing` is `None` when the pod has no map at `path` at all (absent parent);
/// in that case a single `add` at `path` with the whole new map is emitted and no
/// other operations follow, regardless of how many keys `new_map` holds.
///
/// When `existing` is `Some(_)`, each key in `new_map` is either skipped (present,
/// `override_existing == false`), replaced (present, `override_existing == true`),
/// or added (absent from `existing`).
pub fn object_merge_patches(
    path: &str,
    existing: Option<&BTreeMap<String, String>>,
    new_map: &BTreeMap<String, String>,
    override_existing: bool,
) -> Vec<PatchOperation> {
    ObjectCursor::new(existing.cloned()).merge(path, new_map, override_existing)
}

/// Tracks, per map path (`/metadata/annotations`, `/metadata/labels`), the
/// effective key set seen so far. Mirrors [`ArrayCursor`]: several templates may
/// merge into the same map in one request, and once the first template creates
/// an absent parent, later templates must treat its keys as now-existing rather
/// than re-emitting a clobbering `add` at the parent path, which would
/// silently discard the first template's keys.
#[derive(Debug, Default)]
pub struct ObjectCursor {
    current: Option<BTreeMap<String, String>>,
}

impl ObjectCursor {
    pub fn new(existing: Option<BTreeMap<String, String>>) -> Self {
        Self { current: existing }
    }

    pub fn merge(
        &mut self,
        path: &str,
        new_map: &BTreeMap<String, String>,
        override_existing: bool,
    ) -> Vec<PatchOperation> {
        if new_map.is_empty() {
            return Vec::new();
        }

        let Some(current) = &mut self.current else {
            self.current = Some(new_map.clone());
            return vec![PatchOperation {
                op: "add",
                path: path.to_string(),
                value: serde_json::to_value(new_map).unwrap_or(Value::Null),
            }];
        };

        let mut ops = Vec::with_capacity(new_map.len());
        for (k, v) in new_map {
            match current.get(k) {
                None => {
                    ops.push(PatchOperation {
                        op: "add",
                        path: key_path(path, k),
                        value: Value::String(v.clone()),
                    });
                    current.insert(k.clone(), v.clone());
                }
                Some(_) if override_existing => {
                    ops.push(PatchOperation {
                        op: "replace",
                        path: key_path(path, k),
                        value: Value::String(v.clone()),
                    });
                    current.insert(k.clone(), v.clone());
                }
                Some(_) => {}
            }
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_order_is_tilde_then_slash() {
        assert_eq!(escape_pointer_segment("a/b"), "a~1b");
        assert_eq!(escape_pointer_segment("a~b"), "a~0b");
        assert_eq!(escape_pointer_segment("a~/b"), "a~0~1b");
    }

    #[test]
    fn array_append_empty_existing_wraps_first_item() {
        let ops = array_append_patches("/spec/containers", 0, &["c1", "c2"]);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, "/spec/containers");
        assert_eq!(ops[0].value, serde_json::json!(["c1"]));
        assert_eq!(ops[1].op, "add");
        assert_eq!(ops[1].path, "/spec/containers/-");
        assert_eq!(ops[1].value, serde_json::json!("c2"));
    }

    #[test]
    fn array_cursor_wraps_once_across_multiple_calls() {
        let mut cursor = ArrayCursor::new(0);
        let first = cursor.append("/spec/containers", &["c1"]);
        let second = cursor.append("/spec/containers", &["c2"]);
        assert_eq!(first[0].path, "/spec/containers");
        assert_eq!(first[0].value, serde_json::json!(["c1"]));
        assert_eq!(second[0].path, "/spec/containers/-");
        assert_eq!(second[0].value, serde_json::json!("c2"));
    }

    #[test]
    fn array_append_nonempty_existing_always_appends() {
        let ops = array_append_patches("/spec/containers", 3, &["c1"]);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path, "/spec/containers/-");
    }

    #[test]
    fn object_merge_absent_parent_emits_single_add() {
        let mut new_map = BTreeMap::new();
        new_map.insert("my".to_string(), "label".to_string());
        let ops = object_merge_patches("/metadata/labels", None, &new_map, false);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, "/metadata/labels");
        assert_eq!(ops[0].value, serde_json::json!({"my": "label"}));
    }

    #[test]
    fn object_merge_present_parent_no_override_skips_existing_keys() {
        let mut existing = BTreeMap::new();
        existing.insert("a".to_string(), "1".to_string());
        let mut new_map = BTreeMap::new();
        new_map.insert("a".to_string(), "2".to_string());
        new_map.insert("b".to_string(), "3".to_string());
        let ops = object_merge_patches("/metadata/annotations", Some(&existing), &new_map, false);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, "/metadata/annotations/b");
    }

    #[test]
    fn object_cursor_second_template_sees_first_templates_keys_as_existing() {
        let mut cursor = ObjectCursor::new(None);
        let mut first_map = BTreeMap::new();
        first_map.insert("a".to_string(), "1".to_string());
        let first = cursor.merge("/metadata/annotations", &first_map, false);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].op, "add");
        assert_eq!(first[0].path, "/metadata/annotations");

        let mut second_map = BTreeMap::new();
        second_map.insert("a".to_string(), "2".to_string());
        second_map.insert("b".to_string(), "3".to_string());
        let second = cursor.merge("/metadata/annotations", &second_map, false);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].op, "add");
        assert_eq!(second[0].path, "/metadata/annotations/b");
    }

    #[test]
    fn object_merge_present_parent_override_replaces_existing_keys() {
        let mut existing = BTreeMap::new();
        existing.insert("a".to_string(), "1".to_string());
        let mut new_map = BTreeMap::new();
        new_map.insert("a".to_string(), "2".to_string());
        new_map.insert("b".to_string(), "3".to_string());
        let ops = object_merge_patches("/metadata/annotations", Some(&existing), &new_map, true);
        assert_eq!(ops.len(), 2);
        let replace = ops.iter().find(|o| o.path.ends_with("/a")).unwrap();
        assert_eq!(replace.op, "replace");
        let add = ops.iter().find(|o| o.path.ends_with("/b")).unwrap();
        assert_eq!(add.op, "add");
    }
}
