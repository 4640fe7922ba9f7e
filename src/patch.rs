//! Structural diff and patch application over serialized store snapshots.
//!
//! A patch is a path-addressed edit (`add` | `replace` | `remove`). [`diff`] compares two snapshots
//! and returns the forward patches (before → after) together with the inverse patches
//! (after → before). The diff is deterministic: object keys are visited in sorted order and array
//! edits are emitted so that every index is valid at the moment the patch is applied.
//!
//! Arrays are compared positionally: the shared prefix is diffed element by element, extra
//! trailing elements become `add`s, and missing trailing elements become `remove`s from the back.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One step of a patch path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => f.write_str(k),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    fn add(path: Vec<PathSegment>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path,
            value: Some(value),
        }
    }

    fn replace(path: Vec<PathSegment>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path,
            value: Some(value),
        }
    }

    fn remove(path: Vec<PathSegment>) -> Self {
        Self {
            op: PatchOp::Remove,
            path,
            value: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PatchError {
    #[error("patch path /{path} does not resolve")]
    InvalidPath { path: String },
    #[error("index {index} is out of bounds at /{path}")]
    IndexOutOfBounds { path: String, index: usize },
    #[error("{op:?} patch at /{path} carries no value")]
    MissingValue { op: PatchOp, path: String },
    #[error("cannot replace the root with a remove patch")]
    RemoveRoot,
}

fn render(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// Computes `(patches, inverse_patches)` between two snapshots.
pub fn diff(before: &Value, after: &Value) -> (Vec<Patch>, Vec<Patch>) {
    diff_at(&[], Some(before), Some(after))
}

/// Like [`diff`], but for the subtree at `prefix`, where either side may be absent (the entity did
/// not exist before, or no longer exists after).
pub fn diff_at(
    prefix: &[PathSegment],
    before: Option<&Value>,
    after: Option<&Value>,
) -> (Vec<Patch>, Vec<Patch>) {
    let mut forward = Vec::new();
    let mut inverse = Vec::new();
    let mut path = prefix.to_vec();
    match (before, after) {
        (None, None) => {}
        (None, Some(after)) => {
            forward.push(Patch::add(path.clone(), after.clone()));
            inverse.push(Patch::remove(path));
        }
        (Some(before), None) => {
            forward.push(Patch::remove(path.clone()));
            inverse.push(Patch::add(path, before.clone()));
        }
        (Some(before), Some(after)) => {
            diff_into(before, after, &mut path, &mut forward);
            diff_into(after, before, &mut path, &mut inverse);
        }
    }
    (forward, inverse)
}

fn diff_into(before: &Value, after: &Value, path: &mut Vec<PathSegment>, out: &mut Vec<Patch>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, value) in b {
                path.push(PathSegment::Key(key.clone()));
                match a.get(key) {
                    Some(next) => diff_into(value, next, path, out),
                    None => out.push(Patch::remove(path.clone())),
                }
                path.pop();
            }
            for (key, value) in a {
                if !b.contains_key(key) {
                    path.push(PathSegment::Key(key.clone()));
                    out.push(Patch::add(path.clone(), value.clone()));
                    path.pop();
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            let shared = b.len().min(a.len());
            for i in 0..shared {
                path.push(PathSegment::Index(i));
                diff_into(&b[i], &a[i], path, out);
                path.pop();
            }
            for (i, value) in a.iter().enumerate().skip(shared) {
                path.push(PathSegment::Index(i));
                out.push(Patch::add(path.clone(), value.clone()));
                path.pop();
            }
            for i in (shared..b.len()).rev() {
                path.push(PathSegment::Index(i));
                out.push(Patch::remove(path.clone()));
                path.pop();
            }
        }
        _ => out.push(Patch::replace(path.clone(), after.clone())),
    }
}

/// Applies `patches` in order. On error `target` may be partially patched; callers that need
/// atomicity patch a copy.
pub fn apply_patches(target: &mut Value, patches: &[Patch]) -> Result<(), PatchError> {
    for patch in patches {
        apply_patch(target, patch)?;
    }
    Ok(())
}

fn apply_patch(target: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    let Some((last, parents)) = patch.path.split_last() else {
        return match (&patch.op, &patch.value) {
            (PatchOp::Remove, _) => Err(PatchError::RemoveRoot),
            (_, Some(value)) => {
                *target = value.clone();
                Ok(())
            }
            (op, None) => Err(PatchError::MissingValue {
                op: *op,
                path: String::new(),
            }),
        };
    };

    let mut parent = target;
    for (depth, segment) in parents.iter().enumerate() {
        let next = match (parent, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i),
            _ => None,
        };
        parent = next.ok_or_else(|| PatchError::InvalidPath {
            path: render(&patch.path[..=depth]),
        })?;
    }

    let value = || {
        patch.value.clone().ok_or_else(|| PatchError::MissingValue {
            op: patch.op,
            path: render(&patch.path),
        })
    };

    match (parent, last) {
        (Value::Object(map), PathSegment::Key(key)) => match patch.op {
            PatchOp::Add | PatchOp::Replace => {
                map.insert(key.clone(), value()?);
            }
            PatchOp::Remove => {
                map.remove(key).ok_or_else(|| PatchError::InvalidPath {
                    path: render(&patch.path),
                })?;
            }
        },
        (Value::Array(items), PathSegment::Index(index)) => {
            let index = *index;
            let out_of_bounds = || PatchError::IndexOutOfBounds {
                path: render(parents),
                index,
            };
            match patch.op {
                PatchOp::Add if index <= items.len() => items.insert(index, value()?),
                PatchOp::Replace if index < items.len() => items[index] = value()?,
                PatchOp::Remove if index < items.len() => {
                    items.remove(index);
                }
                _ => return Err(out_of_bounds()),
            }
        }
        _ => {
            return Err(PatchError::InvalidPath {
                path: render(&patch.path),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn roundtrip(before: Value, after: Value) -> (Vec<Patch>, Vec<Patch>) {
        let (forward, inverse) = diff(&before, &after);

        let mut forwarded = before.clone();
        apply_patches(&mut forwarded, &forward).expect("forward patches apply");
        assert_eq!(forwarded, after);

        let mut reverted = after;
        apply_patches(&mut reverted, &inverse).expect("inverse patches apply");
        assert_eq!(reverted, before);

        (forward, inverse)
    }

    #[test]
    fn equal_values_produce_no_patches() {
        let value = json!({"a": [1, 2, {"b": true}]});
        let (forward, inverse) = diff(&value, &value);
        assert!(forward.is_empty());
        assert!(inverse.is_empty());
    }

    #[test]
    fn key_set_differences_collapse_to_minimal_edits() {
        let (forward, inverse) = roundtrip(
            json!({"keep": 1, "gone": 2, "change": "x"}),
            json!({"keep": 1, "change": "y", "new": [1]}),
        );
        assert_eq!(
            forward,
            vec![
                Patch::replace(vec!["change".into()], json!("y")),
                Patch::remove(vec!["gone".into()]),
                Patch::add(vec!["new".into()], json!([1])),
            ]
        );
        assert_eq!(
            inverse,
            vec![
                Patch::replace(vec!["change".into()], json!("x")),
                Patch::remove(vec!["new".into()]),
                Patch::add(vec!["gone".into()], json!(2)),
            ]
        );
    }

    #[test]
    fn arrays_grow_and_shrink_from_the_back() {
        let (forward, inverse) = roundtrip(json!([1, 2, 3, 4]), json!([1, 9]));
        assert_eq!(
            forward,
            vec![
                Patch::replace(vec![PathSegment::Index(1)], json!(9)),
                Patch::remove(vec![PathSegment::Index(3)]),
                Patch::remove(vec![PathSegment::Index(2)]),
            ]
        );
        assert_eq!(
            inverse,
            vec![
                Patch::replace(vec![PathSegment::Index(1)], json!(2)),
                Patch::add(vec![PathSegment::Index(2)], json!(3)),
                Patch::add(vec![PathSegment::Index(3)], json!(4)),
            ]
        );
    }

    #[test]
    fn nested_structures_round_trip() {
        roundtrip(
            json!({"events": {"E1": {"hyps": [{"sds": ["SD1"]}], "rejected": false}}}),
            json!({"events": {"E1": {"hyps": [{"sds": ["SD1", "SD2"]}], "rejected": true}, "E2": {}}}),
        );
    }

    #[test]
    fn kind_changes_replace_the_whole_node() {
        let (forward, _) = roundtrip(json!({"a": [1]}), json!({"a": {"x": 1}}));
        assert_eq!(forward, vec![Patch::replace(vec!["a".into()], json!({"x": 1}))]);
    }

    #[test]
    fn diff_at_handles_created_and_removed_subtrees() {
        let prefix: Vec<PathSegment> = vec!["data".into(), "events".into(), "E1".into()];
        let entity = json!({"id": "E1"});

        let (forward, inverse) = diff_at(&prefix, None, Some(&entity));
        let mut store = json!({"data": {"events": {}}});
        apply_patches(&mut store, &forward).expect("add applies");
        assert_eq!(store, json!({"data": {"events": {"E1": {"id": "E1"}}}}));
        apply_patches(&mut store, &inverse).expect("remove applies");
        assert_eq!(store, json!({"data": {"events": {}}}));

        let (forward, _) = diff_at(&prefix, Some(&entity), None);
        assert_eq!(forward, vec![Patch::remove(prefix)]);
    }

    #[test]
    fn invalid_paths_are_reported() {
        let mut value = json!({"a": [1]});
        let err = apply_patches(&mut value, &[Patch::replace(vec!["b".into(), "c".into()], json!(1))])
            .unwrap_err();
        assert_eq!(err, PatchError::InvalidPath { path: "b".to_string() });

        let err = apply_patches(&mut value, &[Patch::remove(vec!["a".into(), PathSegment::Index(4)])]).unwrap_err();
        assert_eq!(
            err,
            PatchError::IndexOutOfBounds {
                path: "a".to_string(),
                index: 4
            }
        );
    }
}
