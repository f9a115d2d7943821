//! Value representation for cross-block message transfer (§1, §3 Message)
//!
//! Value representation and copy-on-write semantics are treated as a
//! collaborator boundary, requiring only a deep-copy operation, a
//! reference-count contract, and a small closed set of tagged variants. This
//! module gives the minimum concrete instantiation the VM contract (§H)
//! needs to run end to end.

use std::collections::HashMap;

use crate::types::Pid;

/// A value on the VM stack, in a block's globals, or inside a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Pid(Pid),
    List(Vec<Value>),
    /// A small closed map, used for the delivered message formats of §6
    /// (`{type, value, pid, code, reason}`).
    Map(Vec<(String, Value)>),
    Null,
}

impl Value {
    /// Deep-copy this value so that sender and target heaps share nothing
    /// after a send (§4.3 Send API, §9 Reference-counted values).
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Int(i) => Value::Int(*i),
            Value::Bool(b) => Value::Bool(*b),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Pid(p) => Value::Pid(*p),
            Value::List(items) => Value::List(items.iter().map(Value::deep_copy).collect()),
            Value::Map(entries) => {
                Value::Map(entries.iter().map(|(k, v)| (k.clone(), v.deep_copy())).collect())
            }
            Value::Null => Value::Null,
        }
    }

    /// Estimated byte size for mailbox byte accounting (§4.2 step 1).
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Int(_) | Value::Bool(_) | Value::Null => 8,
            Value::Pid(_) => 8,
            Value::Str(s) => 16 + s.len(),
            Value::List(items) => 16 + items.iter().map(Value::estimated_size).sum::<usize>(),
            Value::Map(entries) => {
                16 + entries.iter().map(|(k, v)| k.len() + v.estimated_size()).sum::<usize>()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Builds the normal-message map delivered to a receiver's VM stack (§6).
/// Carries the sender's pid under `pid` alongside `exit`/`down` so bytecode
/// can address a reply without a separate out-of-band channel.
pub fn normal_message(sender: Pid, value: Value) -> Value {
    Value::Map(vec![
        ("type".into(), Value::Str("message".into())),
        ("pid".into(), Value::Pid(sender)),
        ("value".into(), value),
    ])
}

/// Builds the `exit` notification map delivered to a `TRAP_EXIT` block (§4.5).
pub fn exit_message(pid: Pid, code: i32, reason: Option<&str>) -> Value {
    let mut entries = vec![
        ("type".into(), Value::Str("exit".into())),
        ("pid".into(), Value::Pid(pid)),
        ("code".into(), Value::Int(code as i64)),
    ];
    if let Some(r) = reason {
        entries.push(("reason".into(), Value::Str(r.to_string())));
    }
    Value::Map(entries)
}

/// Builds the `down` notification map delivered to a monitor (§4.5).
pub fn down_message(pid: Pid, code: i32, reason: Option<&str>) -> Value {
    let mut entries = vec![
        ("type".into(), Value::Str("down".into())),
        ("pid".into(), Value::Pid(pid)),
        ("code".into(), Value::Int(code as i64)),
    ];
    entries.push(("reason".into(), Value::Str(reason.unwrap_or("normal").to_string())));
    Value::Map(entries)
}

/// Lossy projection used only for checkpoint globals snapshots, where the
/// wire format wants an opaque byte blob rather than a typed value.
pub fn to_json_bytes(value: &Value) -> Vec<u8> {
    fn to_json(value: &Value) -> serde_json::Value {
        match value {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Str(s) => serde_json::Value::from(s.clone()),
            Value::Pid(p) => serde_json::Value::from(p.raw()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
            Value::Map(entries) => {
                let map: HashMap<String, serde_json::Value> =
                    entries.iter().map(|(k, v)| (k.clone(), to_json(v))).collect();
                serde_json::Value::Object(map.into_iter().collect())
            }
            Value::Null => serde_json::Value::Null,
        }
    }
    serde_json::to_vec(&to_json(value)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_copy_produces_independent_heap() {
        let original = Value::List(vec![Value::Str("hello".into()), Value::Int(1)]);
        let copy = original.deep_copy();
        assert_eq!(original, copy);

        if let Value::List(items) = &copy {
            assert_ne!(
                items[0].as_str().unwrap().as_ptr(),
                match &original {
                    Value::List(o) => o[0].as_str().unwrap().as_ptr(),
                    _ => unreachable!(),
                }
            );
        }
    }

    #[test]
    fn message_builders_have_expected_shape() {
        let pid = Pid(7);
        let msg = exit_message(pid, 1, Some("boom"));
        assert_eq!(msg.get("type").unwrap().as_str(), Some("exit"));
        assert_eq!(msg.get("pid").unwrap(), &Value::Pid(pid));
        assert_eq!(msg.get("reason").unwrap().as_str(), Some("boom"));

        let down = down_message(pid, 0, None);
        assert_eq!(down.get("reason").unwrap().as_str(), Some("normal"));
    }
}
