//! Call arguments: positional and keyword values, already in JSON form.
//!
//! Arguments are serialized when the call is built, on the caller's side, so
//! a value that cannot cross the worker boundary fails at the call site
//! instead of inside the receiving worker.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{EmitError, HandlerError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positional: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub keyword: Map<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single positional argument.
    pub fn one(value: impl Serialize) -> Result<Self, EmitError> {
        Self::new().arg(value)
    }

    pub fn arg(mut self, value: impl Serialize) -> Result<Self, EmitError> {
        self.positional
            .push(serde_json::to_value(value).map_err(EmitError::Serialize)?);
        Ok(self)
    }

    pub fn kwarg(mut self, name: &str, value: impl Serialize) -> Result<Self, EmitError> {
        self.keyword.insert(
            name.to_string(),
            serde_json::to_value(value).map_err(EmitError::Serialize)?,
        );
        Ok(self)
    }

    /// Put registration-time arguments in front of the call's own.
    pub fn prepend(&mut self, bound: &[Value]) {
        if !bound.is_empty() {
            self.positional.splice(0..0, bound.iter().cloned());
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Decode positional argument `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.positional.get(index).ok_or_else(|| HandlerError::Decode {
            position: index.to_string(),
            reason: "missing".into(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| HandlerError::Decode {
            position: index.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode keyword argument `name`, `None` when absent.
    pub fn kw<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HandlerError> {
        self.keyword
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| HandlerError::Decode {
                    position: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn builds_and_decodes() {
        let args = Args::new()
            .arg("INBOX")
            .unwrap()
            .arg(3u32)
            .unwrap()
            .kwarg("create", true)
            .unwrap();
        assert_eq!(args.get::<String>(0).unwrap(), "INBOX");
        assert_eq!(args.get::<u32>(1).unwrap(), 3);
        assert_eq!(args.kw::<bool>("create").unwrap(), Some(true));
        assert_eq!(args.kw::<bool>("absent").unwrap(), None);
    }

    #[test]
    fn bound_arguments_come_first() {
        let mut args = Args::one("call").unwrap();
        args.prepend(&[json!("bound")]);
        assert_eq!(args.positional, vec![json!("bound"), json!("call")]);
    }

    #[test]
    fn decode_failures_name_the_position() {
        let args = Args::one("text").unwrap();
        let err = args.get::<u32>(0).unwrap_err();
        assert!(matches!(err, HandlerError::Decode { ref position, .. } if position == "0"));
        let err = args.get::<u32>(4).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn unserializable_value_fails_at_build_time() {
        // JSON object keys must be strings.
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], 1u8);
        assert!(matches!(Args::one(map), Err(EmitError::Serialize(_))));
    }

    #[test]
    fn empty_parts_are_omitted_on_the_wire() {
        let text = serde_json::to_string(&Args::one(1).unwrap()).unwrap();
        assert_eq!(text, r#"{"positional":[1]}"#);
    }
}
