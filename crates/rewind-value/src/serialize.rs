#![forbid(unsafe_code)]

//! Cycle-safe snapshot serialization.
//!
//! [`ValueSerializer`] turns any [`Value`] into a `serde_json::Value` that can
//! be stored and later decoded back into an equivalent graph.
//!
//! # Wire format
//!
//! | Category        | Encoding                                                   |
//! |-----------------|------------------------------------------------------------|
//! | null/bool/string| passed through                                             |
//! | finite number   | JSON number                                                |
//! | other number    | `{"__type":"Number","value":"NaN"}` (or `Infinity`, ...)   |
//! | undefined       | `{"__type":"Undefined"}`                                   |
//! | bigint          | `{"__type":"BigInt","value":"<decimal>"}`                  |
//! | date            | `{"__type":"Date","value":"<ISO-8601>"}`                   |
//! | regexp          | `{"__type":"RegExp","source":..,"flags":..}`               |
//! | error           | `{"__type":"Error","name":..,"message":..,"stack":..}`     |
//! | function        | `{"__type":"Function","name":..,"source":..}`              |
//! | array           | `{"__type":"Array","__id":n,"items":[..]}`                 |
//! | object          | `{"__type":"Object","__id":n,"properties":{..}}`           |
//! | map             | `{"__type":"Map","__id":n,"entries":[[k,v],..]}`           |
//! | set             | `{"__type":"Set","__id":n,"values":[..]}`                  |
//! | seen container  | `{"__ref":n}`                                              |
//! | too deep        | `{"__type":"MaxDepth"}`                                    |
//! | failed getter   | `{"__type":"SerializationError","message":..}`             |
//!
//! # Arena
//!
//! One serialization pass owns an arena: every container is assigned the next
//! index in a growable table before its children are visited. A container
//! met again is emitted as a reference to its index. Decoding mirrors this
//! with an index-addressed table, registering each container before decoding
//! its children, so back references resolve as soon as they are read.
//! References to indices defined later in the document are patched once the
//! pass completes.

use std::rc::Rc;

use ahash::AHashMap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json, json};
use thiserror::Error;
use tracing::debug;

use crate::value::{ArrayRef, ErrorValue, FunctionValue, MapRef, ObjectRef, RegExp, SetRef, Value};

pub const TYPE_TAG: &str = "__type";
pub const ID_TAG: &str = "__id";
pub const REF_TAG: &str = "__ref";

/// Default nesting bound for serialization.
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Largest integer magnitude emitted as a JSON integer.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Errors raised while decoding a serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown value tag `{0}`")]
    UnknownTag(String),

    #[error("malformed `{tag}` value: {reason}")]
    Malformed { tag: String, reason: String },

    #[error("unresolved reference to container {0}")]
    UnresolvedReference(u64),

    #[error("container id {0} defined twice")]
    DuplicateId(u64),
}

impl DecodeError {
    fn malformed(tag: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

/// Converts values to and from their storable representation.
#[derive(Debug, Clone, Copy)]
pub struct ValueSerializer {
    max_depth: usize,
}

impl Default for ValueSerializer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Per-pass index table.
#[derive(Default)]
struct Arena {
    index: AHashMap<usize, u64>,
    /// Holds every admitted container alive so addresses stay unique for the
    /// whole pass.
    table: Vec<Value>,
}

impl Arena {
    fn lookup(&self, addr: usize) -> Option<u64> {
        self.index.get(&addr).copied()
    }

    fn admit(&mut self, value: &Value, addr: usize) -> u64 {
        let id = self.table.len() as u64;
        self.table.push(value.clone());
        self.index.insert(addr, id);
        id
    }
}

fn tagged(tag: &str) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert(TYPE_TAG.to_string(), Json::from(tag));
    map
}

fn error_marker(message: impl Into<String>) -> Json {
    let mut map = tagged("SerializationError");
    map.insert("message".to_string(), Json::from(message.into()));
    Json::Object(map)
}

fn number_to_json(n: f64) -> Json {
    if n.is_nan() {
        return json!({ TYPE_TAG: "Number", "value": "NaN" });
    }
    if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        return json!({ TYPE_TAG: "Number", "value": text });
    }
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER && !(n == 0.0 && n.is_sign_negative()) {
        return Json::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
}

impl ValueSerializer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub const fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Encode a value. Never fails: values beyond the depth limit and
    /// failing getters are replaced inline by markers.
    #[must_use]
    pub fn serialize(&self, value: &Value) -> Json {
        let mut arena = Arena::default();
        self.encode(value, 0, &mut arena)
    }

    fn encode(&self, value: &Value, depth: usize, arena: &mut Arena) -> Json {
        if depth > self.max_depth {
            return json!({ TYPE_TAG: "MaxDepth" });
        }
        if let Some(addr) = value.container_addr() {
            if let Some(id) = arena.lookup(addr) {
                return json!({ REF_TAG: id });
            }
        }
        match value {
            Value::Undefined => Json::Object(tagged("Undefined")),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::BigInt(n) => json!({ TYPE_TAG: "BigInt", "value": n.to_string() }),
            Value::String(s) => Json::from(&**s),
            Value::Date(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(dt) => json!({
                    TYPE_TAG: "Date",
                    "value": dt.to_rfc3339_opts(SecondsFormat::Millis, true),
                }),
                None => error_marker(format!("date {ms} is out of range")),
            },
            Value::RegExp(r) => json!({
                TYPE_TAG: "RegExp",
                "source": r.source,
                "flags": r.flags,
            }),
            Value::Error(e) => json!({
                TYPE_TAG: "Error",
                "name": e.name,
                "message": e.message,
                "stack": e.stack,
            }),
            Value::Function(f) => json!({
                TYPE_TAG: "Function",
                "name": f.name,
                "source": f.source,
            }),
            Value::Accessor(acc) => match acc.resolve() {
                Ok(resolved) => self.encode(&resolved, depth, arena),
                Err(message) => {
                    debug!(%message, "getter failed during serialization");
                    error_marker(message)
                }
            },
            Value::Array(a) => {
                let id = arena.admit(value, a.addr());
                let items: Vec<Json> = a
                    .to_vec()
                    .iter()
                    .map(|item| self.encode(item, depth + 1, arena))
                    .collect();
                let mut map = tagged("Array");
                map.insert(ID_TAG.to_string(), Json::from(id));
                map.insert("items".to_string(), Json::Array(items));
                Json::Object(map)
            }
            Value::Object(o) => {
                let id = arena.admit(value, o.addr());
                let mut props = Map::new();
                for (key, child) in o.entries() {
                    props.insert(key, self.encode(&child, depth + 1, arena));
                }
                let mut map = tagged("Object");
                map.insert(ID_TAG.to_string(), Json::from(id));
                map.insert("properties".to_string(), Json::Object(props));
                Json::Object(map)
            }
            Value::Map(m) => {
                let id = arena.admit(value, m.addr());
                let entries: Vec<Json> = m
                    .entries()
                    .iter()
                    .map(|(k, v)| {
                        Json::Array(vec![
                            self.encode(k, depth + 1, arena),
                            self.encode(v, depth + 1, arena),
                        ])
                    })
                    .collect();
                let mut map = tagged("Map");
                map.insert(ID_TAG.to_string(), Json::from(id));
                map.insert("entries".to_string(), Json::Array(entries));
                Json::Object(map)
            }
            Value::Set(s) => {
                let id = arena.admit(value, s.addr());
                let values: Vec<Json> = s
                    .values()
                    .iter()
                    .map(|member| self.encode(member, depth + 1, arena))
                    .collect();
                let mut map = tagged("Set");
                map.insert(ID_TAG.to_string(), Json::from(id));
                map.insert("values".to_string(), Json::Array(values));
                Json::Object(map)
            }
        }
    }

    /// Decode a serialized value.
    ///
    /// # Errors
    ///
    /// Fails on unknown tags, malformed tagged objects, duplicate container
    /// ids and references that never resolve.
    pub fn deserialize(&self, data: &Json) -> Result<Value, DecodeError> {
        let mut decoder = Decoder::default();
        let root = match decoder.decode(data)? {
            Decoded::Ready(value) => value,
            Decoded::Pending(id) => decoder.resolve(id)?,
        };
        decoder.apply_fixups()?;
        Ok(root)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

enum Decoded {
    Ready(Value),
    /// Reference to a container not yet defined.
    Pending(u64),
}

enum Slot {
    Item(ArrayRef, usize),
    Property(ObjectRef, String),
}

#[derive(Default)]
struct Decoder {
    table: AHashMap<u64, Value>,
    fixups: Vec<(Slot, u64)>,
}

fn field<'a>(map: &'a Map<String, Json>, tag: &str, name: &str) -> Result<&'a Json, DecodeError> {
    map.get(name)
        .ok_or_else(|| DecodeError::malformed(tag, format!("missing `{name}`")))
}

fn str_field(map: &Map<String, Json>, tag: &str, name: &str) -> Result<String, DecodeError> {
    field(map, tag, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DecodeError::malformed(tag, format!("`{name}` is not a string")))
}

fn array_field<'a>(map: &'a Map<String, Json>, tag: &str, name: &str) -> Result<&'a Vec<Json>, DecodeError> {
    field(map, tag, name)?
        .as_array()
        .ok_or_else(|| DecodeError::malformed(tag, format!("`{name}` is not an array")))
}

impl Decoder {
    fn resolve(&self, id: u64) -> Result<Value, DecodeError> {
        self.table
            .get(&id)
            .cloned()
            .ok_or(DecodeError::UnresolvedReference(id))
    }

    fn register(&mut self, map: &Map<String, Json>, tag: &str, value: &Value) -> Result<(), DecodeError> {
        let Some(raw) = map.get(ID_TAG) else {
            return Ok(());
        };
        let id = raw
            .as_u64()
            .ok_or_else(|| DecodeError::malformed(tag, "`__id` is not an unsigned integer"))?;
        if self.table.insert(id, value.clone()).is_some() {
            return Err(DecodeError::DuplicateId(id));
        }
        Ok(())
    }

    /// Decode where a forward reference cannot be patched later.
    fn decode_now(&mut self, data: &Json) -> Result<Value, DecodeError> {
        match self.decode(data)? {
            Decoded::Ready(value) => Ok(value),
            Decoded::Pending(id) => Err(DecodeError::UnresolvedReference(id)),
        }
    }

    fn apply_fixups(&mut self) -> Result<(), DecodeError> {
        for (slot, id) in std::mem::take(&mut self.fixups) {
            let value = self.resolve(id)?;
            match slot {
                Slot::Item(array, index) => array.set(index, value),
                Slot::Property(object, key) => {
                    object.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn decode(&mut self, data: &Json) -> Result<Decoded, DecodeError> {
        let value = match data {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s.as_str()),
            Json::Array(items) => {
                let array = ArrayRef::default();
                self.fill_array(&array, items)?;
                Value::Array(array)
            }
            Json::Object(map) => {
                if let Some(raw) = map.get(REF_TAG) {
                    let id = raw
                        .as_u64()
                        .ok_or_else(|| DecodeError::malformed(REF_TAG, "id is not an unsigned integer"))?;
                    return Ok(match self.table.get(&id) {
                        Some(found) => Decoded::Ready(found.clone()),
                        None => Decoded::Pending(id),
                    });
                }
                match map.get(TYPE_TAG).and_then(Json::as_str) {
                    Some(tag) => self.decode_tagged(tag, map)?,
                    None => {
                        let object = ObjectRef::new();
                        self.fill_object(&object, map)?;
                        Value::Object(object)
                    }
                }
            }
        };
        Ok(Decoded::Ready(value))
    }

    fn fill_array(&mut self, array: &ArrayRef, items: &[Json]) -> Result<(), DecodeError> {
        for (index, item) in items.iter().enumerate() {
            match self.decode(item)? {
                Decoded::Ready(value) => array.push(value),
                Decoded::Pending(id) => {
                    array.push(Value::Undefined);
                    self.fixups.push((Slot::Item(array.clone(), index), id));
                }
            }
        }
        Ok(())
    }

    fn fill_object(&mut self, object: &ObjectRef, props: &Map<String, Json>) -> Result<(), DecodeError> {
        for (key, raw) in props {
            match self.decode(raw)? {
                Decoded::Ready(value) => {
                    object.insert(key.clone(), value);
                }
                Decoded::Pending(id) => {
                    object.insert(key.clone(), Value::Undefined);
                    self.fixups
                        .push((Slot::Property(object.clone(), key.clone()), id));
                }
            }
        }
        Ok(())
    }

    fn decode_tagged(&mut self, tag: &str, map: &Map<String, Json>) -> Result<Value, DecodeError> {
        let value = match tag {
            "Undefined" | "MaxDepth" => Value::Undefined,
            "Number" => {
                let text = str_field(map, tag, "value")?;
                match text.as_str() {
                    "NaN" => Value::Number(f64::NAN),
                    "Infinity" => Value::Number(f64::INFINITY),
                    "-Infinity" => Value::Number(f64::NEG_INFINITY),
                    other => Value::Number(
                        other
                            .parse()
                            .map_err(|_| DecodeError::malformed(tag, format!("bad number `{other}`")))?,
                    ),
                }
            }
            "BigInt" => {
                let text = str_field(map, tag, "value")?;
                Value::BigInt(
                    text.parse()
                        .map_err(|_| DecodeError::malformed(tag, format!("bad bigint `{text}`")))?,
                )
            }
            "Date" => {
                let text = str_field(map, tag, "value")?;
                let parsed = DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| DecodeError::malformed(tag, format!("bad date `{text}`: {e}")))?;
                Value::Date(parsed.timestamp_millis())
            }
            "RegExp" => Value::RegExp(Rc::new(RegExp {
                source: str_field(map, tag, "source")?,
                flags: str_field(map, tag, "flags")?,
            })),
            "Error" => Value::Error(Rc::new(ErrorValue {
                name: str_field(map, tag, "name")?,
                message: str_field(map, tag, "message")?,
                stack: map.get("stack").and_then(Json::as_str).map(str::to_string),
            })),
            "SerializationError" => Value::Error(Rc::new(ErrorValue {
                name: "SerializationError".to_string(),
                message: str_field(map, tag, "message")?,
                stack: None,
            })),
            "Function" => Value::Function(Rc::new(FunctionValue {
                name: str_field(map, tag, "name")?,
                source: str_field(map, tag, "source")?,
            })),
            "Array" => {
                let array = ArrayRef::default();
                let value = Value::Array(array.clone());
                self.register(map, tag, &value)?;
                self.fill_array(&array, array_field(map, tag, "items")?)?;
                value
            }
            "Object" => {
                let object = ObjectRef::new();
                let value = Value::Object(object.clone());
                self.register(map, tag, &value)?;
                let props = field(map, tag, "properties")?
                    .as_object()
                    .ok_or_else(|| DecodeError::malformed(tag, "`properties` is not an object"))?;
                self.fill_object(&object, props)?;
                value
            }
            "Map" => {
                let target = MapRef::default();
                let value = Value::Map(target.clone());
                self.register(map, tag, &value)?;
                for entry in array_field(map, tag, "entries")? {
                    let pair = entry
                        .as_array()
                        .filter(|pair| pair.len() == 2)
                        .ok_or_else(|| DecodeError::malformed(tag, "entry is not a [key, value] pair"))?;
                    let k = self.decode_now(&pair[0])?;
                    let v = self.decode_now(&pair[1])?;
                    target.insert(k, v);
                }
                value
            }
            "Set" => {
                let target = SetRef::default();
                let value = Value::Set(target.clone());
                self.register(map, tag, &value)?;
                for member in array_field(map, tag, "values")? {
                    let decoded = self.decode_now(member)?;
                    target.insert(decoded);
                }
                value
            }
            other => return Err(DecodeError::UnknownTag(other.to_string())),
        };
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
