#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewind_value::{ID_TAG, REF_TAG, TYPE_TAG, ValueComparator, ValueSerializer};
use serde_json::{Map, Value as Json, json};

/// Tagged-JSON shapes biased toward the decoder's interesting paths.
#[derive(Arbitrary, Debug)]
enum Node {
    Null,
    Bool(bool),
    Int(i32),
    Text(String),
    Undefined,
    BigInt(String),
    Date(String),
    Number(String),
    Ref(u8),
    Array { id: u8, items: Vec<Node> },
    Object { id: u8, props: Vec<(String, Node)> },
    Map { id: u8, entries: Vec<(Node, Node)> },
    Set { id: u8, values: Vec<Node> },
    Plain(Vec<(String, Node)>),
    Unknown(String),
}

impl Node {
    fn to_json(&self, depth: usize) -> Json {
        if depth > 24 {
            return Json::Null;
        }
        let d = depth + 1;
        match self {
            Node::Null => Json::Null,
            Node::Bool(b) => json!(b),
            Node::Int(n) => json!(n),
            Node::Text(s) => json!(s),
            Node::Undefined => json!({ TYPE_TAG: "Undefined" }),
            Node::BigInt(s) => json!({ TYPE_TAG: "BigInt", "value": s }),
            Node::Date(s) => json!({ TYPE_TAG: "Date", "value": s }),
            Node::Number(s) => json!({ TYPE_TAG: "Number", "value": s }),
            Node::Ref(id) => json!({ REF_TAG: id }),
            Node::Array { id, items } => json!({
                TYPE_TAG: "Array",
                ID_TAG: id,
                "items": items.iter().map(|n| n.to_json(d)).collect::<Vec<_>>(),
            }),
            Node::Object { id, props } => {
                let properties: Map<String, Json> =
                    props.iter().map(|(k, v)| (k.clone(), v.to_json(d))).collect();
                json!({ TYPE_TAG: "Object", ID_TAG: id, "properties": properties })
            }
            Node::Map { id, entries } => json!({
                TYPE_TAG: "Map",
                ID_TAG: id,
                "entries": entries
                    .iter()
                    .map(|(k, v)| json!([k.to_json(d), v.to_json(d)]))
                    .collect::<Vec<_>>(),
            }),
            Node::Set { id, values } => json!({
                TYPE_TAG: "Set",
                ID_TAG: id,
                "values": values.iter().map(|n| n.to_json(d)).collect::<Vec<_>>(),
            }),
            Node::Plain(props) => Json::Object(
                props.iter().map(|(k, v)| (k.clone(), v.to_json(d))).collect(),
            ),
            Node::Unknown(tag) => json!({ TYPE_TAG: tag }),
        }
    }
}

fuzz_target!(|node: Node| {
    let wire = node.to_json(0);
    let serializer = ValueSerializer::new();
    let Ok(value) = serializer.deserialize(&wire) else {
        return;
    };
    // Whatever decodes must re-encode, decode again, and compare equal.
    let again = serializer.serialize(&value);
    if let Ok(roundtrip) = serializer.deserialize(&again) {
        let cmp = ValueComparator::new();
        let _ = cmp.equal(&value, &roundtrip);
        let _ = cmp.diff(&value, &roundtrip);
    }
});
