#![no_main]

use libfuzzer_sys::fuzz_target;
use rewind_history::{Snapshot, StateRestorer};
use rewind_runtime::{Atom, Store};
use rewind_value::ValueSerializer;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Raw wire values.
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
        let serializer = ValueSerializer::new();
        if let Ok(value) = serializer.deserialize(&json) {
            let _ = serializer.serialize(&value);
        }
    }

    // Whole snapshots restored into a store with a couple of live atoms.
    if let Ok(snapshot) = Snapshot::from_json(text) {
        let store = Store::new();
        let a = Atom::primitive(0);
        let b = a.clone();
        let derived = Atom::computed(move |get| get.get(&b));
        let _ = store.get(&derived);
        let restorer = StateRestorer::new(store.clone());
        let _ = restorer.restore_transactional(&snapshot);
        let _ = restorer.restore_from_snapshot(&snapshot);
        let _ = store.get(&derived);
        let _ = store.get(&a);
    }
});
