#![forbid(unsafe_code)]

use rewind::prelude::*;

#[test]
fn prelude_covers_a_counter_with_history() {
    let store = enhance_store(Store::new(), EnhancerOptions::default()).unwrap();
    let count = Atom::primitive(0).with_name("count");
    let c = count.clone();
    let label = Atom::computed(move |get| {
        let n = get.get(&c)?.as_f64().unwrap_or_default();
        Ok(Value::from(format!("count is {n}")))
    });

    store.set(&count, 1).unwrap();
    store.set(&count, 2).unwrap();
    assert_eq!(store.get(&label).unwrap(), Value::from("count is 2"));

    assert!(store.undo());
    assert_eq!(store.get(&label).unwrap(), Value::from("count is 1"));
    assert!(matches!(
        store.set(&label, "nope"),
        Err(StoreError::ComputedAtomWrite { .. })
    ));
}
