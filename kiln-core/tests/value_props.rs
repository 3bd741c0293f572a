//! Equality and hashing agree across collection representations

use kiln_core::{ArrayMap, Value};
use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn hash_of(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Integer),
        "[a-z]{1,4}".prop_map(Value::keyword),
        "[a-z]{0,4}".prop_map(Value::string),
    ]
}

proptest! {
    #[test]
    fn map_representations_are_interchangeable(
        pairs in prop::collection::vec((arb_scalar(), arb_scalar()), 0..12)
    ) {
        let linear = Value::ArrayMap(ArrayMap::from_pairs(pairs.clone()));
        let hashed = Value::HashMap(pairs.into_iter().collect());
        prop_assert_eq!(&linear, &hashed);
        prop_assert_eq!(hash_of(&linear), hash_of(&hashed));
        prop_assert_eq!(linear.count(), hashed.count());
    }

    #[test]
    fn insertion_order_does_not_affect_map_identity(
        pairs in prop::collection::btree_map(any::<i64>(), any::<i64>(), 0..12)
    ) {
        let forward: Vec<_> = pairs
            .iter()
            .map(|(k, v)| (Value::Integer(*k), Value::Integer(*v)))
            .collect();
        let mut backward = forward.clone();
        backward.reverse();
        let a = Value::ArrayMap(ArrayMap::from_pairs(forward));
        let b = Value::ArrayMap(ArrayMap::from_pairs(backward));
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn float_identity_is_bitwise(x in any::<f64>()) {
        let a = Value::Float(x);
        prop_assert_eq!(&a, &Value::Float(x));
        prop_assert_eq!(hash_of(&a), hash_of(&Value::Float(x)));
    }
}
