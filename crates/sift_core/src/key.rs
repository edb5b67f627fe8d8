//! Composite keys for index lookups and group membership.
//!
//! Equality is element-wise with null equal to null and null not equal to any
//! value. Hashes are combined by summing a per-position hash so the result
//! only depends on each (position, value) pair.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

use crate::scalar::ScalarValue;

/// Fixed seeds so hashes are stable across runs and processes.
const HASH_STATE: RandomState = RandomState::with_seeds(
    0x8f3a_91c2_d4e5_f607,
    0x1b2c_3d4e_5f60_7182,
    0x93a4_b5c6_d7e8_f901,
    0x2a3b_4c5d_6e7f_8091,
);

fn composite_hash(values: &[ScalarValue]) -> u64 {
    values.iter().enumerate().fold(0u64, |acc, (pos, value)| {
        let mut hasher = HASH_STATE.build_hasher();
        pos.hash(&mut hasher);
        value.key_hash(&mut hasher);
        acc.wrapping_add(hasher.finish())
    })
}

fn composite_eq(a: &[ScalarValue], b: &[ScalarValue]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.key_eq(b))
}

macro_rules! composite_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            values: Vec<ScalarValue>,
        }

        impl $name {
            pub fn new(values: Vec<ScalarValue>) -> Self {
                $name { values }
            }

            pub fn values(&self) -> &[ScalarValue] {
                &self.values
            }

            pub fn into_values(self) -> Vec<ScalarValue> {
                self.values
            }

            pub fn len(&self) -> usize {
                self.values.len()
            }

            pub fn is_empty(&self) -> bool {
                self.values.is_empty()
            }

            pub fn has_null(&self) -> bool {
                self.values.iter().any(|v| v.is_null())
            }

            /// Position-stable combined hash of all values.
            pub fn combined_hash(&self) -> u64 {
                composite_hash(&self.values)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                composite_eq(&self.values, &other.values)
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                state.write_u64(self.combined_hash());
            }
        }

        impl From<Vec<ScalarValue>> for $name {
            fn from(values: Vec<ScalarValue>) -> Self {
                $name::new(values)
            }
        }
    };
}

composite_key!(
    /// Key for secondary index lookups.
    Key
);

composite_key!(
    /// Key identifying a group under its parent.
    GroupKey
);
