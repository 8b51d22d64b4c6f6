/*
 * Copyright 2023 Cargill Incorporated
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 * -----------------------------------------------------------------------------
 */

//! Property tests for the layered stack's universal invariants.

use std::collections::BTreeMap;

use proptest::prelude::*;

use strata::database::btree::BTreeDatabase;
use strata::storage::backend::BackendStorage;
use strata::storage::cache::CacheStorage;
use strata::storage::layered::LayeredStorage;
use strata::storage::{Entry, StateKey, StateRead, StateWrite};

fn new_stack() -> LayeredStorage<BackendStorage> {
    LayeredStorage::new(
        CacheStorage::unbounded(),
        BackendStorage::new(Box::new(BTreeDatabase::new())),
    )
}

fn key(name: &str) -> StateKey {
    StateKey::new("t_test", name.as_bytes().to_vec())
}

/// One generated mutation: which key, what value, and whether it's a delete.
type Mutation = (String, String, bool);

/// Applies the tier layouts and returns, per key, the value the newest
/// containing tier holds (`Some(None)` for a tombstone hit).
fn expected_state(tiers: &[Vec<Mutation>]) -> BTreeMap<String, Option<String>> {
    let mut expected = BTreeMap::new();
    // Oldest tier first; later tiers overwrite.
    for tier in tiers {
        for (name, value, is_delete) in tier {
            if *is_delete {
                expected.insert(name.clone(), None);
            } else {
                expected.insert(name.clone(), Some(value.clone()));
            }
        }
    }
    expected
}

fn build_stack(tiers: &[Vec<Mutation>]) -> LayeredStorage<BackendStorage> {
    let stack = new_stack();
    // Oldest first: each tier becomes the mutable layer, is filled, then
    // promoted, so the last tier ends up newest (front).
    for tier in tiers {
        stack.new_mutable().expect("new_mutable failed");
        let mutable = stack
            .mutable_storage()
            .expect("lock failed")
            .expect("no mutable tier");
        for (name, value, is_delete) in tier {
            if *is_delete {
                mutable.remove_one(key(name)).expect("remove failed");
            } else {
                mutable
                    .write_one(key(name), Entry::new(value.as_bytes().to_vec()))
                    .expect("write failed");
            }
        }
        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");
    }
    stack
}

fn observed_state(
    stack: &LayeredStorage<BackendStorage>,
    names: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, Option<String>> {
    let view = stack.fork(false).expect("fork failed");
    names
        .keys()
        .map(|name| {
            let value = view
                .read_value(&key(name))
                .expect("read failed")
                .map(|value| String::from_utf8(value).expect("value not utf8"));
            (name.clone(), value)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Lookup monotonicity: the view always reports the value held by the
    /// newest tier containing the key, with tombstones reading as absent.
    #[test]
    fn lookup_follows_the_newest_tier(
        tiers in proptest::collection::vec(
            proptest::collection::vec(("[a-f]", "[a-z]{1,6}", any::<bool>()), 0..6),
            1..4,
        ),
    ) {
        let expected = expected_state(&tiers);
        let stack = build_stack(&tiers);
        prop_assert_eq!(observed_state(&stack, &expected), expected);
    }

    /// Merge idempotence: folding immutable tiers down into the cache and
    /// backend never changes what a reader observes, and re-merging after a
    /// retryable failure would apply the same batch again.
    #[test]
    fn merging_down_preserves_observed_state(
        tiers in proptest::collection::vec(
            proptest::collection::vec(("[a-f]", "[a-z]{1,6}", any::<bool>()), 0..6),
            1..4,
        ),
    ) {
        let expected = expected_state(&tiers);
        let stack = build_stack(&tiers);

        let before = observed_state(&stack, &expected);
        while stack.immutable_count().expect("count failed") > 0 {
            stack
                .merge_and_pop_immutable_back()
                .expect("merge-down failed");
            // Observations are stable after every partial merge.
            prop_assert_eq!(observed_state(&stack, &expected), before.clone());
        }
        prop_assert_eq!(before, expected);
    }
}
