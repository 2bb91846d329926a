// Space property tests (consolidated).
//
// Property 1: name freshness across alloc/dealloc churn and growth.
//  - Model: the log of every name ever minted plus the set still live.
//  - Invariant: plain allocation never re-mints a logged name; live
//    names resolve; names out of the model never resolve again, table
//    growth notwithstanding.
//  - Operations: alloc, explicit tree-region claim, dealloc of a random
//    logged name.
//
// Property 2: user-reference conservation.
//  - Model: expected count per live name.
//  - Invariant: hold/add_refs/refs parity after each op; a count driven
//    to zero deallocates the entry.
use cap_space::{Name, Space, SpaceConfig, SpaceError};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

// Property 1: freshness and no resurrection.
proptest! {
    #[test]
    fn prop_names_never_repeat_or_resurrect(
        ops in proptest::collection::vec((0u8..=2u8, 0usize..256usize, 0u32..6u32), 1..120)
    ) {
        let space: Space<u64> = Space::with_config(SpaceConfig {
            initial_size: 2,
            max_size: 1 << 12,
            ..SpaceConfig::default()
        })
        .unwrap();
        let mut minted: Vec<Name> = Vec::new();
        let mut live: HashSet<Name> = HashSet::new();

        for (op, pick, gen) in ops {
            match op {
                // Plain allocation: the name must be new, ever.
                0 => {
                    let (n, e) = space.entry_alloc(false).expect("within max size");
                    drop(e);
                    prop_assert!(!minted.contains(&n), "minted twice: {:?}", n);
                    minted.push(n);
                    live.insert(n);
                }
                // Explicit claim beyond any table the run can grow, so it
                // always lands in the tree.
                1 => {
                    let name = Name::from_parts(4096 + (pick as u32 % 64), gen);
                    match space.entry_alloc_name(name) {
                        Ok(e) => {
                            drop(e);
                            prop_assert!(live.insert(name));
                            minted.push(name);
                        }
                        Err(err) => {
                            prop_assert_eq!(err, SpaceError::NameInUse);
                            prop_assert!(live.contains(&name));
                        }
                    }
                }
                // Dealloc succeeds exactly for live names.
                2 => {
                    if minted.is_empty() {
                        continue;
                    }
                    let n = minted[pick % minted.len()];
                    let res = space.entry_dealloc(n);
                    prop_assert_eq!(res.is_ok(), live.remove(&n));
                }
                _ => unreachable!(),
            }

            for n in &minted {
                prop_assert_eq!(
                    space.entry_lookup(*n).is_some(),
                    live.contains(n),
                    "name {:?}",
                    n
                );
            }
        }

        space.destroy();
        for n in &minted {
            prop_assert!(space.entry_lookup(*n).is_none());
        }
    }
}

// Property 2: user-reference conservation.
proptest! {
    #[test]
    fn prop_uref_parity(
        ops in proptest::collection::vec((0u8..=3u8, 0usize..64usize, -4i32..5i32), 1..100)
    ) {
        let space: Space<u64> = Space::create(4).unwrap();
        let mut minted: Vec<Name> = Vec::new();
        let mut refs: HashMap<Name, u32> = HashMap::new();

        for (op, pick, delta) in ops {
            if op != 0 && minted.is_empty() {
                continue;
            }
            match op {
                0 => {
                    let (n, e) = space.entry_alloc(false).expect("within max size");
                    drop(e);
                    minted.push(n);
                    refs.insert(n, 1);
                }
                1 => {
                    let n = minted[pick % minted.len()];
                    match refs.get(&n).copied() {
                        Some(r) => {
                            prop_assert_eq!(space.entry_hold(n), Ok(r + 1));
                            refs.insert(n, r + 1);
                        }
                        None => prop_assert_eq!(
                            space.entry_hold(n),
                            Err(SpaceError::NameNotFound)
                        ),
                    }
                }
                2 => {
                    let n = minted[pick % minted.len()];
                    match refs.get(&n).copied() {
                        Some(r) => {
                            let next = r as i64 + delta as i64;
                            let res = space.entry_add_refs(n, delta);
                            if next < 0 {
                                prop_assert_eq!(res, Err(SpaceError::InvalidValue));
                            } else if next == 0 {
                                prop_assert_eq!(res, Ok(0));
                                refs.remove(&n);
                            } else {
                                prop_assert_eq!(res, Ok(next as u32));
                                refs.insert(n, next as u32);
                            }
                        }
                        None => prop_assert_eq!(
                            space.entry_add_refs(n, delta),
                            Err(SpaceError::NameNotFound)
                        ),
                    }
                }
                3 => {
                    let n = minted[pick % minted.len()];
                    match refs.get(&n).copied() {
                        Some(r) => prop_assert_eq!(space.entry_refs(n), Ok(r)),
                        None => prop_assert_eq!(
                            space.entry_refs(n),
                            Err(SpaceError::NameNotFound)
                        ),
                    }
                }
                _ => unreachable!(),
            }
        }

        // Conservation: every tracked count reads back; dropped names miss.
        for n in &minted {
            match refs.get(n) {
                Some(&r) => prop_assert_eq!(space.entry_refs(*n), Ok(r)),
                None => prop_assert!(space.entry_lookup(*n).is_none()),
            }
        }
        space.destroy();
    }
}
