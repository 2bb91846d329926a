#![cfg(test)]

// Property tests for Space kept inside the crate so they can reach the
// white-box stats without feature gates.

use crate::name::Name;
use crate::right::RightType;
use crate::space::{Space, SpaceConfig, SpaceError, SpaceStats};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;

// Ops pick names out of the log of every name the run has produced, by
// index modulo the log length. Indices shrink toward earlier names and
// op lists shrink in length, which keeps counterexamples small.
#[derive(Clone, Debug)]
enum Op {
    Alloc(bool),
    AllocName(u32, u32),
    Dealloc(usize),
    Hold(usize),
    AddRefs(usize, i32),
    Refs(usize),
    Lookup(usize),
    Bind(usize, u64),
    PortToFile(u64),
    FileToPort(usize),
    MarkDead(usize),
    Iterate,
}

fn arb_ops(objects: u64) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        any::<bool>().prop_map(Op::Alloc),
        (0..12u32, 0..3u32).prop_map(|(i, g)| Op::AllocName(i, g)),
        (0..24usize).prop_map(Op::Dealloc),
        (0..24usize).prop_map(Op::Hold),
        (0..24usize, -3..4i32).prop_map(|(i, d)| Op::AddRefs(i, d)),
        (0..24usize).prop_map(Op::Refs),
        (0..24usize).prop_map(Op::Lookup),
        (0..24usize, 0..objects).prop_map(|(i, o)| Op::Bind(i, o)),
        (0..objects).prop_map(Op::PortToFile),
        (0..24usize).prop_map(Op::FileToPort),
        (0..24usize).prop_map(Op::MarkDead),
        Just(Op::Iterate),
    ];
    proptest::collection::vec(op, 1..80)
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct ModelEntry {
    urefs: u32,
    right: RightType,
    object: Option<u64>,
    in_table: bool,
}

fn pick(names: &[Name], i: usize) -> Option<Name> {
    if names.is_empty() {
        None
    } else {
        Some(names[i % names.len()])
    }
}

fn drop_model_entry(
    model: &mut HashMap<Name, ModelEntry>,
    canonical: &mut HashMap<u64, Name>,
    name: Name,
) {
    if let Some(me) = model.remove(&name) {
        if let Some(o) = me.object {
            if canonical.get(&o) == Some(&name) {
                canonical.remove(&o);
            }
        }
    }
}

// State-machine equivalence against a plain map model. Invariants
// exercised across random operation sequences:
// - Every name the space hands out is fresh; live names resolve with the
//   model's right, urefs, binding, and collision flag.
// - Deallocated and refcount-exhausted names never resolve again, across
//   table growth included.
// - Explicit-name allocation succeeds exactly when the model says the
//   slot (or tree position) is unclaimed.
// - The reverse index holds exactly the canonical bindings: the
//   descriptor view dedups onto them, and collided entries never promote.
fn run_ops(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let space: Space<u64> = Space::with_config(SpaceConfig {
        initial_size: 4,
        max_size: 1 << 12,
        ..SpaceConfig::default()
    })
    .unwrap();

    let mut model: HashMap<Name, ModelEntry> = HashMap::new();
    let mut canonical: HashMap<u64, Name> = HashMap::new();
    let mut names: Vec<Name> = Vec::new();

    for op in ops {
        match op {
            Op::Alloc(send_once) => {
                let (n, e) = space.entry_alloc(send_once).expect("space has headroom");
                drop(e);
                prop_assert!(!model.contains_key(&n), "allocated name must be fresh");
                names.push(n);
                let right = if send_once {
                    RightType::SendOnce
                } else {
                    RightType::None
                };
                model.insert(
                    n,
                    ModelEntry {
                        urefs: 1,
                        right,
                        object: None,
                        in_table: true,
                    },
                );
            }
            Op::AllocName(idx, gen) => {
                let name = Name::from_parts(idx, gen);
                let tsize = space.stats().table_size;
                let exact = model.contains_key(&name);
                let occupied = model
                    .iter()
                    .any(|(n, me)| me.in_table && n.index() == idx);
                let res = space.entry_alloc_name(name);
                if idx == 0 {
                    prop_assert_eq!(res.err(), Some(SpaceError::InvalidName));
                } else if exact || (idx < tsize && occupied) {
                    prop_assert_eq!(res.err(), Some(SpaceError::NameInUse));
                } else {
                    match res {
                        Ok(e) => drop(e),
                        Err(err) => prop_assert!(false, "alloc_name failed: {}", err),
                    }
                    names.push(name);
                    model.insert(
                        name,
                        ModelEntry {
                            urefs: 1,
                            right: RightType::None,
                            object: None,
                            in_table: idx < tsize,
                        },
                    );
                }
            }
            Op::Dealloc(i) => {
                let Some(n) = pick(&names, i) else { continue };
                let res = space.entry_dealloc(n);
                if model.contains_key(&n) {
                    let me = model.get(&n).unwrap().clone();
                    let entry = res.expect("live name deallocates");
                    prop_assert_eq!(entry.urefs(), me.urefs);
                    prop_assert_eq!(entry.target().object().copied(), me.object);
                    drop_model_entry(&mut model, &mut canonical, n);
                } else {
                    prop_assert_eq!(res.err(), Some(SpaceError::NameNotFound));
                }
            }
            Op::Hold(i) => {
                let Some(n) = pick(&names, i) else { continue };
                match model.get_mut(&n) {
                    Some(me) => {
                        prop_assert_eq!(space.entry_hold(n), Ok(me.urefs + 1));
                        me.urefs += 1;
                    }
                    None => {
                        prop_assert_eq!(space.entry_hold(n), Err(SpaceError::NameNotFound));
                    }
                }
            }
            Op::AddRefs(i, d) => {
                let Some(n) = pick(&names, i) else { continue };
                match model.get(&n).map(|me| me.urefs) {
                    Some(urefs) => {
                        let next = urefs as i64 + d as i64;
                        let res = space.entry_add_refs(n, d);
                        if next < 0 {
                            prop_assert_eq!(res, Err(SpaceError::InvalidValue));
                        } else if next == 0 {
                            prop_assert_eq!(res, Ok(0));
                            drop_model_entry(&mut model, &mut canonical, n);
                        } else {
                            prop_assert_eq!(res, Ok(next as u32));
                            model.get_mut(&n).unwrap().urefs = next as u32;
                        }
                    }
                    None => {
                        prop_assert_eq!(
                            space.entry_add_refs(n, d),
                            Err(SpaceError::NameNotFound)
                        );
                    }
                }
            }
            Op::Refs(i) => {
                let Some(n) = pick(&names, i) else { continue };
                match model.get(&n) {
                    Some(me) => prop_assert_eq!(space.entry_refs(n), Ok(me.urefs)),
                    None => {
                        prop_assert_eq!(space.entry_refs(n), Err(SpaceError::NameNotFound));
                    }
                }
            }
            Op::Lookup(i) => {
                let Some(n) = pick(&names, i) else { continue };
                let found = space.entry_lookup(n);
                prop_assert_eq!(found.is_some(), model.contains_key(&n));
                if let Some(e) = found {
                    prop_assert_eq!(e.name(), n);
                    prop_assert_eq!(e.urefs(), model[&n].urefs);
                }
            }
            Op::Bind(i, obj) => {
                let Some(n) = pick(&names, i) else { continue };
                match space.entry_lookup_mut(n) {
                    Some(mut e) => {
                        prop_assert!(model.contains_key(&n));
                        e.bind_object(obj);
                        drop(e);
                        let old = model[&n].object;
                        if let Some(o) = old {
                            if canonical.get(&o) == Some(&n) {
                                canonical.remove(&o);
                            }
                        }
                        if !canonical.contains_key(&obj) {
                            canonical.insert(obj, n);
                        }
                        model.get_mut(&n).unwrap().object = Some(obj);
                    }
                    None => prop_assert!(!model.contains_key(&n)),
                }
            }
            Op::PortToFile(obj) => {
                let res = space.entry_port_to_file(obj);
                match canonical.get(&obj).copied() {
                    Some(existing) => prop_assert_eq!(res, Ok(existing)),
                    None => {
                        let n = res.expect("space has headroom");
                        prop_assert!(!model.contains_key(&n), "descriptor name must be fresh");
                        names.push(n);
                        model.insert(
                            n,
                            ModelEntry {
                                urefs: 1,
                                right: RightType::Send,
                                object: Some(obj),
                                in_table: true,
                            },
                        );
                        canonical.insert(obj, n);
                    }
                }
            }
            Op::FileToPort(i) => {
                let Some(n) = pick(&names, i) else { continue };
                let res = space.entry_file_to_port(n);
                match model.get(&n) {
                    Some(me) => match me.object {
                        Some(o) => prop_assert_eq!(res, Ok(o)),
                        None => prop_assert_eq!(res, Err(SpaceError::InvalidRight)),
                    },
                    None => prop_assert_eq!(res, Err(SpaceError::NameNotFound)),
                }
            }
            Op::MarkDead(i) => {
                let Some(n) = pick(&names, i) else { continue };
                let res = space.entry_mark_dead(n);
                match model.get(&n) {
                    Some(me) => match me.object {
                        Some(o) => {
                            prop_assert_eq!(res, Ok(o));
                            if canonical.get(&o) == Some(&n) {
                                canonical.remove(&o);
                            }
                            let me = model.get_mut(&n).unwrap();
                            me.object = None;
                            me.right = RightType::DeadName;
                        }
                        None => prop_assert_eq!(res, Err(SpaceError::InvalidRight)),
                    },
                    None => prop_assert_eq!(res, Err(SpaceError::NameNotFound)),
                }
            }
            Op::Iterate => {
                let mut seen: Vec<Name> = Vec::new();
                space.for_each(|n, _| seen.push(n));
                prop_assert_eq!(seen.len(), model.len());
                for n in seen {
                    prop_assert!(model.contains_key(&n));
                }
            }
        }

        // Post-conditions after each op.
        // 1) Every model entry resolves with matching fields; the
        //    collision flag is set exactly on bound entries that are not
        //    the canonical binding for their object.
        for (n, me) in &model {
            let e = space.entry_lookup(*n);
            prop_assert!(e.is_some(), "live name {:?} must resolve", n);
            let e = e.unwrap();
            prop_assert_eq!(e.urefs(), me.urefs);
            prop_assert_eq!(e.right(), me.right);
            prop_assert_eq!(e.target().object().copied(), me.object);
            let expect_collision = me.object.map_or(false, |o| canonical.get(&o) != Some(n));
            prop_assert_eq!(e.collision(), expect_collision);
        }
        // 2) Names the model no longer holds must not resolve.
        for n in &names {
            if !model.contains_key(n) {
                prop_assert!(space.entry_lookup(*n).is_none(), "stale {:?} resolved", n);
            }
        }
        // 3) The reverse index carries exactly the canonical bindings.
        prop_assert_eq!(space.stats().indexed as usize, canonical.len());
    }

    // Teardown releases everything; only the test's handle remains.
    space.destroy();
    for n in &names {
        prop_assert!(space.entry_lookup(*n).is_none());
    }
    prop_assert_eq!(space.stats(), SpaceStats::default());
    prop_assert_eq!(space.references(), 1);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops(4)) {
        run_ops(ops)?;
    }
}

// Single-object variant: every binding fights over one object, which
// stresses the canonical/collided split and the descriptor-view dedup.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_shared_object(ops in arb_ops(1)) {
        run_ops(ops)?;
    }
}
