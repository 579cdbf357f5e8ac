use proptest::prelude::*;
use quire_core::change::{AccountKey, DeviceKey};
use quire_core::config::{EngineConfig, IdConfig, OrderingConfig};
use quire_core::{Cid, Document, Error, MemoryStore, OpOrder, ReceiveOutcome, Replica};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

#[path = "generators.rs"]
mod generators;
use generators::*;

const REPLICAS: usize = 3;

fn replica(seed: u64) -> Replica {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = EngineConfig {
        ordering: OrderingConfig {
            policy: OpOrder::OriginTieBreak,
        },
        ids: IdConfig { seed: Some(seed) },
        ..EngineConfig::default()
    };
    Replica::new(
        MemoryStore::new(),
        DeviceKey::new(&mut rng),
        AccountKey::new(&mut rng),
        config,
    )
}

fn apply_edit(doc: &mut Document, edit: &Edit) {
    let result = match edit {
        Edit::Title(t) => doc.change_title(t),
        Edit::Subtitle(t) => doc.change_subtitle(t),
        Edit::Snapshot { block, state } => doc.ensure_block_state(BLOCKS[*block], state),
        Edit::Move { block, parent, left } => doc
            .move_block(
                BLOCKS[*block],
                parent.map_or("", |p| BLOCKS[p]),
                left.map_or("", |l| BLOCKS[l]),
            )
            .map(|_| ()),
        Edit::Delete(block) => doc.delete_block(BLOCKS[*block]).map(|_| ()),
    };
    match result {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => {}
        Err(e) => panic!("edit {edit:?} failed: {e}"),
    }
}

fn setup() -> (Vec<Replica>, Cid) {
    let mut replicas: Vec<Replica> = (0..REPLICAS as u64).map(|i| replica(i + 1)).collect();
    let object = replicas[0].create_document(1).expect("create");
    let permanode = replicas[0].permanode(&object).expect("permanode");
    for r in &mut replicas[1..] {
        r.receive_permanode(permanode.clone()).expect("permanode");
    }
    (replicas, object)
}

/// Every replica gets every other replica's changes, shuffled, some twice.
fn gossip(replicas: &mut [Replica], object: &Cid, rng: &mut StdRng) {
    let mut deliveries = Vec::new();
    for target in 0..replicas.len() {
        for source in 0..replicas.len() {
            if source == target {
                continue;
            }
            for bytes in replicas[source].changes(object).expect("changes") {
                deliveries.push((target, bytes));
            }
        }
    }
    let extra: Vec<_> = deliveries
        .iter()
        .filter(|_| rand::Rng::gen_bool(rng, 0.2))
        .cloned()
        .collect();
    deliveries.extend(extra);
    deliveries.shuffle(rng);

    for (target, bytes) in deliveries {
        replicas[target].receive(bytes).expect("receive");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicas_converge_under_shuffled_duplicated_delivery(
        script in arb_script(REPLICAS),
        seed in any::<u64>(),
    ) {
        let (mut replicas, object) = setup();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut now = 10;

        for round in &script {
            for (i, edits) in round.iter().enumerate() {
                let mut doc = replicas[i].open(&object).expect("open");
                for edit in edits {
                    apply_edit(&mut doc, edit);
                }
                now += 1;
                match replicas[i].commit(&mut doc, now) {
                    Ok(_) | Err(Error::EmptyDraft) => {}
                    Err(e) => panic!("commit failed: {e}"),
                }
            }
            gossip(&mut replicas, &object, &mut rng);
        }

        let expected = replicas[0].view(&object).expect("view").snapshot();
        let version = replicas[0].version(&object).expect("version");
        for r in &replicas {
            prop_assert_eq!(r.pending_len(), 0);
            prop_assert_eq!(r.version(&object).expect("version"), version.clone());
            prop_assert_eq!(r.view(&object).expect("view").snapshot(), expected.clone());
            prop_assert_eq!(r.load(&object).expect("load").snapshot(), expected.clone());
        }
    }
}

#[test]
fn late_joiner_catches_up_from_reverse_order() {
    let (mut replicas, object) = setup();
    let mut now = 10;
    for (i, title) in ["draft", "review", "final"].iter().enumerate() {
        let r = &mut replicas[i % REPLICAS];
        let mut doc = r.open(&object).expect("open");
        doc.change_title(title).expect("title");
        doc.move_block(BLOCKS[i], "", "").expect("move");
        now += 1;
        r.commit(&mut doc, now).expect("commit");
        let changes = r.changes(&object).expect("changes");
        for other in 0..REPLICAS {
            if other != i % REPLICAS {
                for bytes in &changes {
                    replicas[other].receive(bytes.clone()).expect("receive");
                }
            }
        }
    }

    let mut late = replica(99);
    late.receive_permanode(replicas[0].permanode(&object).expect("permanode"))
        .expect("permanode");
    let mut changes = replicas[0].changes(&object).expect("changes");
    changes.reverse();
    let mut outcomes = Vec::new();
    for bytes in changes {
        outcomes.push(late.receive(bytes).expect("receive"));
    }

    assert!(matches!(outcomes[0], ReceiveOutcome::Buffered { .. }));
    assert!(matches!(outcomes[2], ReceiveOutcome::Applied { unblocked: 2, .. }));
    let doc = late.view(&object).expect("view");
    assert_eq!(doc.title(), "final");
    assert_eq!(doc.snapshot(), replicas[0].view(&object).expect("view").snapshot());
    assert_eq!(doc.iter().count(), 3);
}

#[test]
fn load_reports_missing_changes_as_recoverable() {
    let (mut replicas, object) = setup();
    let mut doc = replicas[0].open(&object).expect("open");
    doc.change_title("t").expect("title");
    replicas[0].commit(&mut doc, 2).expect("commit");
    let version = replicas[0].version(&object).expect("version");

    // Replica 1 knows the object but none of its changes.
    let err = quire_core::store::load_document(
        replicas[1].store(),
        &object,
        &version,
        replicas[1].config(),
    )
    .expect_err("missing change");
    assert!(err.is_recoverable());
    assert!(matches!(err, Error::NotFound { .. }));
}
