#![allow(dead_code)]

use proptest::prelude::*;
use quire_core::change::{Cid, Codec};
use quire_core::model::{ChangeKey, OpId, Origin};

/// Block ids scripts pick from.
pub const BLOCKS: [&str; 5] = ["intro", "body", "list", "quote", "outro"];

/// One RGA insert: `after` is the index of an earlier insert, or `None`
/// for the list start.
#[derive(Debug, Clone)]
pub struct InsertOp {
    pub id: OpId,
    pub after: Option<usize>,
}

/// Causal insert histories. Every insert's lamport time exceeds the one of
/// the element it is anchored to.
pub fn arb_insert_history(max: usize) -> impl Strategy<Value = Vec<InsertOp>> + Clone {
    prop::collection::vec((any::<prop::sample::Index>(), any::<bool>(), 0u64..3), 1..max).prop_map(
        |raw| {
            let mut ops: Vec<InsertOp> = Vec::with_capacity(raw.len());
            for (i, (index, at_start, extra)) in raw.into_iter().enumerate() {
                let after = if i == 0 || at_start {
                    None
                } else {
                    Some(index.index(i))
                };
                let base = after.map_or(0, |j| ops[j].id.lamport);
                let n = i as u64 + 1;
                ops.push(InsertOp {
                    id: OpId::new(base + 1 + extra, Origin(n), ChangeKey(n), 1),
                    after,
                });
            }
            ops
        },
    )
}

/// A history plus a shuffled delivery order.
pub fn arb_history_and_order(max: usize) -> impl Strategy<Value = (Vec<InsertOp>, Vec<usize>)> {
    arb_insert_history(max).prop_flat_map(|history| {
        let order: Vec<usize> = (0..history.len()).collect();
        (Just(history), Just(order).prop_shuffle())
    })
}

/// Turn an arbitrary permutation into a causal one: repeatedly take the
/// first index whose anchor has been delivered.
pub fn causal_delivery(history: &[InsertOp], order: &[usize]) -> Vec<usize> {
    let mut delivered = vec![false; history.len()];
    let mut remaining: Vec<usize> = order.to_vec();
    let mut out = Vec::with_capacity(order.len());
    while !remaining.is_empty() {
        let pos = remaining
            .iter()
            .position(|&i| history[i].after.is_none_or(|j| delivered[j]))
            .expect("some insert is always deliverable");
        let i = remaining.remove(pos);
        delivered[i] = true;
        out.push(i);
    }
    out
}

pub fn arb_cid() -> impl Strategy<Value = Cid> {
    prop::collection::vec(any::<u8>(), 0..32).prop_map(|bytes| Cid::of(Codec::DagCbor, &bytes))
}

/// A local edit against an open document.
#[derive(Debug, Clone)]
pub enum Edit {
    Title(String),
    Subtitle(String),
    Snapshot { block: usize, state: Vec<u8> },
    Move { block: usize, parent: Option<usize>, left: Option<usize> },
    Delete(usize),
}

pub fn arb_edit() -> impl Strategy<Value = Edit> {
    let block = 0..BLOCKS.len();
    let maybe_block = prop::option::of(0..BLOCKS.len());
    prop_oneof![
        1 => "[a-z ]{0,12}".prop_map(Edit::Title),
        1 => "[a-z ]{0,12}".prop_map(Edit::Subtitle),
        1 => (block.clone(), prop::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(block, state)| Edit::Snapshot { block, state }),
        3 => (block.clone(), maybe_block.clone(), maybe_block)
            .prop_map(|(block, parent, left)| Edit::Move { block, parent, left }),
        1 => block.prop_map(Edit::Delete),
    ]
}

/// `rounds x replicas x edits`.
pub fn arb_script(replicas: usize) -> impl Strategy<Value = Vec<Vec<Vec<Edit>>>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(arb_edit(), 0..5), replicas),
        1..4,
    )
}
