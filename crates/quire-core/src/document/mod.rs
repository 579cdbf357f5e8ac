//! Document projection.
//!
//! A [`Document`] is the live state folded from a datom log: two LWW
//! registers for title and subtitle, one LWW register per block holding
//! its content snapshot, and a [`BlockTree`] for the block hierarchy.
//!
//! # Replay
//!
//! [`Document::replay`] takes datoms sorted by op. Title, subtitle and
//! snapshot datoms apply immediately. Move datoms are collected per
//! position node, regrouped into move ops once the input is consumed, and
//! integrated in op order.
//!
//! # Editing
//!
//! A document opened with a [`Draft`] accepts local mutations. Every
//! mutation that changes state mints datoms into the draft; publishing
//! turns the draft into a signed change.

pub mod draft;
pub mod moves;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use draft::Draft;
pub use moves::{MoveCollector, MoveOp};

use crate::change::{Change, DeviceKey, PublicKey, SignedChange, body};
use crate::crdt::{BlockTree, Lww, TreeItem, TreeIter};
use crate::error::{Error, Result};
use crate::model::{Datom, NodeId, OpId, OpOrder, OpTracker, Value};

/// Attribute names of document datoms.
pub mod attrs {
    /// Document title.
    pub const TITLE: &str = "quire.document/title";
    /// Document subtitle.
    pub const SUBTITLE: &str = "quire.document/subtitle";
    /// Move marker: `(ROOT, move, position)`.
    pub const MOVE: &str = "quire.document/move";
    /// Opaque content snapshot of a block.
    pub const BLOCK_STATE: &str = "quire.document/block-snapshot";
    /// Block placed by a position.
    pub const POS_BLOCK: &str = "quire.document.position/block";
    /// Parent of a position.
    pub const POS_PARENT: &str = "quire.document.position/parent";
    /// Left neighbour of a position.
    pub const POS_LEFT: &str = "quire.document.position/left";
}

/// Comparable snapshot of a document's visible state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// Current title.
    pub title: String,
    /// Current subtitle.
    pub subtitle: String,
    /// Content snapshot per block.
    pub blocks: BTreeMap<NodeId, Vec<u8>>,
    /// Depth-first walk from Root.
    pub tree: Vec<TreeItem>,
}

enum Register {
    Title,
    Subtitle,
    Block(NodeId),
}

/// Live document state.
#[derive(Debug, Clone)]
pub struct Document {
    order: OpOrder,
    title: Lww<Datom>,
    subtitle: Lww<Datom>,
    blocks: HashMap<NodeId, Lww<Datom>>,
    tree: BlockTree,
    tracker: OpTracker,
    draft: Option<Draft>,
    update_time: Option<i64>,
}

impl Document {
    /// Empty, read-only document.
    #[must_use]
    pub fn new(order: OpOrder) -> Self {
        Self {
            order,
            title: Lww::new(),
            subtitle: Lww::new(),
            blocks: HashMap::new(),
            tree: BlockTree::new(),
            tracker: OpTracker::new(order),
            draft: None,
            update_time: None,
        }
    }

    /// Empty document accepting edits into `draft`.
    #[must_use]
    pub fn with_draft(order: OpOrder, draft: Draft) -> Self {
        Self {
            draft: Some(draft),
            ..Self::new(order)
        }
    }

    /// Ordering policy.
    #[must_use]
    pub const fn order(&self) -> OpOrder {
        self.order
    }

    /// Restore state from datoms sorted by op.
    ///
    /// # Errors
    ///
    /// - [`Error::DoubleReplay`] unless the document is empty.
    /// - [`Error::OutOfOrderOperation`] / [`Error::ConcurrentOperations`]
    ///   for unsorted or unorderable input.
    /// - [`Error::IncompleteMoveGroup`], [`Error::DanglingLeftReference`],
    ///   and [`Error::Malformed`] for corrupt move datoms.
    pub fn replay(&mut self, datoms: &[Datom]) -> Result<()> {
        if !self.tracker.is_zero() || !self.tree.is_empty() {
            return Err(Error::DoubleReplay);
        }

        let mut moves = MoveCollector::new();
        for d in datoms {
            self.tracker.track(d.op)?;
            match d.attribute.as_str() {
                attrs::TITLE => {
                    self.title.set(d.op, d.clone(), self.order)?;
                }
                attrs::SUBTITLE => {
                    self.subtitle.set(d.op, d.clone(), self.order)?;
                }
                attrs::BLOCK_STATE => {
                    self.blocks
                        .entry(d.entity)
                        .or_default()
                        .set(d.op, d.clone(), self.order)?;
                }
                _ => moves.handle(d)?,
            }
        }

        let log = moves.into_log(self.order)?;
        let mut rejected = 0usize;
        for m in &log {
            if !self
                .tree
                .integrate_move(m.op, m.block, m.parent, m.pos, m.reference, self.order)?
            {
                rejected += 1;
            }
        }

        debug!(
            datoms = datoms.len(),
            moves = log.len(),
            noop_moves = rejected,
            "replayed document"
        );
        Ok(())
    }

    fn draft_mut(&mut self) -> Result<&mut Draft> {
        self.draft.as_mut().ok_or(Error::NotEditable)
    }

    fn ensure_register(&mut self, register: Register, value: Value) -> Result<()> {
        let order = self.order;
        let draft = self.draft.as_mut().ok_or(Error::NotEditable)?;
        let (entity, attribute, lww) = match register {
            Register::Title => (NodeId::ROOT, attrs::TITLE, &mut self.title),
            Register::Subtitle => (NodeId::ROOT, attrs::SUBTITLE, &mut self.subtitle),
            Register::Block(id) => (id, attrs::BLOCK_STATE, self.blocks.entry(id).or_default()),
        };

        if !lww.is_zero() && lww.value().map(|d| &d.value) == Some(&value) {
            return Ok(());
        }

        let old = lww.op();
        let datom = draft.mint(entity, attribute, value);
        self.tracker.track(datom.op)?;
        lww.set(datom.op, datom.clone(), order)?;
        draft.supersede(old);
        draft.push(datom);
        Ok(())
    }

    /// Set the title. No-op if unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::NotEditable`] without a draft.
    pub fn change_title(&mut self, title: &str) -> Result<()> {
        self.ensure_register(Register::Title, Value::from(title))
    }

    /// Set the subtitle. No-op if unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::NotEditable`] without a draft.
    pub fn change_subtitle(&mut self, subtitle: &str) -> Result<()> {
        self.ensure_register(Register::Subtitle, Value::from(subtitle))
    }

    /// Store the content snapshot of `block`. No-op if byte-identical.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidNodeId`] for a bad block id, [`Error::NotEditable`]
    /// without a draft.
    pub fn ensure_block_state(&mut self, block: &str, state: &[u8]) -> Result<()> {
        let id = NodeId::from_str_id(block)?;
        self.ensure_register(Register::Block(id), Value::from(state))
    }

    /// Move `block` under `parent` right after `left`.
    ///
    /// An empty `parent` means Root, an empty `left` means the start of the
    /// parent's list. Returns whether the block changed place.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMove`] for cycles, self-parenting, reserved
    ///   blocks, unknown parents, or a left sibling that does not live
    ///   under `parent`. Nothing is minted in that case.
    /// - [`Error::InvalidNodeId`] for bad ids.
    /// - [`Error::NotEditable`] without a draft.
    pub fn move_block(&mut self, block: &str, parent: &str, left: &str) -> Result<bool> {
        let block = NodeId::from_str_id(block)?;
        let parent = if parent.is_empty() {
            NodeId::ROOT
        } else {
            NodeId::from_str_id(parent)?
        };
        let left = if left.is_empty() {
            None
        } else {
            Some(NodeId::from_str_id(left)?)
        };
        self.move_node(block, parent, left)
    }

    /// Move `block` to the trash.
    ///
    /// # Errors
    ///
    /// See [`Document::move_block`].
    pub fn delete_block(&mut self, block: &str) -> Result<bool> {
        self.move_block(block, "$TRASH", "")
    }

    /// Typed form of [`Document::move_block`].
    ///
    /// # Errors
    ///
    /// See [`Document::move_block`].
    pub fn move_node(&mut self, block: NodeId, parent: NodeId, left: Option<NodeId>) -> Result<bool> {
        self.draft_mut()?;

        let invalid = |reason: &str| Error::InvalidMove {
            block,
            parent,
            reason: reason.to_string(),
        };
        if block.is_reserved() {
            return Err(invalid("reserved block can't be moved"));
        }
        if block == parent {
            return Err(invalid("block can't be its own parent"));
        }
        if !parent.is_reserved() && self.tree.position_of(parent).is_none() {
            return Err(invalid("parent is not in the tree"));
        }
        if self.tree.is_ancestor(block, parent) {
            debug!(%block, %parent, "move rejected: would create a cycle");
            return Err(invalid("block is an ancestor of the parent"));
        }

        let (reference, left_pos) = self.tree.anchor(block, parent, left)?;
        if self.tree.is_in_place(block, parent, reference)? {
            return Ok(false);
        }

        let draft = self.draft.as_mut().ok_or(Error::NotEditable)?;
        let pos = draft.mint_node();
        let group = [
            draft.mint(NodeId::ROOT, attrs::MOVE, pos),
            draft.mint(pos, attrs::POS_BLOCK, block),
            draft.mint(pos, attrs::POS_PARENT, parent),
            draft.mint(pos, attrs::POS_LEFT, left_pos),
        ];
        let op = group[3].op;

        self.tracker.track(op)?;
        let moved = self
            .tree
            .integrate_move(op, block, parent, pos, reference, self.order)?;
        if moved {
            for d in group {
                draft.push(d);
            }
        }
        Ok(moved)
    }

    /// Sign the draft into a change and close it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotEditable`] without a draft.
    /// - [`Error::EmptyDraft`] if nothing would be published.
    /// - Encoding and signing errors.
    pub fn publish(&mut self, author: PublicKey, key: &DeviceKey, now: i64) -> Result<SignedChange> {
        let draft = self.draft.as_ref().ok_or(Error::NotEditable)?;
        if draft.is_empty() {
            return Err(Error::EmptyDraft);
        }

        let datoms = draft.body();
        let change = Change::new(
            draft.object(),
            author,
            draft.parents().to_vec(),
            draft.lamport(),
            body::encode(&datoms)?,
            now,
            key.public(),
        );
        let signed = change.sign(key)?;

        info!(
            change = %signed.id(),
            object = %draft.object(),
            lamport = draft.lamport(),
            datoms = datoms.len(),
            "published change"
        );
        self.draft = None;
        self.update_time = Some(now);
        Ok(signed)
    }

    /// Whether the document accepts edits.
    #[must_use]
    pub const fn is_editable(&self) -> bool {
        self.draft.is_some()
    }

    /// Open draft, if any.
    #[must_use]
    pub const fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    /// Current title, empty if never set.
    #[must_use]
    pub fn title(&self) -> &str {
        self.title
            .value()
            .and_then(|d| d.value.as_str())
            .unwrap_or_default()
    }

    /// Current subtitle, empty if never set.
    #[must_use]
    pub fn subtitle(&self) -> &str {
        self.subtitle
            .value()
            .and_then(|d| d.value.as_str())
            .unwrap_or_default()
    }

    /// Content snapshot of a block.
    #[must_use]
    pub fn block_state(&self, block: NodeId) -> Option<&[u8]> {
        self.blocks
            .get(&block)
            .and_then(Lww::value)
            .and_then(|d| d.value.as_bytes())
    }

    /// The block tree.
    #[must_use]
    pub const fn tree(&self) -> &BlockTree {
        &self.tree
    }

    /// Depth-first walk over live blocks from Root.
    #[must_use]
    pub fn iter(&self) -> TreeIter<'_> {
        self.tree.iter()
    }

    /// Depth-first walk from any parent, e.g. [`NodeId::TRASH`].
    #[must_use]
    pub fn iter_from(&self, parent: NodeId) -> TreeIter<'_> {
        self.tree.iter_from(parent)
    }

    /// Datoms minted by local edits, superseded ones included.
    #[must_use]
    pub fn dirty_datoms(&self) -> &[Datom] {
        match &self.draft {
            Some(draft) => draft.dirty(),
            None => &[],
        }
    }

    /// Ops superseded within the draft.
    #[must_use]
    pub fn deleted_datoms(&self) -> Vec<OpId> {
        self.draft.as_ref().map(Draft::deleted).unwrap_or_default()
    }

    /// Last op applied to this document.
    #[must_use]
    pub const fn last_op(&self) -> OpId {
        self.tracker.last()
    }

    /// Creation time of the change holding the last op.
    #[must_use]
    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.update_time.and_then(DateTime::from_timestamp_micros)
    }

    pub(crate) fn set_update_time(&mut self, micros: i64) {
        self.update_time = Some(micros);
    }

    /// Snapshot of the visible state.
    #[must_use]
    pub fn snapshot(&self) -> Projection {
        let blocks = self
            .blocks
            .iter()
            .filter_map(|(id, lww)| {
                lww.value()
                    .and_then(|d| d.value.as_bytes())
                    .map(|b| (*id, b.to_vec()))
            })
            .collect();
        Projection {
            title: self.title().to_string(),
            subtitle: self.subtitle().to_string(),
            blocks,
            tree: self.iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
