//! Fixed-depth commitment tree for registered voter commitments.
//!
//! The tree always has `2^depth` leaf slots. Slots are filled left to right
//! and never cleared, so the occupied leaves form a prefix of the leaf layer.
//! Each layer stores only the nodes above that prefix; every position past
//! the end of a stored layer is the root of an empty subtree and is read from
//! a per-level table of empty hashes. Roots and proofs are exactly those of
//! the fully materialized tree.

use crate::error::{Error, Result};
use crate::field::{to_decimal_string, FieldElement};
use crate::hash::HashEngine;
use ark_ff::Zero;
use log::debug;
use std::fmt;

/// Depth used by the vote circuit.
pub const DEFAULT_TREE_DEPTH: usize = 20;

/// Deepest tree accepted; keeps `2^depth` addressable as `usize` on 64-bit targets.
pub const MAX_TREE_DEPTH: usize = 32;

/// Value held by unoccupied leaf slots.
#[must_use]
pub fn empty_leaf() -> FieldElement {
    FieldElement::zero()
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    pub sibling: FieldElement,
    /// Whether the node on the path is the right member of its pair.
    pub is_right: bool,
}

/// Inclusion proof for one leaf slot. Always exactly `depth` steps long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub path: Vec<PathStep>,
}

impl MerkleProof {
    /// Folds `leaf` up through the path and returns the implied root.
    pub fn compute_root<H: HashEngine>(&self, hasher: &H, leaf: FieldElement) -> FieldElement {
        self.path.iter().fold(leaf, |current, step| {
            if step.is_right {
                hasher.hash2(step.sibling, current)
            } else {
                hasher.hash2(current, step.sibling)
            }
        })
    }

    #[must_use]
    pub fn verify<H: HashEngine>(&self, hasher: &H, leaf: FieldElement, root: FieldElement) -> bool {
        self.compute_root(hasher, leaf) == root
    }

    pub fn path_elements(&self) -> Vec<FieldElement> {
        self.path.iter().map(|step| step.sibling).collect()
    }

    /// Side bits in circuit order: 0 for a left node, 1 for a right node.
    pub fn path_indices(&self) -> Vec<u8> {
        self.path.iter().map(|step| u8::from(step.is_right)).collect()
    }
}

impl fmt::Display for MerkleProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleProof:\n  Index: {}\n  Depth: {}",
            self.leaf_index,
            self.path.len()
        )?;
        for (level, step) in self.path.iter().enumerate() {
            write!(
                f,
                "\n  [{level}] {} {}",
                if step.is_right { "R" } else { "L" },
                to_decimal_string(&step.sibling)
            )?;
        }
        Ok(())
    }
}

/// Append-only binary hash tree of fixed depth.
///
/// Owned by a single writer. The hasher is usually borrowed
/// (`CommitmentTree::new(&hasher, depth)`).
#[derive(Debug, Clone)]
pub struct CommitmentTree<H: HashEngine> {
    hasher: H,
    depth: usize,
    layers: Vec<Vec<FieldElement>>,
    empty_hashes: Vec<FieldElement>,
}

impl<H: HashEngine> CommitmentTree<H> {
    /// Creates a tree whose `2^depth` slots all hold the empty leaf value.
    pub fn new(hasher: H, depth: usize) -> Result<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(Error::validation(format!(
                "tree depth must be between 1 and {MAX_TREE_DEPTH}, got {depth}"
            )));
        }

        let mut empty_hashes = Vec::with_capacity(depth + 1);
        empty_hashes.push(empty_leaf());
        for level in 0..depth {
            let below = empty_hashes[level];
            empty_hashes.push(hasher.hash2(below, below));
        }

        Ok(Self {
            hasher,
            depth,
            layers: vec![Vec::new(); depth + 1],
            empty_hashes,
        })
    }

    /// Builds a tree from an ordered list of leaves with a full bottom-up pass.
    pub fn from_leaves(hasher: H, depth: usize, leaves: &[FieldElement]) -> Result<Self> {
        let mut tree = Self::new(hasher, depth)?;
        if leaves.len() > tree.capacity() {
            return Err(Error::Capacity {
                capacity: tree.capacity(),
            });
        }
        for (index, leaf) in leaves.iter().enumerate() {
            Self::check_leaf_value(leaf).map_err(|e| {
                Error::validation(format!("leaf {index}: {e}"))
            })?;
        }
        tree.layers[0] = leaves.to_vec();
        tree.rebuild();
        Ok(tree)
    }

    fn check_leaf_value(value: &FieldElement) -> Result<()> {
        if *value == empty_leaf() {
            return Err(Error::validation(
                "commitment equals the empty-slot value and cannot be registered",
            ));
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> usize {
        1usize << self.depth
    }

    /// Number of occupied leaf slots.
    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Occupied leaves in slot order.
    pub fn leaves(&self) -> &[FieldElement] {
        &self.layers[0]
    }

    pub fn root(&self) -> FieldElement {
        self.node_unchecked(self.depth, 0)
    }

    /// Node at `level` (0 = leaves) and `index`, or `None` outside the tree.
    pub fn node(&self, level: usize, index: usize) -> Option<FieldElement> {
        if level > self.depth || index >= (1usize << (self.depth - level)) {
            return None;
        }
        Some(self.node_unchecked(level, index))
    }

    fn node_unchecked(&self, level: usize, index: usize) -> FieldElement {
        self.layers[level]
            .get(index)
            .copied()
            .unwrap_or(self.empty_hashes[level])
    }

    fn set_node(&mut self, level: usize, index: usize, value: FieldElement) {
        let layer = &mut self.layers[level];
        if index < layer.len() {
            layer[index] = value;
        } else {
            debug_assert_eq!(index, layer.len());
            layer.push(value);
        }
    }

    /// Stores `value` in the first empty slot and returns the slot index.
    ///
    /// Only the nodes on the path from that slot to the root are recomputed.
    ///
    /// # Errors
    ///
    /// [`Error::Capacity`] when every slot is occupied (the tree is left
    /// untouched), [`Error::Validation`] when `value` is the empty-slot value.
    pub fn add_leaf(&mut self, value: FieldElement) -> Result<usize> {
        Self::check_leaf_value(&value)?;
        if self.is_full() {
            return Err(Error::Capacity {
                capacity: self.capacity(),
            });
        }

        let leaf_index = self.len();
        self.layers[0].push(value);

        let mut index = leaf_index;
        for level in 0..self.depth {
            let left = self.node_unchecked(level, index & !1);
            let right = self.node_unchecked(level, index | 1);
            let parent = self.hasher.hash2(left, right);
            index >>= 1;
            self.set_node(level + 1, index, parent);
        }

        debug!(
            "Inserted commitment at slot {} ({} of {} used)",
            leaf_index,
            self.len(),
            self.capacity()
        );
        Ok(leaf_index)
    }

    /// Recomputes every internal node from the leaf layer.
    ///
    /// Produces the same layers as a sequence of [`add_leaf`](Self::add_leaf)
    /// calls over the same leaves.
    pub fn rebuild(&mut self) {
        for level in 0..self.depth {
            let width = self.layers[level].len().div_ceil(2);
            let parents: Vec<FieldElement> = (0..width)
                .map(|j| {
                    self.hasher.hash2(
                        self.node_unchecked(level, 2 * j),
                        self.node_unchecked(level, 2 * j + 1),
                    )
                })
                .collect();
            self.layers[level + 1] = parents;
        }
    }

    /// Inclusion proof for slot `leaf_index`.
    ///
    /// Empty slots have proofs too; folding the empty value along them yields
    /// the current root.
    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.capacity() {
            return Err(Error::validation(format!(
                "leaf index {leaf_index} out of range for {} slots",
                self.capacity()
            )));
        }

        let mut index = leaf_index;
        let mut path = Vec::with_capacity(self.depth);
        for level in 0..self.depth {
            path.push(PathStep {
                sibling: self.node_unchecked(level, index ^ 1),
                is_right: index & 1 == 1,
            });
            index >>= 1;
        }

        Ok(MerkleProof { leaf_index, path })
    }

    /// Checks a proof for `leaf` against this tree's current root.
    #[must_use]
    pub fn verify_proof(&self, proof: &MerkleProof, leaf: FieldElement) -> bool {
        proof.path.len() == self.depth && proof.verify(&self.hasher, leaf, self.root())
    }

    /// Slot holding `commitment`, if registered.
    pub fn position(&self, commitment: &FieldElement) -> Option<usize> {
        self.layers[0].iter().position(|leaf| leaf == commitment)
    }
}
