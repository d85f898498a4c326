//! Point store with a coincidence layer.
//!
//! Every point gets a dense handle that is never reused. Coincident points are
//! merged with union-find: all handles stay valid and forward through their
//! parent pointer to the class representative, whose slot holds the only
//! authoritative coordinates. Subordinate slots keep their last coordinates
//! as tombstones.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{SketchError, SketchResult};

/// Stable handle of a sketch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointHandle(pub u32);

impl PointHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PointSlot {
    parent: u32,
    pos: [f64; 2],
    fixed: bool,
    /// Number of handles in the class; only meaningful on a representative.
    size: u32,
    alive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointStore {
    slots: Vec<PointSlot>,
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_point(&mut self, x: f64, y: f64, fixed: bool) -> PointHandle {
        let handle = PointHandle(self.slots.len() as u32);
        self.slots.push(PointSlot {
            parent: handle.0,
            pos: [x, y],
            fixed,
            size: 1,
            alive: true,
        });
        handle
    }

    /// Number of handles ever issued, including removed ones.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: PointHandle) -> bool {
        self.slots.get(handle.index()).is_some_and(|s| s.alive)
    }

    fn check(&self, handle: PointHandle) -> SketchResult<()> {
        if self.contains(handle) {
            Ok(())
        } else {
            Err(SketchError::UnknownPoint(handle))
        }
    }

    /// Representative lookup without path compression.
    pub fn resolve(&self, handle: PointHandle) -> SketchResult<PointHandle> {
        self.check(handle)?;
        let mut i = handle.0;
        while self.slots[i as usize].parent != i {
            i = self.slots[i as usize].parent;
        }
        Ok(PointHandle(i))
    }

    /// Representative lookup with path compression.
    pub fn find(&mut self, handle: PointHandle) -> SketchResult<PointHandle> {
        let root = self.resolve(handle)?;
        let mut i = handle.0;
        while i != root.0 {
            let next = self.slots[i as usize].parent;
            self.slots[i as usize].parent = root.0;
            i = next;
        }
        Ok(root)
    }

    pub fn is_representative(&self, handle: PointHandle) -> bool {
        self.slots
            .get(handle.index())
            .is_some_and(|s| s.alive && s.parent == handle.0)
    }

    /// Live representatives in handle order.
    pub fn representatives(&self) -> impl Iterator<Item = PointHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, s)| s.alive && s.parent as usize == *i)
            .map(|(i, _)| PointHandle(i as u32))
    }

    /// Live handles (representatives and aliases) in handle order.
    pub fn handles(&self) -> impl Iterator<Item = PointHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.alive)
            .map(|(i, _)| PointHandle(i as u32))
    }

    pub fn position(&self, handle: PointHandle) -> SketchResult<[f64; 2]> {
        let root = self.resolve(handle)?;
        Ok(self.slots[root.index()].pos)
    }

    pub fn is_fixed(&self, handle: PointHandle) -> SketchResult<bool> {
        let root = self.resolve(handle)?;
        Ok(self.slots[root.index()].fixed)
    }

    pub fn set_position(&mut self, handle: PointHandle, x: f64, y: f64) -> SketchResult<()> {
        let root = self.find(handle)?;
        let slot = &mut self.slots[root.index()];
        if slot.fixed {
            return Err(SketchError::FixedPoint(handle));
        }
        slot.pos = [x, y];
        Ok(())
    }

    /// Writes solver output to a representative. Fixed classes are left alone.
    pub(crate) fn write_solved(&mut self, rep: PointHandle, pos: [f64; 2]) {
        if let Some(slot) = self.slots.get_mut(rep.index()) {
            if slot.alive && !slot.fixed && slot.parent == rep.0 {
                slot.pos = pos;
            }
        }
    }

    /// Sets the fixed flag of the whole class.
    pub fn set_fixed(&mut self, handle: PointHandle, fixed: bool) -> SketchResult<()> {
        let root = self.find(handle)?;
        self.slots[root.index()].fixed = fixed;
        Ok(())
    }

    /// Merges the classes of `a` and `b` and returns the new representative.
    ///
    /// If exactly one class is fixed its representative wins, otherwise the
    /// lower handle does. The loser's fixed flag is OR'd into the winner.
    pub fn union(&mut self, a: PointHandle, b: PointHandle) -> SketchResult<PointHandle> {
        let ra = self.find(a)?;
        let rb = self.find(b)?;
        if ra == rb {
            return Ok(ra);
        }

        let fa = self.slots[ra.index()].fixed;
        let fb = self.slots[rb.index()].fixed;
        let (winner, loser) = match (fa, fb) {
            (true, false) => (ra, rb),
            (false, true) => (rb, ra),
            _ if ra < rb => (ra, rb),
            _ => (rb, ra),
        };

        let loser_slot = self.slots[loser.index()].clone();
        self.slots[loser.index()].parent = winner.0;
        let w = &mut self.slots[winner.index()];
        w.fixed |= loser_slot.fixed;
        w.size += loser_slot.size;
        Ok(winner)
    }

    /// Number of handles sharing the class of `handle`.
    pub fn class_size(&self, handle: PointHandle) -> SketchResult<u32> {
        let root = self.resolve(handle)?;
        Ok(self.slots[root.index()].size)
    }

    /// All live handles in the class of `handle`, in handle order.
    pub fn class_members(&self, handle: PointHandle) -> SketchResult<Vec<PointHandle>> {
        let root = self.resolve(handle)?;
        Ok(self
            .handles()
            .filter(|h| self.resolve(*h).ok() == Some(root))
            .collect())
    }

    /// Removes the whole class of `handle`. Callers check for references first.
    pub(crate) fn remove_class(&mut self, handle: PointHandle) -> SketchResult<Vec<PointHandle>> {
        let members = self.class_members(handle)?;
        for m in &members {
            self.slots[m.index()].alive = false;
        }
        Ok(members)
    }

    pub fn clear(&mut self) {
        // Handles are never reused, so removed slots stay behind as tombstones.
        for slot in &mut self.slots {
            slot.alive = false;
        }
    }
}
