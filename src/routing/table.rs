use super::node::NodeRef;
use crate::id::{self, Id, IdSpace};
use std::{fmt, net::SocketAddr};

/// Finger table of a single node.
///
/// Entry `i` (1-based) approximates the owner of `(self + 2^(i-1)) mod 2^m`. Entries are only
/// eventually consistent: a stale entry makes lookups slower, never wrong, because every hop
/// re-checks ownership before answering.
pub struct FingerTable {
    this: NodeRef,
    space: IdSpace,
    fingers: Vec<NodeRef>,
}

impl FingerTable {
    /// Create a table where every entry points to ourselves.
    pub fn new(this: NodeRef, space: IdSpace) -> FingerTable {
        let fingers = vec![this; space.bits() as usize];

        FingerTable {
            this,
            space,
            fingers,
        }
    }

    /// Overwrite every entry with the given node.
    pub fn fill(&mut self, node: NodeRef) {
        for finger in &mut self.fingers {
            *finger = node;
        }
    }

    /// Overwrite the entry at the 1-based `index`. Returns false if the index is out of range.
    pub fn update(&mut self, index: usize, node: NodeRef) -> bool {
        match index.checked_sub(1).and_then(|i| self.fingers.get_mut(i)) {
            Some(finger) => {
                *finger = node;
                true
            }
            None => false,
        }
    }

    /// Point every entry whose target now falls under `successor` (or which still points at
    /// ourselves) to the new successor.
    pub fn update_for_successor(&mut self, successor: NodeRef) {
        if successor.id == self.this.id {
            return;
        }

        for index in 1..=self.fingers.len() {
            let target = self.space.finger_target(self.this.id, index);
            let finger = &mut self.fingers[index - 1];

            if finger.id == self.this.id || id::contains(self.this.id, successor.id, target) {
                *finger = successor;
            }
        }
    }

    /// Address of the closest preceding node of `target` known to this table.
    ///
    /// Scans the entries in order and returns the entry preceding the first one whose id is at or
    /// past `target` (walking clockwise from us). When the first entry already covers the target
    /// it is returned itself; when no entry does, the last entry is the closest we know.
    pub fn find(&self, target: Id) -> SocketAddr {
        for (i, finger) in self.fingers.iter().enumerate() {
            if id::contains(self.this.id, finger.id, target) {
                return self.fingers[i.saturating_sub(1)].addr;
            }
        }

        // `fingers` has `bits` entries and `bits >= 1`.
        self.fingers[self.fingers.len() - 1].addr
    }

    /// `(index, target, cached address)` for every slot, in table order.
    pub fn refresh(&self) -> Vec<(usize, Id, SocketAddr)> {
        self.fingers
            .iter()
            .enumerate()
            .map(|(i, finger)| {
                let index = i + 1;
                (
                    index,
                    self.space.finger_target(self.this.id, index),
                    finger.addr,
                )
            })
            .collect()
    }

    /// The 1-based slot whose refresh target is `target`, if any.
    pub fn index_for_target(&self, target: Id) -> Option<usize> {
        (1..=self.fingers.len()).find(|index| self.space.finger_target(self.this.id, *index) == target)
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&NodeRef> {
        self.fingers.get(index.checked_sub(1)?)
    }

    pub fn entries(&self) -> &[NodeRef] {
        &self.fingers
    }
}

impl fmt::Display for FingerTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;

        for (i, finger) in self.fingers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", finger.id)?;
        }

        write!(f, "]")
    }
}
