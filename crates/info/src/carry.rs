//! Extended info held back for one observer
//!
//! When the packet ceiling defers a tracked avatar, its extended info for
//! that tick is staged into a group and queued here. Later packets send the
//! queued groups oldest first, one per avatar per packet, in the record's
//! usual extended-info slot.
//!
//! Changes made while a packet is being built only land on
//! [`ExtCarry::commit`]; an aborted packet calls [`ExtCarry::rollback`].

use bytes::BytesMut;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub(crate) struct ExtCarry {
    groups: HashMap<usize, VecDeque<BytesMut>>,
    sent: Vec<usize>,
    queued: Vec<(usize, BytesMut)>,
    discarded: Vec<usize>,
}

impl ExtCarry {
    /// Oldest group still owed for avatar `index`
    #[inline]
    pub fn front(&self, index: usize) -> Option<&[u8]> {
        self.groups.get(&index)?.front().map(|group| &group[..])
    }

    /// The front group of `index` went out in this packet
    pub fn mark_sent(&mut self, index: usize) {
        self.sent.push(index);
    }

    /// Queue `group` behind whatever `index` already owes
    pub fn queue(&mut self, index: usize, group: BytesMut) {
        self.queued.push((index, group));
    }

    /// `index` left high resolution; nothing it owed is sent any more
    pub fn discard(&mut self, index: usize) {
        self.discarded.push(index);
    }

    /// Groups waiting for a later packet
    pub fn len(&self) -> usize {
        self.groups.values().map(VecDeque::len).sum()
    }

    pub fn commit(&mut self) {
        for index in self.discarded.drain(..) {
            self.groups.remove(&index);
        }
        for index in self.sent.drain(..) {
            if let Some(queue) = self.groups.get_mut(&index) {
                queue.pop_front();
                if queue.is_empty() {
                    self.groups.remove(&index);
                }
            }
        }
        for (index, group) in self.queued.drain(..) {
            self.groups.entry(index).or_default().push_back(group);
        }
    }

    pub fn rollback(&mut self) {
        self.sent.clear();
        self.queued.clear();
        self.discarded.clear();
    }
}
