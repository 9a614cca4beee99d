//! Historic-mode teleinfo frames: information groups, their checksum and the
//! decoder assembling validated [`Frame`]s out of candidate buffers.

mod decoder;
mod group;

pub use decoder::{Decoder, MAX_FRAME_LENGTH};
pub use group::{checksum, InformationGroup, CR, LF, SP};

use crate::schema::{FieldId, FieldMask};
use chrono::{DateTime, Utc};
use std::fmt;

/// A validated frame. Every required label is present.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    infos: Vec<(FieldId, String)>,
    mask: FieldMask,
    power: u32,
    energy: u32,
    timestamp: Option<DateTime<Utc>>,
    raw: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(raw: &[u8]) -> Self {
        Self {
            seq: 0,
            infos: Vec::new(),
            mask: FieldMask::EMPTY,
            power: 0,
            energy: 0,
            timestamp: None,
            raw: raw.to_vec(),
        }
    }

    /// Insert a reading. Returns true when it replaced an earlier one.
    pub(crate) fn insert(&mut self, id: FieldId, value: String) -> bool {
        match id {
            FieldId::Papp => self.power = leading_number(&value),
            FieldId::Base => self.energy = leading_number(&value),
            _ => {}
        }
        self.mask.insert(id);
        if let Some(slot) = self.infos.iter_mut().find(|(i, _)| *i == id) {
            slot.1 = value;
            return true;
        }
        self.infos.push((id, value));
        false
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub(crate) fn stamp(&mut self, ts: DateTime<Utc>) {
        self.timestamp = Some(ts);
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Readings in the order they were first seen on the wire.
    pub fn infos(&self) -> impl Iterator<Item = (FieldId, &str)> {
        self.infos.iter().map(|(id, v)| (*id, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn value(&self, id: FieldId) -> Option<&str> {
        self.infos
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, v)| v.as_str())
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        FieldId::from_label(label).and_then(|id| self.value(id))
    }

    pub fn mask(&self) -> FieldMask {
        self.mask
    }

    /// Apparent power, VA.
    pub fn power(&self) -> u32 {
        self.power
    }

    /// Base index, Wh.
    pub fn energy(&self) -> u32 {
        self.energy
    }

    /// Set when the frame is accepted by the aggregator, not at decode time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, value) in self.infos() {
            writeln!(f, "{}:{}", id, value)?;
        }
        Ok(())
    }
}

/// Digits up to the first non-digit, like C `atoi` on an unsigned value.
fn leading_number(value: &str) -> u32 {
    value
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, d| acc.wrapping_mul(10).wrapping_add((d - b'0') as u32))
}
