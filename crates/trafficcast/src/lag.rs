//! Fixed-size sliding buffer for recursive lag feedback.

use std::collections::VecDeque;

/// Most-recent-first lag values of constant length.
///
/// Pushing a value to the front evicts the oldest value at the back, so the
/// buffer always holds exactly as many values as it was seeded with.
#[derive(Debug, Clone, PartialEq)]
pub struct LagBuffer {
    values: VecDeque<f32>,
}

impl LagBuffer {
    /// Seed the buffer; its length becomes the fixed capacity.
    pub fn new(initial: impl IntoIterator<Item = f32>) -> Self {
        Self {
            values: initial.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Insert `value` as the newest lag and return the evicted oldest one.
    pub fn push_front(&mut self, value: f32) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }
        self.values.push_front(value);
        self.values.pop_back()
    }

    pub fn front(&self) -> Option<f32> {
        self.values.front().copied()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values.iter().copied().collect()
    }
}
