//! Endpoint rotation pool.
//!
//! Each endpoint is handed out `threshold` times in a row before the active
//! index advances to the next one. Selection is deterministic.

use tracing::debug;

use super::error::RelayError;
use crate::metrics;

/// One endpoint and its allocation counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSlot {
    pub endpoint: String,
    pub use_count: u32,
}

/// Round-robin pool of rate-limited endpoints.
#[derive(Debug)]
pub struct EndpointPool {
    slots: Vec<RotationSlot>,
    index: usize,
    threshold: u32,
    reserved: Vec<String>,
}

impl EndpointPool {
    /// Creates a pool. A zero threshold is treated as one.
    pub fn new(endpoints: Vec<String>, threshold: u32) -> Self {
        Self {
            slots: endpoints
                .into_iter()
                .map(|endpoint| RotationSlot {
                    endpoint,
                    use_count: 0,
                })
                .collect(),
            index: 0,
            threshold: threshold.max(1),
            reserved: Vec::new(),
        }
    }

    /// Hands out the active endpoint and counts the use.
    pub fn acquire(&mut self) -> Result<String, RelayError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(self.index)
            .ok_or(RelayError::NoEndpoints)?;

        slot.use_count += 1;
        let endpoint = slot.endpoint.clone();

        if slot.use_count >= self.threshold {
            slot.use_count = 0;
            self.index = (self.index + 1) % len;
            metrics::ENDPOINT_ROTATIONS.inc();
            debug!("Rotated relay endpoint to index {}", self.index);
        }

        Ok(endpoint)
    }

    /// Whether any endpoint can be handed out.
    pub fn has_capacity(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Takes the head endpoint out of rotation until it is released.
    pub fn reserve(&mut self) -> Option<String> {
        if self.slots.is_empty() {
            return None;
        }

        let slot = self.slots.remove(0);
        if self.index > 0 {
            self.index -= 1;
        } else if let Some(next) = self.slots.first_mut() {
            // The active slot left; its successor starts fresh.
            next.use_count = 0;
        }
        if self.index >= self.slots.len() {
            self.index = 0;
        }

        self.reserved.push(slot.endpoint.clone());
        Some(slot.endpoint)
    }

    /// Returns a reserved endpoint to the back of the rotation.
    /// Endpoints that were not reserved are ignored.
    pub fn release(&mut self, endpoint: &str) -> bool {
        match self.reserved.iter().position(|e| e == endpoint) {
            Some(pos) => {
                let endpoint = self.reserved.remove(pos);
                self.slots.push(RotationSlot {
                    endpoint,
                    use_count: 0,
                });
                true
            }
            None => false,
        }
    }

    /// Index of the slot the next `acquire` will use.
    pub fn active_index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[RotationSlot] {
        &self.slots
    }
}
