use super::orchestrator::CartStore;
use crate::services::pricing::LineRequest;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Cart kept in memory; adding an existing product merges quantities
#[derive(Debug, Default)]
pub struct MemoryCart {
    lines: Mutex<Vec<LineRequest>>,
}

impl MemoryCart {
    pub fn new() -> Self {
        Self::default()
    }

    fn lines(&self) -> MutexGuard<'_, Vec<LineRequest>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, product_id: Uuid, quantity: i32) {
        if quantity <= 0 {
            return;
        }
        let mut lines = self.lines();
        match lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => lines.push(LineRequest {
                product_id,
                quantity,
            }),
        }
    }

    /// Sets the quantity for a product; zero or less removes it
    pub fn set_quantity(&self, product_id: Uuid, quantity: i32) {
        let mut lines = self.lines();
        if quantity <= 0 {
            lines.retain(|l| l.product_id != product_id);
        } else if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity;
        }
    }

    pub fn len(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }
}

impl CartStore for MemoryCart {
    fn items(&self) -> Vec<LineRequest> {
        self.lines().clone()
    }

    fn clear(&self) {
        self.lines().clear();
    }
}
