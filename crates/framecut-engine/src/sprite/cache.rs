// crates/framecut-engine/src/sprite/cache.rs
//
// Byte-budgeted LRU cache of finished sprite sheets.
//
// The budget is enforced before a sheet is admitted: least-recently-used
// sheets are evicted until the newcomer fits. Eviction drops the bitmap —
// the Arc'd pixels are freed as soon as the host lets go of its copy.

use lru::LruCache;
use tracing::debug;
use uuid::Uuid;

use framecut_core::sprite::{SheetId, SpriteSheet};

use crate::error::EngineError;

pub struct SpriteCache {
    sheets:       LruCache<SheetId, SpriteSheet>,
    total_bytes:  usize,
    budget_bytes: usize,
}

impl SpriteCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            sheets: LruCache::unbounded(),
            total_bytes: 0,
            budget_bytes,
        }
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Fetch a sheet and mark it most-recently-used.
    pub fn get(&mut self, id: &SheetId) -> Option<&SpriteSheet> {
        self.sheets.get(id)
    }

    /// Admit a sheet, evicting LRU entries until it fits. Fails recoverably
    /// when the sheet alone exceeds the whole budget.
    pub fn insert(&mut self, sheet: SpriteSheet) -> Result<(), EngineError> {
        let size = sheet.size_bytes();
        if size > self.budget_bytes {
            return Err(EngineError::CacheBudgetExhausted {
                needed: size,
                budget: self.budget_bytes,
            });
        }
        // Replacing an existing sheet releases its bytes first.
        if let Some(old) = self.sheets.pop(&sheet.id) {
            self.total_bytes -= old.size_bytes();
        }
        while self.total_bytes + size > self.budget_bytes {
            match self.sheets.pop_lru() {
                Some((id, evicted)) => {
                    self.total_bytes -= evicted.size_bytes();
                    debug!(?id, freed = evicted.size_bytes(), "evicted sprite sheet");
                }
                None => break,
            }
        }
        self.total_bytes += size;
        self.sheets.put(sheet.id, sheet);
        Ok(())
    }

    /// Drop every sheet belonging to `source_id` (source removed).
    pub fn remove_source(&mut self, source_id: Uuid) {
        let doomed: Vec<SheetId> = self
            .sheets
            .iter()
            .filter(|(id, _)| id.source_id == source_id)
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            if let Some(sheet) = self.sheets.pop(&id) {
                self.total_bytes -= sheet.size_bytes();
            }
        }
    }
}
