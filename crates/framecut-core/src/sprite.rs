// crates/framecut-core/src/sprite.rs
//
// Sprite-sheet data types crossing the engine/host boundary.
//
// A sheet is a fixed grid of thumbnails for one source at one sampling
// interval. Generation and caching live in the engine; this is the payload
// shape the host receives in SpriteSheetReady.

use std::sync::Arc;

use uuid::Uuid;

/// Grid dimensions: every sheet holds up to `SHEET_COLS × SHEET_ROWS` sprites.
pub const SHEET_COLS: u32 = 10;
pub const SHEET_ROWS: u32 = 10;

/// Identity of one sheet: source, grid page, and sampling interval.
///
/// The interval is part of the key so grids generated at different zoom
/// levels never alias each other in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SheetId {
    pub source_id:   Uuid,
    pub sheet_index: u32,
    pub interval_us: i64,
}

/// Placement of one thumbnail inside its sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpriteRef {
    /// Source time this thumbnail depicts.
    pub time_us: i64,
    pub col:     u32,
    pub row:     u32,
}

/// One completed (or partially filled) thumbnail grid.
#[derive(Clone, Debug)]
pub struct SpriteSheet {
    pub id:       SheetId,
    /// Full sheet bitmap, tightly packed RGBA.
    pub data:     Arc<[u8]>,
    pub width:    u32,
    pub height:   u32,
    pub sprites:  Vec<SpriteRef>,
}

impl SpriteSheet {
    /// Resident size used for cache budgeting.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// The sprite covering `time_us`, if this sheet has one: the latest
    /// thumbnail at or before the requested time.
    pub fn sprite_at(&self, time_us: i64) -> Option<&SpriteRef> {
        self.sprites
            .iter()
            .filter(|s| s.time_us <= time_us)
            .max_by_key(|s| s.time_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_at_returns_latest_at_or_before() {
        let sheet = SpriteSheet {
            id: SheetId { source_id: Uuid::new_v4(), sheet_index: 0, interval_us: 1_000_000 },
            data: Arc::from(vec![0u8; 16].into_boxed_slice()),
            width: 2,
            height: 2,
            sprites: vec![
                SpriteRef { time_us: 0, col: 0, row: 0 },
                SpriteRef { time_us: 1_000_000, col: 1, row: 0 },
            ],
        };
        assert_eq!(sheet.sprite_at(500_000).unwrap().time_us, 0);
        assert_eq!(sheet.sprite_at(1_000_000).unwrap().time_us, 1_000_000);
        assert!(sheet.sprite_at(-1).is_none());
    }
}
