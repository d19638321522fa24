use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::state::{SetId, Tile, TileKind};

/// 一局允许的最大组数。
pub const MAX_SETS: usize = 100;

const DEFAULT_FIRST_SET: u32 = 1;
const DEFAULT_LAST_SET: u32 = 12;

/// 参与本局的卡组编号区间（含两端），对应页面上的 `data-start` / `data-end`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckConfig {
    pub start: u32,
    pub end: u32,
}

impl DeckConfig {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> Result<(), DeckError> {
        if self.start == 0 {
            return Err(DeckError::ZeroSetNumber);
        }
        if self.start > self.end {
            return Err(DeckError::EmptyRange {
                start: self.start,
                end: self.end,
            });
        }
        let sets = self.set_count();
        if sets > MAX_SETS {
            return Err(DeckError::TooManySets {
                sets,
                max: MAX_SETS,
            });
        }
        Ok(())
    }

    pub fn set_count(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            ((self.end - self.start) as usize).saturating_add(1)
        }
    }

    pub fn tile_count(&self) -> usize {
        self.set_count().saturating_mul(TileKind::ALL.len())
    }

    pub fn set_ids(&self) -> impl Iterator<Item = SetId> {
        (self.start..=self.end).map(SetId)
    }
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            start: DEFAULT_FIRST_SET,
            end: DEFAULT_LAST_SET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "type")]
pub enum DeckError {
    #[error("set numbers start at 1")]
    ZeroSetNumber,
    #[error("set range {start}..={end} is empty")]
    EmptyRange { start: u32, end: u32 },
    #[error("{sets} sets requested, at most {max} allowed")]
    TooManySets { sets: usize, max: usize },
}

/// 一组三张卡牌：小数、分数、百分数各一张。
pub fn build_set(set_id: SetId) -> [Tile; 3] {
    TileKind::ALL.map(|kind| Tile::new(0, set_id, kind))
}

/// 生成洗好的网格，所有卡牌初始为翻开、未锁定。
#[instrument(skip(rng))]
pub fn build_grid<R: Rng + ?Sized>(config: &DeckConfig, rng: &mut R) -> Result<Vec<Tile>, DeckError> {
    config.validate()?;

    let mut tiles: Vec<Tile> = config.set_ids().flat_map(build_set).collect();
    tiles.shuffle(rng);
    for (position, tile) in tiles.iter_mut().enumerate() {
        tile.id = position;
    }

    debug!(sets = config.set_count(), tiles = tiles.len(), "grid built");
    Ok(tiles)
}
