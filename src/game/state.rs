use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::deck::{build_grid, DeckConfig, DeckError};
use super::rules::{ClaimKind, MatchOutcome};
use super::timer::{ScoreTimer, TimerPhase};

/// 同时翻开（且未锁定）的卡牌上限。
pub const VISIBLE_CAP: usize = 3;

const CARD_BACK_ASSET: &str = "cardback.png";
const EMPTY_BACK_ASSET: &str = "empty.png";

/// 卡牌在网格中的位置。
pub type TileId = usize;

/// 卡组编号，显示为 `set01`、`set02` ……
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(into = "String", try_from = "String")]
pub struct SetId(pub u32);

impl SetId {
    pub fn number(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set{:02}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid set id {0:?}, expected e.g. \"set01\"")]
pub struct ParseSetIdError(String);

impl FromStr for SetId {
    type Err = ParseSetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("set")
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .map(SetId)
            .ok_or_else(|| ParseSetIdError(s.to_owned()))
    }
}

impl From<SetId> for String {
    fn from(id: SetId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for SetId {
    type Error = ParseSetIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TileKind {
    Decimal,
    Fraction,
    Percent,
}

impl TileKind {
    pub const ALL: [TileKind; 3] = [TileKind::Decimal, TileKind::Fraction, TileKind::Percent];

    fn asset_code(self) -> char {
        match self {
            TileKind::Decimal => 'd',
            TileKind::Fraction => 'f',
            TileKind::Percent => 'p',
        }
    }

    /// 从资源文件名推断卡牌类型，例如 `flip/flipf03.svg` → 分数。
    pub fn from_asset(path: &str) -> Option<Self> {
        if path.contains("flipf") {
            Some(TileKind::Fraction)
        } else if path.contains("flipp") {
            Some(TileKind::Percent)
        } else if path.contains("flipd") {
            Some(TileKind::Decimal)
        } else {
            None
        }
    }
}

/// 网格中的一张卡牌。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tile {
    pub id: TileId,
    pub set_id: SetId,
    pub kind: TileKind,
    #[serde(default)]
    covered: bool,
    #[serde(default)]
    locked: bool,
}

impl Tile {
    pub fn new(id: TileId, set_id: SetId, kind: TileKind) -> Self {
        Self {
            id,
            set_id,
            kind,
            covered: false,
            locked: false,
        }
    }

    pub fn is_covered(&self) -> bool {
        self.covered
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// 翻开且仍在游戏中的卡牌才计入上限。
    pub fn is_visible(&self) -> bool {
        !self.covered && !self.locked
    }

    pub fn face_asset(&self) -> String {
        format!("flip/flip{}{:02}.svg", self.kind.asset_code(), self.set_id.0)
    }

    pub fn back_asset(&self) -> &'static str {
        if self.locked {
            EMPTY_BACK_ASSET
        } else {
            CARD_BACK_ASSET
        }
    }

    pub(crate) fn set_covered(&mut self, covered: bool) {
        if !self.locked {
            self.covered = covered;
        }
    }

    pub(crate) fn lock(&mut self) {
        self.covered = true;
        self.locked = true;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GameEvent {
    GridBuilt {
        sets: usize,
        tiles: usize,
    },
    GameStarted,
    TileUncovered {
        tile_id: TileId,
    },
    TileCovered {
        tile_id: TileId,
    },
    ClaimResolved {
        kind: ClaimKind,
        outcome: MatchOutcome,
        accepted: bool,
    },
    TilesLocked {
        set_id: SetId,
        tile_ids: Vec<TileId>,
    },
    ScoreChanged {
        delta: f64,
        score: f64,
    },
    TimerStarted,
    TimerPaused,
    TimerResumed,
    TimerStopped,
    GameFinished {
        final_score: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    MisplacedTile { index: usize, tile_id: TileId },
    LockedTileUncovered { tile_id: TileId },
    VisibleCapExceeded { visible: usize, cap: usize },
    IncompleteSet { set_id: SetId, tiles: usize },
    DuplicateKind { set_id: SetId, kind: TileKind },
    PartiallyLockedSet { set_id: SetId },
    TimerOutlivedGame,
}

/// 渲染层使用的卡牌视图。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TileView {
    pub id: TileId,
    pub set_id: SetId,
    pub kind: TileKind,
    pub covered: bool,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<String>,
    pub back: &'static str,
}

impl From<&Tile> for TileView {
    fn from(tile: &Tile) -> Self {
        Self {
            id: tile.id,
            set_id: tile.set_id,
            kind: tile.kind,
            covered: tile.covered,
            locked: tile.locked,
            face: (!tile.covered).then(|| tile.face_asset()),
            back: tile.back_asset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GameSnapshot {
    pub score: f64,
    pub display_score: i64,
    pub started: bool,
    pub paused: bool,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<i64>,
    pub timer: TimerPhase,
    pub tiles: Vec<TileView>,
}

/// 一局游戏的全部状态：网格、分数、计时器与事件流。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    config: DeckConfig,
    tiles: Vec<Tile>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    started: bool,
    #[serde(default)]
    timer: ScoreTimer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    event_log: Vec<GameEvent>,
}

impl GameState {
    pub fn build<R: Rng + ?Sized>(config: DeckConfig, rng: &mut R) -> Result<Self, DeckError> {
        let tiles = build_grid(&config, rng)?;
        let mut state = Self {
            config,
            tiles,
            score: 0.0,
            started: false,
            timer: ScoreTimer::new(),
            final_score: None,
            event_log: Vec::new(),
        };
        state.record_event(GameEvent::GridBuilt {
            sets: config.set_count(),
            tiles: state.tiles.len(),
        });
        Ok(state)
    }

    pub fn seeded(config: DeckConfig, seed: u64) -> Result<Self, DeckError> {
        let mut rng = SmallRng::seed_from_u64(seed);
        Self::build(config, &mut rng)
    }

    pub fn config(&self) -> DeckConfig {
        self.config
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id)
    }

    pub(crate) fn tile_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.tiles.get_mut(id)
    }

    pub fn tiles_of_set(&self, set_id: SetId) -> impl Iterator<Item = &Tile> + '_ {
        self.tiles.iter().filter(move |tile| tile.set_id == set_id)
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// 界面显示的分数（向下取整，可以为负）。
    pub fn display_score(&self) -> i64 {
        self.score.floor() as i64
    }

    pub fn final_score(&self) -> Option<i64> {
        self.final_score
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.timer.is_paused()
    }

    pub fn is_finished(&self) -> bool {
        self.final_score.is_some()
    }

    pub fn is_game_over(&self) -> bool {
        self.is_finished()
    }

    pub fn timer(&self) -> &ScoreTimer {
        &self.timer
    }

    pub(crate) fn timer_mut(&mut self) -> &mut ScoreTimer {
        &mut self.timer
    }

    pub fn visible_tiles(&self) -> Vec<&Tile> {
        self.tiles.iter().filter(|tile| tile.is_visible()).collect()
    }

    pub fn visible_ids(&self) -> Vec<TileId> {
        self.tiles
            .iter()
            .filter(|tile| tile.is_visible())
            .map(|tile| tile.id)
            .collect()
    }

    pub fn visible_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.is_visible()).count()
    }

    pub fn locked_tiles(&self) -> Vec<&Tile> {
        self.tiles.iter().filter(|tile| tile.locked).collect()
    }

    /// 是否还有一组三张都未锁定的卡牌（不论是否翻开）。
    pub fn remaining_sets_exist(&self) -> bool {
        self.unlocked_by_set().values().any(|count| *count >= 3)
    }

    fn unlocked_by_set(&self) -> BTreeMap<SetId, usize> {
        let mut groups = BTreeMap::new();
        for tile in self.tiles.iter().filter(|tile| !tile.locked) {
            *groups.entry(tile.set_id).or_insert(0) += 1;
        }
        groups
    }

    pub fn events(&self) -> &[GameEvent] {
        &self.event_log
    }

    pub fn record_event(&mut self, event: GameEvent) {
        self.event_log.push(event);
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    pub(crate) fn adjust_score(&mut self, delta: f64) {
        self.score += delta;
        self.record_event(GameEvent::ScoreChanged {
            delta,
            score: self.score,
        });
    }

    /// 进入终局：停止计时并记录最终得分（四舍五入，.5 向上）。
    pub(crate) fn finish(&mut self) -> Option<i64> {
        if self.is_finished() {
            return None;
        }
        if self.timer.stop() {
            self.record_event(GameEvent::TimerStopped);
        }
        let final_score = (self.score + 0.5).floor() as i64;
        self.final_score = Some(final_score);
        self.record_event(GameEvent::GameFinished { final_score });
        Some(final_score)
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            score: self.score,
            display_score: self.display_score(),
            started: self.started,
            paused: self.is_paused(),
            finished: self.is_finished(),
            final_score: self.final_score,
            timer: self.timer.phase(),
            tiles: self.tiles.iter().map(TileView::from).collect(),
        }
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        for (index, tile) in self.tiles.iter().enumerate() {
            if tile.id != index {
                return Err(IntegrityError::MisplacedTile {
                    index,
                    tile_id: tile.id,
                });
            }
            if tile.locked && !tile.covered {
                return Err(IntegrityError::LockedTileUncovered { tile_id: tile.id });
            }
        }

        if self.started {
            let visible = self.visible_count();
            if visible > VISIBLE_CAP {
                return Err(IntegrityError::VisibleCapExceeded {
                    visible,
                    cap: VISIBLE_CAP,
                });
            }
        }

        let mut sets: BTreeMap<SetId, Vec<&Tile>> = BTreeMap::new();
        for tile in &self.tiles {
            sets.entry(tile.set_id).or_default().push(tile);
        }
        for (set_id, members) in sets {
            if members.len() != 3 {
                return Err(IntegrityError::IncompleteSet {
                    set_id,
                    tiles: members.len(),
                });
            }
            for (position, tile) in members.iter().enumerate() {
                if members[..position].iter().any(|other| other.kind == tile.kind) {
                    return Err(IntegrityError::DuplicateKind {
                        set_id,
                        kind: tile.kind,
                    });
                }
            }
            let locked = members.iter().filter(|tile| tile.locked).count();
            if locked != 0 && locked != members.len() {
                return Err(IntegrityError::PartiallyLockedSet { set_id });
            }
        }

        if self.is_finished() && !self.timer.is_stopped() {
            return Err(IntegrityError::TimerOutlivedGame);
        }

        Ok(())
    }

    /// 以相同配置重新发牌，丢弃本局所有状态。
    pub(crate) fn rebuilt<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self, DeckError> {
        let mut next = Self::build(self.config, rng)?;
        next.timer = self.timer.successor();
        Ok(next)
    }
}
