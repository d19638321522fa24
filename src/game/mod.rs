//! 游戏核心逻辑模块（发牌、翻牌规则、判定、计分与计时）。

pub mod deck;
pub mod rules;
pub mod state;
pub mod timer;

pub use deck::{build_grid, build_set, DeckConfig, DeckError, MAX_SETS};
pub use rules::{
    evaluate,
    ClaimKind,
    ClaimRejection,
    ClaimResolution,
    MatchOutcome,
    RuleEngine,
    ToggleOutcome,
    ToggleRejection,
    PAIR_REWARD,
    SET_REWARD,
    WRONG_CLAIM_PENALTY,
};
pub use state::{
    GameEvent,
    GameSnapshot,
    GameState,
    IntegrityError,
    ParseSetIdError,
    SetId,
    Tile,
    TileId,
    TileKind,
    TileView,
    VISIBLE_CAP,
};
pub use timer::{ScoreTimer, TimerPhase, TimerToken, TICK_DECAY, TICK_INTERVAL_MS};
