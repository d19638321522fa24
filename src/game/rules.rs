use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    deck::DeckError,
    state::{GameEvent, GameState, SetId, Tile, TileId, VISIBLE_CAP},
    timer::{TimerToken, TICK_DECAY},
};
use rand::Rng;

pub const PAIR_REWARD: f64 = 19.0;
pub const SET_REWARD: f64 = 31.0;
pub const WRONG_CLAIM_PENALTY: f64 = 7.0;

/// 对当前翻开卡牌的判定结果。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchOutcome {
    Set,
    Pair,
    Neither,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Pair,
    Set,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ToggleRejection {
    NotStarted,
    GameFinished,
    TileNotFound { tile_id: TileId },
    TileLocked { tile_id: TileId },
    VisibleCapReached { cap: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ToggleOutcome {
    Uncovered { tile_id: TileId },
    Covered { tile_id: TileId },
    Rejected { reason: ToggleRejection },
}

impl ToggleOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ToggleOutcome::Rejected { .. })
    }
}

/// 声明未被受理的原因；这类声明不计分也不扣分。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClaimRejection {
    NotStarted,
    GameFinished,
    NotEnoughVisible { required: usize, visible: usize },
    ExactlyThreeRequired { visible: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimResolution {
    pub kind: ClaimKind,
    pub accepted: bool,
    pub outcome: MatchOutcome,
    pub score_delta: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locked: Vec<TileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<ClaimRejection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<i64>,
}

impl ClaimResolution {
    fn ignored(kind: ClaimKind, rejection: ClaimRejection) -> Self {
        Self {
            kind,
            accepted: false,
            outcome: MatchOutcome::Neither,
            score_delta: 0.0,
            locked: Vec::new(),
            rejection: Some(rejection),
            final_score: None,
        }
    }

    /// 声明被判定为错误并扣了分。
    pub fn is_penalty(&self) -> bool {
        !self.accepted && self.rejection.is_none()
    }

    pub fn is_game_over(&self) -> bool {
        self.final_score.is_some()
    }
}

/// 判定 0–3 张翻开的卡牌：三张同组为 SET，恰有两张同组为 PAIR，否则 NEITHER。
pub fn evaluate(tiles: &[&Tile]) -> MatchOutcome {
    let mut distinct: Vec<SetId> = Vec::with_capacity(VISIBLE_CAP);
    for tile in tiles {
        if !distinct.contains(&tile.set_id) {
            distinct.push(tile.set_id);
        }
    }

    match (tiles.len(), distinct.len()) {
        (3, 1) => MatchOutcome::Set,
        (3, 2) | (2, 1) => MatchOutcome::Pair,
        _ => MatchOutcome::Neither,
    }
}

/// 出现至少两次的卡组编号。
fn matched_set(tiles: &[&Tile]) -> Option<SetId> {
    tiles.iter().map(|tile| tile.set_id).find(|set_id| {
        tiles.iter().filter(|tile| tile.set_id == *set_id).count() >= 2
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    fn ensure_toggle_allowed(state: &GameState, tile_id: TileId) -> Result<&Tile, ToggleRejection> {
        if state.is_finished() {
            return Err(ToggleRejection::GameFinished);
        }
        if !state.is_started() {
            return Err(ToggleRejection::NotStarted);
        }
        let tile = state
            .tile(tile_id)
            .ok_or(ToggleRejection::TileNotFound { tile_id })?;
        if tile.is_locked() {
            return Err(ToggleRejection::TileLocked { tile_id });
        }
        Ok(tile)
    }

    fn ensure_claim_allowed(state: &GameState) -> Result<(), ClaimRejection> {
        if state.is_finished() {
            return Err(ClaimRejection::GameFinished);
        }
        if !state.is_started() {
            return Err(ClaimRejection::NotStarted);
        }
        Ok(())
    }

    /// 盖上所有卡牌并开始接受翻牌。重复调用无效果。
    pub fn start(&self, state: &mut GameState) -> bool {
        if state.is_started() || state.is_finished() {
            return false;
        }
        let ids: Vec<TileId> = state.tiles().iter().map(|tile| tile.id).collect();
        for id in ids {
            if let Some(tile) = state.tile_mut(id) {
                tile.set_covered(true);
            }
        }
        state.mark_started();
        state.record_event(GameEvent::GameStarted);
        info!(tiles = state.tiles().len(), "game started");
        true
    }

    pub fn toggle(&self, state: &mut GameState, tile_id: TileId) -> ToggleOutcome {
        let covered = match Self::ensure_toggle_allowed(state, tile_id) {
            Ok(tile) => tile.is_covered(),
            Err(reason) => {
                debug!(tile_id, ?reason, "toggle rejected");
                return ToggleOutcome::Rejected { reason };
            }
        };

        if covered && state.visible_count() >= VISIBLE_CAP {
            debug!(tile_id, "visible-tile cap reached");
            return ToggleOutcome::Rejected {
                reason: ToggleRejection::VisibleCapReached { cap: VISIBLE_CAP },
            };
        }

        if let Some(tile) = state.tile_mut(tile_id) {
            tile.set_covered(!covered);
        }
        let (event, outcome) = if covered {
            (
                GameEvent::TileUncovered { tile_id },
                ToggleOutcome::Uncovered { tile_id },
            )
        } else {
            (
                GameEvent::TileCovered { tile_id },
                ToggleOutcome::Covered { tile_id },
            )
        };
        state.record_event(event);
        debug!(tile_id, covered = !covered, "tile toggled");
        outcome
    }

    /// 声明"对子"。两张同组即成功，并自动锁定该组的第三张（无论是否翻开）。
    pub fn claim_pair(&self, state: &mut GameState) -> ClaimResolution {
        const KIND: ClaimKind = ClaimKind::Pair;
        if let Err(rejection) = Self::ensure_claim_allowed(state) {
            return ClaimResolution::ignored(KIND, rejection);
        }

        let visible = state.visible_ids();
        if visible.len() < 2 {
            return ClaimResolution::ignored(
                KIND,
                ClaimRejection::NotEnoughVisible {
                    required: 2,
                    visible: visible.len(),
                },
            );
        }

        let (outcome, matched) = {
            let tiles = state.visible_tiles();
            (evaluate(&tiles), matched_set(&tiles))
        };

        match (outcome, matched) {
            (MatchOutcome::Set, Some(set_id)) => {
                self.reward(state, KIND, outcome, set_id, visible, PAIR_REWARD)
            }
            (MatchOutcome::Pair, Some(set_id)) => {
                let to_lock: Vec<TileId> = state.tiles_of_set(set_id).map(|tile| tile.id).collect();
                self.reward(state, KIND, outcome, set_id, to_lock, PAIR_REWARD)
            }
            _ => self.penalize(state, KIND, outcome),
        }
    }

    /// 声明"成组"：必须恰好翻开三张且同组。
    pub fn claim_set(&self, state: &mut GameState) -> ClaimResolution {
        const KIND: ClaimKind = ClaimKind::Set;
        if let Err(rejection) = Self::ensure_claim_allowed(state) {
            return ClaimResolution::ignored(KIND, rejection);
        }

        let visible = state.visible_ids();
        if visible.len() != 3 {
            return ClaimResolution::ignored(
                KIND,
                ClaimRejection::ExactlyThreeRequired {
                    visible: visible.len(),
                },
            );
        }

        let (outcome, matched) = {
            let tiles = state.visible_tiles();
            (evaluate(&tiles), matched_set(&tiles))
        };

        match (outcome, matched) {
            (MatchOutcome::Set, Some(set_id)) => {
                self.reward(state, KIND, outcome, set_id, visible, SET_REWARD)
            }
            _ => self.penalize(state, KIND, outcome),
        }
    }

    fn reward(
        &self,
        state: &mut GameState,
        kind: ClaimKind,
        outcome: MatchOutcome,
        set_id: SetId,
        tile_ids: Vec<TileId>,
        amount: f64,
    ) -> ClaimResolution {
        for id in &tile_ids {
            if let Some(tile) = state.tile_mut(*id) {
                tile.lock();
            }
        }
        state.record_event(GameEvent::TilesLocked {
            set_id,
            tile_ids: tile_ids.clone(),
        });
        state.record_event(GameEvent::ClaimResolved {
            kind,
            outcome,
            accepted: true,
        });
        state.adjust_score(amount);
        info!(?kind, ?outcome, %set_id, score = state.score(), "claim accepted");

        let final_score = self.check_end(state);
        ClaimResolution {
            kind,
            accepted: true,
            outcome,
            score_delta: amount,
            locked: tile_ids,
            rejection: None,
            final_score,
        }
    }

    fn penalize(&self, state: &mut GameState, kind: ClaimKind, outcome: MatchOutcome) -> ClaimResolution {
        state.record_event(GameEvent::ClaimResolved {
            kind,
            outcome,
            accepted: false,
        });
        state.adjust_score(-WRONG_CLAIM_PENALTY);
        info!(?kind, ?outcome, score = state.score(), "wrong claim");

        ClaimResolution {
            kind,
            accepted: false,
            outcome,
            score_delta: -WRONG_CLAIM_PENALTY,
            locked: Vec::new(),
            rejection: None,
            final_score: None,
        }
    }

    /// 没有完整的组时结束游戏；只在第一次满足条件时返回最终得分。
    pub fn check_end(&self, state: &mut GameState) -> Option<i64> {
        if state.is_finished() || state.remaining_sets_exist() {
            return None;
        }
        let final_score = state.finish()?;
        info!(final_score, "game finished");
        Some(final_score)
    }

    pub fn start_timer(&self, state: &mut GameState) -> Option<TimerToken> {
        if state.is_finished() {
            return None;
        }
        let token = state.timer_mut().start()?;
        state.record_event(GameEvent::TimerStarted);
        Some(token)
    }

    pub fn pause_timer(&self, state: &mut GameState) -> bool {
        if state.is_finished() || !state.timer_mut().pause() {
            return false;
        }
        state.record_event(GameEvent::TimerPaused);
        true
    }

    pub fn resume_timer(&self, state: &mut GameState) -> Option<TimerToken> {
        if state.is_finished() {
            return None;
        }
        let token = state.timer_mut().resume()?;
        state.record_event(GameEvent::TimerResumed);
        Some(token)
    }

    pub fn stop_timer(&self, state: &mut GameState) -> bool {
        if !state.timer_mut().stop() {
            return false;
        }
        state.record_event(GameEvent::TimerStopped);
        true
    }

    /// 每秒一次的扣分。过期凭证、暂停或停止时不产生任何变化。
    pub fn tick(&self, state: &mut GameState, token: TimerToken) -> Option<f64> {
        if state.is_finished() || !state.timer_mut().record_tick(token) {
            return None;
        }
        state.adjust_score(-TICK_DECAY);
        debug!(score = state.score(), "score decayed");
        Some(state.score())
    }

    /// 丢弃当前一局，用相同区间重新发牌。
    pub fn restart<R: Rng + ?Sized>(&self, state: &mut GameState, rng: &mut R) -> Result<(), DeckError> {
        *state = self.rebuild(state, rng)?;
        Ok(())
    }

    /// 按当前配置生成下一局，不修改（也不复制）当前一局。
    pub fn rebuild<R: Rng + ?Sized>(&self, state: &GameState, rng: &mut R) -> Result<GameState, DeckError> {
        let next = state.rebuilt(rng)?;
        info!(sets = next.config().set_count(), "game restarted");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::deck::DeckConfig;
    use crate::game::state::TileKind;
    use rand::SeedableRng;

    fn started_state(start: u32, end: u32) -> GameState {
        let mut state = GameState::seeded(DeckConfig::new(start, end), 99).expect("valid range");
        assert!(RuleEngine::new().start(&mut state));
        state
    }

    fn ids_of(state: &GameState, set: u32) -> Vec<TileId> {
        state.tiles_of_set(SetId(set)).map(|tile| tile.id).collect()
    }

    fn uncover(state: &mut GameState, ids: &[TileId]) {
        let engine = RuleEngine::new();
        for id in ids {
            let outcome = engine.toggle(state, *id);
            assert_eq!(outcome, ToggleOutcome::Uncovered { tile_id: *id });
        }
    }

    #[test]
    fn evaluate_classifies_by_set_multiset() {
        let a1 = Tile::new(0, SetId(1), TileKind::Decimal);
        let a2 = Tile::new(1, SetId(1), TileKind::Fraction);
        let a3 = Tile::new(2, SetId(1), TileKind::Percent);
        let b1 = Tile::new(3, SetId(2), TileKind::Decimal);
        let c1 = Tile::new(4, SetId(3), TileKind::Decimal);

        assert_eq!(evaluate(&[&a1, &a2, &a3]), MatchOutcome::Set);
        assert_eq!(evaluate(&[&a1, &b1, &a3]), MatchOutcome::Pair);
        assert_eq!(evaluate(&[&a1, &b1, &c1]), MatchOutcome::Neither);
        assert_eq!(evaluate(&[&a1, &a2]), MatchOutcome::Pair);
        assert_eq!(evaluate(&[&a1, &b1]), MatchOutcome::Neither);
        assert_eq!(evaluate(&[&a1]), MatchOutcome::Neither);
        assert_eq!(evaluate(&[]), MatchOutcome::Neither);
    }

    #[test]
    fn toggle_is_ignored_before_start() {
        let mut state = GameState::seeded(DeckConfig::new(1, 2), 1).expect("valid range");
        let outcome = RuleEngine::new().toggle(&mut state, 0);
        assert_eq!(
            outcome,
            ToggleOutcome::Rejected {
                reason: ToggleRejection::NotStarted
            }
        );
    }

    #[test]
    fn start_covers_every_tile() {
        let state = started_state(1, 3);
        assert!(state.tiles().iter().all(|tile| tile.is_covered()));
        assert_eq!(state.visible_count(), 0);
    }

    #[test]
    fn fourth_uncover_is_blocked_but_recover_is_not() {
        let mut state = started_state(1, 3);
        let engine = RuleEngine::new();
        uncover(&mut state, &[0, 1, 2]);

        let blocked = engine.toggle(&mut state, 3);
        assert_eq!(
            blocked,
            ToggleOutcome::Rejected {
                reason: ToggleRejection::VisibleCapReached { cap: VISIBLE_CAP }
            }
        );
        assert!(state.tile(3).expect("tile 3").is_covered());

        assert_eq!(engine.toggle(&mut state, 1), ToggleOutcome::Covered { tile_id: 1 });
        assert_eq!(engine.toggle(&mut state, 3), ToggleOutcome::Uncovered { tile_id: 3 });
        assert_eq!(state.visible_count(), 3);
    }

    #[test]
    fn out_of_range_toggle_is_rejected() {
        let mut state = started_state(1, 1);
        let outcome = RuleEngine::new().toggle(&mut state, 42);
        assert_eq!(
            outcome,
            ToggleOutcome::Rejected {
                reason: ToggleRejection::TileNotFound { tile_id: 42 }
            }
        );
    }

    #[test]
    fn correct_set_claim_locks_three_and_scores() {
        let mut state = started_state(1, 2);
        let engine = RuleEngine::new();
        let set_one = ids_of(&state, 1);
        uncover(&mut state, &set_one);

        let resolution = engine.claim_set(&mut state);
        assert!(resolution.accepted);
        assert_eq!(resolution.outcome, MatchOutcome::Set);
        assert_eq!(resolution.score_delta, SET_REWARD);
        assert_eq!(state.score(), 31.0);
        for id in set_one {
            let tile = state.tile(id).expect("tile should exist");
            assert!(tile.is_locked() && tile.is_covered());
        }
        assert!(state.remaining_sets_exist());
        assert!(!state.is_finished());
    }

    #[test]
    fn pair_claim_locks_hidden_third_tile() {
        let mut state = started_state(1, 3);
        let engine = RuleEngine::new();
        let set_two = ids_of(&state, 2);
        uncover(&mut state, &set_two[..2]);
        assert!(state.tile(set_two[2]).expect("third tile").is_covered());

        let resolution = engine.claim_pair(&mut state);
        assert!(resolution.accepted);
        assert_eq!(resolution.outcome, MatchOutcome::Pair);
        assert_eq!(state.score(), PAIR_REWARD);

        let mut locked = resolution.locked.clone();
        locked.sort_unstable();
        let mut expected = set_two.clone();
        expected.sort_unstable();
        assert_eq!(locked, expected);
        for id in set_two {
            assert!(state.tile(id).expect("tile").is_locked());
        }
    }

    #[test]
    fn pair_claim_with_odd_third_leaves_it_uncovered() {
        let mut state = started_state(1, 3);
        let engine = RuleEngine::new();
        let set_one = ids_of(&state, 1);
        let odd = ids_of(&state, 3)[0];
        uncover(&mut state, &[set_one[0], odd, set_one[1]]);

        let resolution = engine.claim_pair(&mut state);
        assert!(resolution.accepted);
        assert_eq!(resolution.outcome, MatchOutcome::Pair);
        assert!(set_one.iter().all(|id| state.tile(*id).expect("tile").is_locked()));

        let odd_tile = state.tile(odd).expect("odd tile");
        assert!(!odd_tile.is_locked());
        assert!(!odd_tile.is_covered());
        assert_eq!(state.visible_ids(), vec![odd]);
    }

    #[test]
    fn pair_claim_on_full_set_scores_pair_reward() {
        let mut state = started_state(1, 2);
        let set_one = ids_of(&state, 1);
        uncover(&mut state, &set_one);

        let resolution = RuleEngine::new().claim_pair(&mut state);
        assert!(resolution.accepted);
        assert_eq!(resolution.outcome, MatchOutcome::Set);
        assert_eq!(resolution.score_delta, PAIR_REWARD);
        assert_eq!(resolution.locked.len(), 3);
    }

    #[test]
    fn set_claim_on_pair_is_penalized_without_locking() {
        let mut state = started_state(1, 3);
        let set_one = ids_of(&state, 1);
        let odd = ids_of(&state, 2)[0];
        uncover(&mut state, &[set_one[0], set_one[1], odd]);

        let resolution = RuleEngine::new().claim_set(&mut state);
        assert!(resolution.is_penalty());
        assert_eq!(resolution.outcome, MatchOutcome::Pair);
        assert_eq!(state.score(), -WRONG_CLAIM_PENALTY);
        assert!(state.locked_tiles().is_empty());
        assert_eq!(state.visible_count(), 3);
    }

    #[test]
    fn claims_without_enough_tiles_are_silent() {
        let mut state = started_state(1, 2);
        let engine = RuleEngine::new();
        let before = state.events().len();

        let pair = engine.claim_pair(&mut state);
        assert_eq!(
            pair.rejection,
            Some(ClaimRejection::NotEnoughVisible {
                required: 2,
                visible: 0
            })
        );

        let set_one = ids_of(&state, 1);
        uncover(&mut state, &set_one[..2]);
        let set = engine.claim_set(&mut state);
        assert_eq!(set.rejection, Some(ClaimRejection::ExactlyThreeRequired { visible: 2 }));
        assert_eq!(set.score_delta, 0.0);
        assert_eq!(state.score(), 0.0);
        assert_eq!(state.events().len(), before + 2, "only the two uncovers were recorded");
    }

    #[test]
    fn last_match_finishes_game_once() {
        let mut state = started_state(1, 1);
        let engine = RuleEngine::new();
        let token = engine.start_timer(&mut state).expect("timer should start");
        let set_one = ids_of(&state, 1);
        uncover(&mut state, &set_one);

        let resolution = engine.claim_set(&mut state);
        assert_eq!(resolution.final_score, Some(31));
        assert!(state.is_game_over());
        assert!(state.timer().is_stopped());
        assert_eq!(engine.tick(&mut state, token), None);
        assert_eq!(engine.check_end(&mut state), None);

        let late = engine.claim_pair(&mut state);
        assert_eq!(late.rejection, Some(ClaimRejection::GameFinished));
        state.integrity_check().expect("finished state should be consistent");
    }

    #[test]
    fn tick_decays_only_while_running() {
        let mut state = started_state(1, 2);
        let engine = RuleEngine::new();
        let token = engine.start_timer(&mut state).expect("timer should start");

        assert_eq!(engine.tick(&mut state, token), Some(-TICK_DECAY));
        assert!(engine.pause_timer(&mut state));
        assert!(!engine.pause_timer(&mut state));
        assert_eq!(engine.tick(&mut state, token), None);

        let resumed = engine.resume_timer(&mut state).expect("timer should resume");
        assert_eq!(engine.tick(&mut state, token), None);
        let score = engine.tick(&mut state, resumed).expect("resumed tick");
        assert!((score + 2.0 * TICK_DECAY).abs() < 1e-9);
    }

    #[test]
    fn restart_discards_progress_and_old_ticks() {
        let mut state = started_state(1, 2);
        let engine = RuleEngine::new();
        let token = engine.start_timer(&mut state).expect("timer should start");
        let set_one = ids_of(&state, 1);
        uncover(&mut state, &set_one);
        engine.claim_set(&mut state);

        let mut rng = rand::rngs::SmallRng::seed_from_u64(3);
        engine.restart(&mut state, &mut rng).expect("restart should succeed");

        assert_eq!(state.score(), 0.0);
        assert!(!state.is_started());
        assert!(state.locked_tiles().is_empty());
        assert_eq!(state.config(), DeckConfig::new(1, 2));

        engine.start(&mut state);
        engine.start_timer(&mut state).expect("new timer should start");
        assert_eq!(engine.tick(&mut state, token), None, "old token must stay dead");
    }

    #[test]
    fn rebuild_leaves_the_current_game_untouched() {
        let mut state = started_state(1, 2);
        let engine = RuleEngine::new();
        engine.start_timer(&mut state).expect("timer should start");
        let before = state.clone();

        let mut rng = rand::rngs::SmallRng::seed_from_u64(11);
        let next = engine.rebuild(&state, &mut rng).expect("rebuild should succeed");

        assert_eq!(state, before);
        assert!(!next.is_started());
        assert_eq!(next.timer().phase(), crate::game::timer::TimerPhase::Idle);
        assert_eq!(next.tiles().len(), 6);
    }
}
