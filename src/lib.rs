pub mod game;
mod logging;

use gloo_timers::callback::Interval;
use gloo_timers::future::TimeoutFuture;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::{Function, Promise};

pub use game::{
    build_grid, evaluate, ClaimKind, ClaimRejection, ClaimResolution, DeckConfig, DeckError,
    GameEvent, GameSnapshot, GameState, IntegrityError, MatchOutcome, RuleEngine, ScoreTimer,
    SetId, Tile, TileId, TileKind, TimerPhase, TimerToken, ToggleOutcome, ToggleRejection,
};

/// 预览结束、盖牌的默认延迟（毫秒）。
pub const PREVIEW_COVER_DELAY_MS: u32 = 5_163;
/// 计分计时器开始的默认延迟（毫秒），与盖牌延迟从同一时刻起算。
pub const TIMER_START_DELAY_MS: u32 = 7_000;

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
    logging::init();
}

fn to_js_error<E: Serialize + std::fmt::Display>(error: E) -> JsValue {
    to_value(&error).unwrap_or_else(|_| JsValue::from_str(&error.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(serde_to_js_error)
}

fn make_rng(seed: Option<u32>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(u64::from(seed)),
        None => SmallRng::from_entropy(),
    }
}

type SharedState = Rc<RefCell<GameState>>;
type SharedTicker = Rc<RefCell<Option<Interval>>>;
type SharedListener = Rc<RefCell<Option<Function>>>;

/// 回调可能再次调用 `set_on_change`，所以先取出回调再调用，不持有借用。
fn notify(listener: &SharedListener, snapshot: &GameSnapshot) {
    let Some(callback) = listener.borrow().clone() else {
        return;
    };
    let value = match to_value(snapshot) {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "snapshot could not be converted for the change listener");
            return;
        }
    };
    if let Err(error) = callback.call1(&JsValue::NULL, &value) {
        warn!(?error, "change listener threw");
    }
}

/// 为新凭证安排每秒一次的回调；替换掉的旧 `Interval` 在 drop 时被清除。
fn schedule_ticks(
    state: &SharedState,
    ticker: &SharedTicker,
    listener: &SharedListener,
    token: TimerToken,
) {
    let state = Rc::clone(state);
    let listener = Rc::clone(listener);
    let interval = Interval::new(game::TICK_INTERVAL_MS, move || {
        let snapshot = {
            let mut state = state.borrow_mut();
            RuleEngine::new()
                .tick(&mut state, token)
                .map(|_| state.snapshot())
        };
        if let Some(snapshot) = snapshot {
            notify(&listener, &snapshot);
        }
    });
    ticker.borrow_mut().replace(interval);
}

fn cancel_ticks(ticker: &SharedTicker) {
    ticker.borrow_mut().take();
}

/// 浏览器端持有的一局游戏：状态、计时回调与渲染通知。
#[wasm_bindgen]
pub struct GameEngine {
    state: SharedState,
    ticker: SharedTicker,
    listener: SharedListener,
    rules: RuleEngine,
    rng: SmallRng,
}

#[wasm_bindgen]
impl GameEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(start: u32, end: u32, seed: Option<u32>) -> Result<GameEngine, JsValue> {
        let mut rng = make_rng(seed);
        let state = GameState::build(DeckConfig::new(start, end), &mut rng).map_err(to_js_error)?;
        Ok(GameEngine {
            state: Rc::new(RefCell::new(state)),
            ticker: Rc::new(RefCell::new(None)),
            listener: Rc::new(RefCell::new(None)),
            rules: RuleEngine::new(),
            rng,
        })
    }

    /// 注册状态变化回调（预览结束盖牌、每次计时扣分），参数为最新快照。
    pub fn set_on_change(&mut self, callback: Option<Function>) {
        *self.listener.borrow_mut() = callback;
    }

    /// 立即盖牌并开始计时。
    pub fn start(&mut self) -> bool {
        let started = self.rules.start(&mut self.state.borrow_mut());
        let token = self.rules.start_timer(&mut self.state.borrow_mut());
        if let Some(token) = token {
            schedule_ticks(&self.state, &self.ticker, &self.listener, token);
        }
        started
    }

    /// 先展示所有卡牌，延迟后盖牌，再延迟后开始计时。
    pub fn start_with_preview(&self, cover_delay_ms: Option<u32>, timer_delay_ms: Option<u32>) -> Promise {
        let cover_delay = cover_delay_ms.unwrap_or(PREVIEW_COVER_DELAY_MS);
        let timer_delay = timer_delay_ms.unwrap_or(TIMER_START_DELAY_MS);
        let state = Rc::clone(&self.state);
        let ticker = Rc::clone(&self.ticker);
        let listener = Rc::clone(&self.listener);
        let rules = self.rules;

        future_to_promise(async move {
            TimeoutFuture::new(cover_delay).await;
            rules.start(&mut state.borrow_mut());
            let covered = state.borrow().snapshot();
            notify(&listener, &covered);

            let remaining = timer_delay.saturating_sub(cover_delay);
            if remaining > 0 {
                TimeoutFuture::new(remaining).await;
            }
            let token = rules.start_timer(&mut state.borrow_mut());
            if let Some(token) = token {
                schedule_ticks(&state, &ticker, &listener, token);
            }
            to_js(&state.borrow().snapshot())
        })
    }

    pub fn toggle(&mut self, tile_id: usize) -> Result<JsValue, JsValue> {
        let outcome = self.rules.toggle(&mut self.state.borrow_mut(), tile_id);
        to_js(&outcome)
    }

    pub fn claim_pair(&mut self) -> Result<JsValue, JsValue> {
        let resolution = self.rules.claim_pair(&mut self.state.borrow_mut());
        self.after_claim(&resolution);
        to_js(&resolution)
    }

    pub fn claim_set(&mut self) -> Result<JsValue, JsValue> {
        let resolution = self.rules.claim_set(&mut self.state.borrow_mut());
        self.after_claim(&resolution);
        to_js(&resolution)
    }

    fn after_claim(&self, resolution: &ClaimResolution) {
        if let Some(final_score) = resolution.final_score {
            cancel_ticks(&self.ticker);
            web_sys::console::log_1(&format!("NICE! Your score is {final_score}!").into());
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.state.borrow().is_game_over()
    }

    pub fn pause_timer(&mut self) -> bool {
        let paused = self.rules.pause_timer(&mut self.state.borrow_mut());
        if paused {
            cancel_ticks(&self.ticker);
        }
        paused
    }

    pub fn resume_timer(&mut self) -> bool {
        let token = self.rules.resume_timer(&mut self.state.borrow_mut());
        match token {
            Some(token) => {
                schedule_ticks(&self.state, &self.ticker, &self.listener, token);
                true
            }
            None => false,
        }
    }

    pub fn stop_timer(&mut self) -> bool {
        cancel_ticks(&self.ticker);
        self.rules.stop_timer(&mut self.state.borrow_mut())
    }

    /// 丢弃当前一局并重新发牌；进行中的预览与计时都不会再影响新的一局。
    pub fn restart(&mut self) -> Result<(), JsValue> {
        cancel_ticks(&self.ticker);
        let next = self
            .rules
            .rebuild(&self.state.borrow(), &mut self.rng)
            .map_err(to_js_error)?;
        let callback = self.listener.borrow().clone();
        self.state = Rc::new(RefCell::new(next));
        self.ticker = Rc::new(RefCell::new(None));
        self.listener = Rc::new(RefCell::new(callback));
        Ok(())
    }

    pub fn score(&self) -> f64 {
        self.state.borrow().score()
    }

    pub fn display_score(&self) -> f64 {
        self.state.borrow().display_score() as f64
    }

    pub fn final_score(&self) -> Option<f64> {
        self.state.borrow().final_score().map(|score| score as f64)
    }

    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        to_js(&self.state.borrow().snapshot())
    }

    pub fn visible_tiles(&self) -> Result<JsValue, JsValue> {
        to_js(&self.state.borrow().visible_tiles())
    }

    pub fn locked_tiles(&self) -> Result<JsValue, JsValue> {
        to_js(&self.state.borrow().locked_tiles())
    }

    pub fn events(&self) -> Result<JsValue, JsValue> {
        to_js(&self.state.borrow().events())
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&*self.state.borrow()).map_err(serde_to_js_error)
    }
}

/// 生成一副洗好的网格，方便前端调试。
#[wasm_bindgen(js_name = "buildGrid")]
pub fn build_grid_js(start: u32, end: u32, seed: Option<u32>) -> Result<JsValue, JsValue> {
    let mut rng = make_rng(seed);
    let tiles = build_grid(&DeckConfig::new(start, end), &mut rng).map_err(to_js_error)?;
    to_js(&tiles)
}

/// 判定传入的卡牌（通常是当前翻开的 0–3 张）。
#[wasm_bindgen(js_name = "evaluateTiles")]
pub fn evaluate_tiles(tiles: JsValue) -> Result<JsValue, JsValue> {
    let tiles: Vec<Tile> = from_value(tiles).map_err(JsValue::from)?;
    let refs: Vec<&Tile> = tiles.iter().collect();
    to_js(&evaluate(&refs))
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state_json: &str) -> Result<(), JsValue> {
    let state: GameState = serde_json::from_str(state_json).map_err(serde_to_js_error)?;
    state.integrity_check().map_err(|error| to_value(&error).unwrap_or(JsValue::NULL))?;
    Ok(())
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
