use serde::{Deserialize, Serialize};

/// 计时器每次触发的间隔（毫秒）。
pub const TICK_INTERVAL_MS: u32 = 1_000;
/// 每次触发扣除的分数。
pub const TICK_DECAY: f64 = 1.4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

/// 调度一次计时回调时携带的凭证。
///
/// 暂停、停止或重新开始都会让旧凭证失效，因此已经排队的回调不会再扣分。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerToken {
    generation: u64,
}

/// 分数衰减计时器的状态机：`idle → running ⇄ paused → stopped`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoreTimer {
    #[serde(default)]
    phase: TimerPhase,
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    ticks: u64,
}

impl ScoreTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新的空闲计时器，其凭证不会与当前计时器的任何凭证重复。
    pub fn successor(&self) -> Self {
        Self {
            phase: TimerPhase::Idle,
            generation: self.generation + 1,
            ticks: 0,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn is_paused(&self) -> bool {
        self.phase == TimerPhase::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == TimerPhase::Stopped
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// 开始计时；已在运行时先作废旧的调度。
    ///
    /// 暂停或停止状态下返回 `None`：暂停只能由 [`ScoreTimer::resume`] 解除。
    pub fn start(&mut self) -> Option<TimerToken> {
        match self.phase {
            TimerPhase::Idle | TimerPhase::Running => Some(self.rearm()),
            TimerPhase::Paused | TimerPhase::Stopped => None,
        }
    }

    /// 已暂停或已停止时返回 `false`。
    pub fn pause(&mut self) -> bool {
        match self.phase {
            TimerPhase::Idle | TimerPhase::Running => {
                self.generation += 1;
                self.phase = TimerPhase::Paused;
                true
            }
            TimerPhase::Paused | TimerPhase::Stopped => false,
        }
    }

    pub fn resume(&mut self) -> Option<TimerToken> {
        if self.phase != TimerPhase::Paused {
            return None;
        }
        Some(self.rearm())
    }

    pub fn stop(&mut self) -> bool {
        if self.phase == TimerPhase::Stopped {
            return false;
        }
        self.generation += 1;
        self.phase = TimerPhase::Stopped;
        true
    }

    pub fn accepts(&self, token: TimerToken) -> bool {
        self.phase == TimerPhase::Running && token.generation == self.generation
    }

    /// 记录一次触发；凭证过期或计时器未运行时忽略。
    pub fn record_tick(&mut self, token: TimerToken) -> bool {
        if !self.accepts(token) {
            return false;
        }
        self.ticks += 1;
        true
    }

    fn rearm(&mut self) -> TimerToken {
        self.generation += 1;
        self.phase = TimerPhase::Running;
        TimerToken {
            generation: self.generation,
        }
    }
}
