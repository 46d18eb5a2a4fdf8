//! Pattern lifecycle: breakout lines, invalidation levels and the
//! FORMING -> CONFIRMED | FAILED | INVALIDATED state machine.

use serde::{Deserialize, Serialize};

use crate::{Bar, Direction, MarketContext, Series};

/// Lifecycle state of a detected pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatternState {
    #[default]
    Forming,
    Confirmed,
    Failed,
    Invalidated,
}

impl PatternState {
    /// Terminal states never change again
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, PatternState::Forming)
    }
}

/// Straight line over bar indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub anchor_index: usize,
    pub anchor_price: f64,
    /// Price change per bar
    pub slope: f64,
}

impl Line {
    /// Line through two points. Degenerates to horizontal when both share an index.
    pub fn through(i0: usize, p0: f64, i1: usize, p1: f64) -> Self {
        let slope = if i1 == i0 {
            0.0
        } else {
            (p1 - p0) / (i1 as f64 - i0 as f64)
        };
        Self {
            anchor_index: i0,
            anchor_price: p0,
            slope,
        }
    }

    pub fn horizontal(index: usize, price: f64) -> Self {
        Self {
            anchor_index: index,
            anchor_price: price,
            slope: 0.0,
        }
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> f64 {
        self.anchor_price + self.slope * (index as f64 - self.anchor_index as f64)
    }
}

/// Close beyond this level invalidates the pattern outright
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Invalidation {
    Above(f64),
    Below(f64),
}

impl Invalidation {
    #[inline]
    pub fn is_hit(&self, close: f64) -> bool {
        match *self {
            Invalidation::Above(level) => close > level,
            Invalidation::Below(level) => close < level,
        }
    }
}

/// Breakout lines and invalidation level of a pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    /// Closing above it breaks out upward
    pub upper: Option<Line>,
    /// Closing below it breaks out downward
    pub lower: Option<Line>,
    pub invalidation: Option<Invalidation>,
}

/// First close beyond a breakout line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
    pub index: usize,
    pub direction: Direction,
    pub close: f64,
    /// Breakout bar volume over the trailing average, if volume is known
    pub volume_ratio: Option<f64>,
}

/// Lifecycle of one pattern instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub state: PatternState,
    pub breakout: Option<Breakout>,
    /// Consecutive closes beyond the breakout line
    pub held: usize,
    /// Last bar index folded into this lifecycle
    pub last_index: usize,
}

impl Lifecycle {
    pub fn new(last_index: usize) -> Self {
        Self {
            state: PatternState::Forming,
            breakout: None,
            held: 0,
            last_index,
        }
    }

    /// Fold one bar into the lifecycle.
    ///
    /// A breakout confirms once `confirm_bars` consecutive closes stay beyond
    /// the line; falling back inside before that marks the pattern FAILED.
    /// Bars at or before `last_index` are ignored so replays are idempotent.
    pub fn advance(
        mut self,
        levels: &Levels,
        index: usize,
        bar: &Bar,
        avg_volume: f64,
        confirm_bars: usize,
    ) -> Self {
        if self.state.is_terminal() || index <= self.last_index {
            return self;
        }
        self.last_index = index;

        if levels.invalidation.is_some_and(|inv| inv.is_hit(bar.close)) {
            self.state = PatternState::Invalidated;
            return self;
        }

        match self.breakout {
            Some(breakout) => {
                if beyond(levels, breakout.direction, index, bar.close) {
                    self.held += 1;
                    if self.held >= confirm_bars {
                        self.state = PatternState::Confirmed;
                    }
                } else {
                    self.state = PatternState::Failed;
                }
            }
            None => {
                let direction = if beyond(levels, Direction::Up, index, bar.close) {
                    Direction::Up
                } else if beyond(levels, Direction::Down, index, bar.close) {
                    Direction::Down
                } else {
                    return self;
                };
                self.breakout = Some(Breakout {
                    index,
                    direction,
                    close: bar.close,
                    volume_ratio: (avg_volume > 0.0).then(|| bar.volume / avg_volume),
                });
                self.held = 1;
                if confirm_bars <= 1 {
                    self.state = PatternState::Confirmed;
                }
            }
        }
        self
    }

    /// Fold every bar after `last_index`
    pub fn replay(
        self,
        levels: &Levels,
        series: &Series,
        contexts: &[MarketContext],
        confirm_bars: usize,
    ) -> Self {
        let start = self.last_index + 1;
        series
            .bars()
            .iter()
            .enumerate()
            .skip(start)
            .fold(self, |lc, (i, bar)| {
                let avg_volume = contexts.get(i).map(|c| c.avg_volume).unwrap_or(0.0);
                lc.advance(levels, i, bar, avg_volume, confirm_bars)
            })
    }
}

fn beyond(levels: &Levels, direction: Direction, index: usize, close: f64) -> bool {
    match direction {
        Direction::Up => levels.upper.is_some_and(|l| close > l.value_at(index)),
        Direction::Down => levels.lower.is_some_and(|l| close < l.value_at(index)),
        Direction::Neutral => false,
    }
}
