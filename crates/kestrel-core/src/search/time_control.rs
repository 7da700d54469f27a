//! Time allocation for clock-based searches.

use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use chess::Color;

use crate::search::limits::SearchLimits;
use crate::search::options::SearchOptions;
use crate::types::{Depth, Value};

/// Safety buffer in milliseconds kept on top of the move overhead.
const TIME_BUFFER_MS: u64 = 10;

/// Allotment granted to a fixed movetime too small to finish any iteration.
const MIN_ALLOTMENT_MS: u64 = 10;

/// Moves assumed until the next time control when the GUI does not say.
const MOVE_HORIZON: u32 = 50;

/// Largest share of the remaining time the maximum may take over the optimum.
const MAX_RATIO: f64 = 7.0;

/// Share of the time budgeted for later moves that the maximum may steal.
const STEAL_RATIO: f64 = 0.33;

// Move importance curve over game ply.
const X_SCALE: f64 = 7.64;
const X_SHIFT: f64 = 58.4;
const SKEW: f64 = 0.183;

/// Fraction of the unstable-adjusted optimum after which no new iteration starts.
const AVAILABLE_RATIO: f64 = 0.76;

/// Depth before which score drops are treated as noise.
const MIN_STABILITY_CHECK_DEPTH: Depth = 5;

/// Score drop (in centipawns) between iterations that buys extra time.
const SCORE_DROP_THRESHOLD: i32 = 30;

/// Additional time granted on a score drop (fraction of the optimum).
const EXTENSION_RATIO: f64 = 0.5;

/// Maximum number of incremental time extensions allowed per move.
const MAX_EXTENSION_STEPS: u8 = 3;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TimeType {
    Optimum,
    Max,
}

/// Relative weight of the move played at `ply`. Peaks in the middlegame and
/// decays towards simple endgames.
fn move_importance(ply: u32) -> f64 {
    (1.0 + ((ply as f64 - X_SHIFT) / X_SCALE).exp()).powf(-SKEW) + f64::MIN_POSITIVE
}

/// Share of `my_time` for this move assuming `moves_to_go` moves remain.
fn remaining(my_time: u64, moves_to_go: u32, ply: u32, slow_mover: u64, kind: TimeType) -> u64 {
    let (max_ratio, steal_ratio) = match kind {
        TimeType::Optimum => (1.0, 0.0),
        TimeType::Max => (MAX_RATIO, STEAL_RATIO),
    };

    let this_move = move_importance(ply) * slow_mover as f64 / 100.0;
    let other_moves: f64 = (1..moves_to_go)
        .map(|i| move_importance(ply + 2 * i))
        .sum();

    let ratio1 = (max_ratio * this_move) / (max_ratio * this_move + other_moves);
    let ratio2 = (this_move + steal_ratio * other_moves) / (this_move + other_moves);

    (my_time as f64 * ratio1.min(ratio2)) as u64
}

/// Manages time allocation and tracking during search.
///
/// One instance lives for the whole game. `init` recomputes the allotment
/// at the start of every search; the node budget of "nodes as time" mode
/// and the new-game flag carry over between searches.
#[derive(Debug)]
pub struct TimeManager {
    start_time: Mutex<Instant>,

    /// Target think time. May be exceeded while the best move is unstable.
    optimum_ms: AtomicU64,

    /// Ceiling never exceeded except by the node in flight.
    maximum_ms: AtomicU64,

    /// Time added to the optimum by score-drop extensions this move.
    time_added_ms: AtomicU64,

    /// Number of extension steps already applied this move.
    extension_steps: AtomicU8,

    /// `1 + best move changes`, stored as `f64` bits.
    unstable_pv_factor: AtomicU64,

    /// Previous iteration's score (for detecting score drops).
    prev_score: Mutex<Option<Value>>,

    /// Nodes per millisecond when elapsed time is measured in nodes.
    npmsec: AtomicU64,

    /// Remaining node budget in "nodes as time" mode.
    available_nodes: AtomicU64,

    new_game: AtomicBool,
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeManager {
    pub fn new() -> Self {
        TimeManager {
            start_time: Mutex::new(Instant::now()),
            optimum_ms: AtomicU64::new(u64::MAX),
            maximum_ms: AtomicU64::new(u64::MAX),
            time_added_ms: AtomicU64::new(0),
            extension_steps: AtomicU8::new(0),
            unstable_pv_factor: AtomicU64::new(1.0f64.to_bits()),
            prev_score: Mutex::new(None),
            npmsec: AtomicU64::new(0),
            available_nodes: AtomicU64::new(0),
            new_game: AtomicBool::new(true),
        }
    }

    /// Computes the optimum and maximum for the coming search.
    ///
    /// In "nodes as time" mode every quantity below is expressed in nodes:
    /// the clock becomes the node budget and the increment is scaled by
    /// `limits.npmsec`.
    pub fn init(&self, limits: &SearchLimits, us: Color, ply: u32, options: &SearchOptions) {
        *self
            .start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = limits.start_time;
        self.time_added_ms.store(0, Ordering::Relaxed);
        self.extension_steps.store(0, Ordering::Relaxed);
        self.unstable_pv_factor
            .store(1.0f64.to_bits(), Ordering::Relaxed);
        *self
            .prev_score
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let npmsec = if limits.use_time_management() {
            limits.npmsec
        } else {
            0
        };
        self.npmsec.store(npmsec, Ordering::Relaxed);

        let (optimum, maximum) = if limits.use_time_management() {
            let mut time = limits.time_left(us);
            let mut inc = limits.increment(us);
            let mut overhead = options.move_overhead;
            let mut min_thinking = options.min_thinking_time;
            if npmsec > 0 {
                if self.available_nodes.load(Ordering::Relaxed) == 0 {
                    self.available_nodes.store(npmsec * time, Ordering::Relaxed);
                }
                time = self.available_nodes.load(Ordering::Relaxed);
                inc *= npmsec;
                overhead *= npmsec;
                min_thinking *= npmsec;
            }
            Self::allocate(
                limits.moves_to_go,
                time,
                inc,
                overhead,
                min_thinking,
                ply,
                options,
            )
        } else if let Some(movetime) = limits.movetime {
            let t = movetime
                .saturating_sub(options.move_overhead)
                .max(MIN_ALLOTMENT_MS);
            (t, t)
        } else {
            (u64::MAX, u64::MAX)
        };

        self.optimum_ms.store(optimum, Ordering::Relaxed);
        self.maximum_ms.store(maximum, Ordering::Relaxed);

        if is_debug_enabled() {
            eprintln!(
                "[TimeManager] Init: us={:?}, ply={}, time={}ms, inc={}ms, mtg={}, npmsec={}, optimum={}, maximum={}",
                us,
                ply,
                limits.time_left(us),
                limits.increment(us),
                limits.moves_to_go,
                npmsec,
                optimum,
                maximum
            );
        }
        log::debug!("time allotment: optimum={optimum} maximum={maximum}");
    }

    /// Minimum over every hypothetical number of moves to go of the per-move
    /// share, then clamped under the remaining time less the safety margin.
    fn allocate(
        moves_to_go: u32,
        time: u64,
        inc: u64,
        overhead: u64,
        min_thinking: u64,
        ply: u32,
        options: &SearchOptions,
    ) -> (u64, u64) {
        let hard_limit = time.saturating_sub(overhead + TIME_BUFFER_MS);

        let mut optimum = time.max(min_thinking);
        let mut maximum = optimum;

        let max_mtg = if moves_to_go > 0 {
            moves_to_go.min(MOVE_HORIZON)
        } else {
            MOVE_HORIZON
        };

        for hyp_mtg in 1..=max_mtg {
            let hyp_time = (time + inc * (hyp_mtg as u64 - 1))
                .saturating_sub(overhead * (2 + hyp_mtg.min(40) as u64));

            let t1 = min_thinking
                + remaining(
                    hyp_time,
                    hyp_mtg,
                    ply,
                    options.slow_mover,
                    TimeType::Optimum,
                );
            let t2 =
                min_thinking + remaining(hyp_time, hyp_mtg, ply, options.slow_mover, TimeType::Max);

            optimum = optimum.min(t1);
            maximum = maximum.min(t2);
        }

        if options.ponder {
            optimum += optimum / 4;
        }

        let maximum = maximum.min(hard_limit);
        (optimum.min(maximum), maximum)
    }

    /// Wall-clock milliseconds since the search started.
    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            .as_millis() as u64
    }

    /// Elapsed "time": nodes searched in "nodes as time" mode, wall-clock
    /// milliseconds otherwise.
    #[inline]
    pub fn elapsed(&self, nodes: u64) -> u64 {
        if self.npmsec.load(Ordering::Relaxed) > 0 {
            nodes
        } else {
            self.elapsed_ms()
        }
    }

    #[inline]
    pub fn optimum(&self) -> u64 {
        self.optimum_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn maximum(&self) -> u64 {
        self.maximum_ms.load(Ordering::Relaxed)
    }

    /// Node budget left in "nodes as time" mode.
    #[inline]
    pub fn available_nodes(&self) -> u64 {
        self.available_nodes.load(Ordering::Relaxed)
    }

    /// Time the driver may spend before starting no further iteration.
    pub fn available(&self) -> u64 {
        let optimum = self.optimum();
        if optimum == u64::MAX {
            return u64::MAX;
        }
        let factor = f64::from_bits(self.unstable_pv_factor.load(Ordering::Relaxed));
        let base = optimum + self.time_added_ms.load(Ordering::Relaxed);
        ((base as f64 * factor * AVAILABLE_RATIO) as u64).min(self.maximum())
    }

    /// Records how often the best move changed over recent iterations.
    pub fn pv_instability(&self, best_move_changes: f64) {
        let factor = if self.is_new_game() { 1.0 } else { 1.0 + best_move_changes };
        self.unstable_pv_factor
            .store(factor.to_bits(), Ordering::Relaxed);
    }

    /// Attempts to extend the optimum when the score dropped sharply since
    /// the previous iteration.
    pub fn try_extend_time(&self, current_score: Value, depth: Depth) -> bool {
        let prev = self
            .prev_score
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(current_score);

        if self.is_new_game() || depth < MIN_STABILITY_CHECK_DEPTH {
            return false;
        }
        let Some(prev) = prev else {
            return false;
        };
        if current_score >= prev - SCORE_DROP_THRESHOLD {
            return false;
        }

        let used_steps = self.extension_steps.load(Ordering::Relaxed);
        if used_steps >= MAX_EXTENSION_STEPS {
            return false;
        }

        let optimum = self.optimum();
        let headroom = self.maximum().saturating_sub(optimum);
        let target = ((optimum as f64 * EXTENSION_RATIO) as u64).min(headroom);
        let added = self.time_added_ms.load(Ordering::Relaxed);
        if added >= target {
            return false;
        }

        let remaining_steps = (MAX_EXTENSION_STEPS - used_steps) as u64;
        let step = (target - added).div_ceil(remaining_steps);
        let new_added = (added + step).min(target);
        self.time_added_ms.store(new_added, Ordering::Relaxed);
        self.extension_steps.fetch_add(1, Ordering::Release);

        if is_debug_enabled() {
            eprintln!(
                "[TimeManager] Time extended (score_drop, step {}/{}): {} -> {}, added={}ms",
                used_steps + 1,
                MAX_EXTENSION_STEPS,
                prev,
                current_score,
                new_added
            );
        }
        true
    }

    /// True once the hard ceiling has been reached.
    #[inline]
    pub fn is_time_up(&self, nodes: u64) -> bool {
        let maximum = self.maximum();
        maximum != u64::MAX && self.elapsed(nodes) >= maximum
    }

    /// Called when a new game starts: forget the node budget and suppress
    /// heuristics that compare with the previous move's search.
    pub fn new_game(&self) {
        self.available_nodes.store(0, Ordering::Relaxed);
        self.new_game.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_new_game(&self) -> bool {
        self.new_game.load(Ordering::Relaxed)
    }

    /// Books the nodes just spent against the node budget and ends the
    /// first-move grace of a new game.
    pub fn finish_search(&self, limits: &SearchLimits, us: Color, nodes: u64) {
        let npmsec = self.npmsec.load(Ordering::Relaxed);
        if npmsec > 0 {
            let budget = self.available_nodes() + limits.increment(us) * npmsec;
            self.available_nodes
                .store(budget.saturating_sub(nodes), Ordering::Relaxed);
        }
        self.new_game.store(false, Ordering::Relaxed);
    }
}

fn is_debug_enabled() -> bool {
    static DEBUG: OnceLock<bool> = OnceLock::new();
    *DEBUG.get_or_init(|| {
        let env_var = std::env::var("KESTREL_DEBUG_TIME").unwrap_or_default();
        env_var == "1" || env_var.to_lowercase() == "true"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(time: u64, inc: u64) -> SearchLimits {
        SearchLimits {
            time: [time, time],
            inc: [inc, inc],
            ..Default::default()
        }
    }

    /// Importance is highest early and decays late in the game.
    #[test]
    fn test_move_importance_curve() {
        assert!(move_importance(20) > move_importance(100));
        assert!(move_importance(100) > move_importance(200));
    }

    /// optimum <= maximum <= remaining - margin for a range of clocks.
    #[test]
    fn test_allocation_bounds() {
        let options = SearchOptions::default();
        for &time in &[50u64, 500, 5_000, 60_000, 600_000] {
            for &inc in &[0u64, 100, 2_000] {
                for &ply in &[0u32, 30, 80, 160] {
                    let tm = TimeManager::new();
                    tm.init(&clock(time, inc), Color::White, ply, &options);
                    let margin = options.move_overhead + TIME_BUFFER_MS;
                    assert!(
                        tm.optimum() <= tm.maximum(),
                        "time={time} inc={inc} ply={ply}"
                    );
                    assert!(
                        tm.maximum() <= time.saturating_sub(margin),
                        "time={time} inc={inc} ply={ply}"
                    );
                }
            }
        }
    }

    /// More moves to go means a smaller share for this move.
    #[test]
    fn test_moves_to_go() {
        let options = SearchOptions::default();
        let tm = TimeManager::new();
        let mut limits = clock(60_000, 0);
        limits.moves_to_go = 2;
        tm.init(&limits, Color::Black, 40, &options);
        let few = tm.optimum();

        limits.moves_to_go = 40;
        tm.init(&limits, Color::Black, 40, &options);
        assert!(tm.optimum() < few);
    }

    /// A movetime of zero still gets the minimum allotment.
    #[test]
    fn test_movetime_floor() {
        let tm = TimeManager::new();
        tm.init(
            &SearchLimits::with_movetime(0),
            Color::White,
            0,
            &SearchOptions::default(),
        );
        assert_eq!(tm.optimum(), MIN_ALLOTMENT_MS);
        assert_eq!(tm.maximum(), MIN_ALLOTMENT_MS);
    }

    /// Without any limit the allotment is unbounded.
    #[test]
    fn test_infinite_is_unbounded() {
        let tm = TimeManager::new();
        tm.init(
            &SearchLimits::infinite(),
            Color::White,
            0,
            &SearchOptions::default(),
        );
        assert_eq!(tm.maximum(), u64::MAX);
        assert_eq!(tm.available(), u64::MAX);
        assert!(!tm.is_time_up(u64::MAX));
    }

    /// In nodes-as-time mode elapsed is the node count and the budget shrinks.
    #[test]
    fn test_nodes_as_time() {
        let options = SearchOptions::default();
        let tm = TimeManager::new();
        let mut limits = clock(10_000, 0);
        limits.npmsec = 100;
        tm.init(&limits, Color::White, 0, &options);
        assert_eq!(tm.available_nodes(), 1_000_000);
        assert_eq!(tm.elapsed(12_345), 12_345);
        assert!(tm.maximum() <= 1_000_000);

        tm.finish_search(&limits, Color::White, 200_000);
        assert_eq!(tm.available_nodes(), 800_000);

        tm.new_game();
        assert_eq!(tm.available_nodes(), 0);
    }

    /// The node rate comes from the limits; the option alone does not switch modes.
    #[test]
    fn test_npmsec_from_limits() {
        let options = SearchOptions::default().with_nodestime(100);
        let tm = TimeManager::new();
        let limits = clock(10_000, 0);
        tm.init(&limits, Color::White, 0, &options);
        assert_eq!(tm.available_nodes(), 0);
        assert!(tm.maximum() <= 10_000);

        let mut limits = clock(10_000, 0);
        limits.npmsec = 10;
        tm.init(&limits, Color::White, 0, &SearchOptions::default());
        assert_eq!(tm.available_nodes(), 100_000);
    }

    /// A sharp score drop extends the optimum in bounded steps.
    #[test]
    fn test_score_drop_extension() {
        let options = SearchOptions::default();
        let tm = TimeManager::new();
        let limits = clock(60_000, 0);
        tm.init(&limits, Color::White, 20, &options);
        tm.finish_search(&limits, Color::White, 0);
        tm.init(&limits, Color::White, 22, &options);
        let before = tm.available();

        assert!(!tm.try_extend_time(Value::new(50), 6));
        assert!(tm.try_extend_time(Value::new(-50), 7));
        assert!(tm.available() > before);

        let mut steps = 1;
        let mut score = -50;
        while score > -1000 {
            score -= 100;
            if tm.try_extend_time(Value::new(score), 8) {
                steps += 1;
            }
        }
        assert!(steps <= MAX_EXTENSION_STEPS);
        assert!(tm.available() <= tm.maximum());
    }

    /// The first move of a game ignores instability.
    #[test]
    fn test_new_game_suppresses_instability() {
        let options = SearchOptions::default();
        let tm = TimeManager::new();
        let limits = clock(60_000, 0);
        tm.init(&limits, Color::White, 0, &options);
        let before = tm.available();
        tm.pv_instability(2.0);
        assert_eq!(tm.available(), before);

        tm.finish_search(&limits, Color::White, 0);
        tm.init(&limits, Color::White, 2, &options);
        let before = tm.available();
        tm.pv_instability(2.0);
        assert!(tm.available() > before);
    }
}
