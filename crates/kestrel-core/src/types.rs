//! Common score and depth types used throughout the engine.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use crate::constants::MAX_PLY;

/// Search depth in plies. Signed so that reductions can drive it below zero.
pub type Depth = i32;

/// Search score in centipawns, from the side to move's point of view.
///
/// Mate scores live at the ends of the range: a position mated in `n` plies
/// from the root scores `-(MATE - n)`, and the side delivering mate in `n`
/// plies scores `MATE - n`. [`Value::INF`] lies outside every reachable score
/// and only serves as a window bound; [`Value::NONE`] marks "no score yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Value(i32);

impl Value {
    pub const ZERO: Self = Self(0);
    pub const DRAW: Self = Self(0);
    pub const KNOWN_WIN: Self = Self(10_000);
    pub const MATE: Self = Self(32_000);
    pub const INF: Self = Self(32_001);
    pub const NONE: Self = Self(32_002);

    pub const MATE_IN_MAX_PLY: Self = Self(Self::MATE.0 - MAX_PLY as i32);
    pub const MATED_IN_MAX_PLY: Self = Self(-Self::MATE.0 + MAX_PLY as i32);

    /// Creates a value from a raw centipawn count.
    #[inline(always)]
    pub const fn new(cp: i32) -> Self {
        Self(cp)
    }

    /// Returns the raw centipawn count.
    #[inline(always)]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Score for delivering mate `ply` plies from the root.
    #[inline(always)]
    pub const fn mate_in(ply: usize) -> Self {
        Self(Self::MATE.0 - ply as i32)
    }

    /// Score for being mated `ply` plies from the root.
    #[inline(always)]
    pub const fn mated_in(ply: usize) -> Self {
        Self(-Self::MATE.0 + ply as i32)
    }

    /// Whether this score encodes a forced mate for either side.
    #[inline(always)]
    pub const fn is_mate(self) -> bool {
        self.0.abs() >= Self::MATE_IN_MAX_PLY.0 && self.0.abs() <= Self::MATE.0
    }

    /// Moves until mate, positive when the side to move mates.
    ///
    /// Only meaningful when [`Value::is_mate`] holds.
    pub const fn mate_moves(self) -> i32 {
        if self.0 > 0 {
            (Self::MATE.0 - self.0 + 1) / 2
        } else {
            -(Self::MATE.0 + self.0) / 2
        }
    }

    #[inline(always)]
    pub fn clamp_to_window(self, alpha: Value, beta: Value) -> Value {
        self.max(alpha).min(beta)
    }
}

impl Add for Value {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Add<i32> for Value {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: i32) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub for Value {
    type Output = Self;
    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sub<i32> for Value {
    type Output = Self;
    #[inline(always)]
    fn sub(self, rhs: i32) -> Self {
        Self(self.0 - rhs)
    }
}

impl Neg for Value {
    type Output = Self;
    #[inline(always)]
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Mul<i32> for Value {
    type Output = Self;
    #[inline(always)]
    fn mul(self, rhs: i32) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i32> for Value {
    type Output = Self;
    #[inline(always)]
    fn div(self, rhs: i32) -> Self {
        Self(self.0 / rhs)
    }
}

impl AddAssign for Value {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl AddAssign<i32> for Value {
    #[inline(always)]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl SubAssign for Value {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for Value {
    /// Formats the score the way the protocol reports it: `cp N` or `mate N`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_mate() {
            write!(f, "mate {}", self.mate_moves())
        } else {
            write!(f, "cp {}", self.0)
        }
    }
}
