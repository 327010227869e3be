//! Traffic split arithmetic
//!
//! Splits are held as integer basis points (1/10000) so that every experiment's
//! variants sum to exactly `1.0000` and render with four decimal digits.

use serde::{Serialize, Serializer};
use std::fmt;

/// Basis points making up a whole experiment
pub const TOTAL_BASIS_POINTS: u32 = 10_000;

/// Share of traffic assigned to one variant, in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Split(u32);

impl Split {
    /// The full share (`1.0000`)
    pub const FULL: Self = Self(TOTAL_BASIS_POINTS);

    /// Create from basis points, clamped to the full share
    #[inline]
    #[must_use]
    pub fn from_basis_points(bp: u32) -> Self {
        Self(bp.min(TOTAL_BASIS_POINTS))
    }

    /// Raw basis points
    #[inline]
    #[must_use]
    pub fn basis_points(self) -> u32 {
        self.0
    }

    /// Parse an authored percentage (`"33.3"`, `"50%"`, `"0"`)
    ///
    /// Values outside `0..=100` or not numeric yield `None`.
    #[must_use]
    pub fn parse_percent(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_end_matches('%').trim();
        if trimmed.is_empty() {
            return None;
        }
        let value: f64 = trimmed.parse().ok()?;
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bp = (value * 100.0).round() as u32;
        Some(Self::from_basis_points(bp))
    }

    /// Fraction of the whole in `[0, 1]`
    #[inline]
    #[must_use]
    pub fn as_fraction(self) -> f64 {
        f64::from(self.0) / f64::from(TOTAL_BASIS_POINTS)
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:04}",
            self.0 / TOTAL_BASIS_POINTS,
            self.0 % TOTAL_BASIS_POINTS
        )
    }
}

impl Serialize for Split {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Divide the whole evenly among `n` variants
///
/// Any rounding remainder lands on the first variant, so three variants get
/// `0.3334, 0.3333, 0.3333`.
#[must_use]
pub fn distribute_evenly(n: usize) -> Vec<Split> {
    allocate(&vec![None; n])
}

/// Complete a partially authored split table
///
/// - Authored shares are kept as given, unless together they exceed the
///   whole, in which case they are scaled down proportionally.
/// - What is left is shared evenly among the unauthored entries.
/// - Rounding remainders go to the first unauthored entry, or to the first
///   entry when everything was authored.
///
/// The result always sums to [`TOTAL_BASIS_POINTS`] when `authored` is not empty.
#[must_use]
pub fn allocate(authored: &[Option<Split>]) -> Vec<Split> {
    if authored.is_empty() {
        return Vec::new();
    }

    let explicit: u64 = authored
        .iter()
        .flatten()
        .map(|s| u64::from(s.basis_points()))
        .sum();
    let total = u64::from(TOTAL_BASIS_POINTS);

    let mut out: Vec<u32> = if explicit > total {
        authored
            .iter()
            .map(|s| match s {
                #[allow(clippy::cast_possible_truncation)]
                Some(s) => (u64::from(s.basis_points()) * total / explicit) as u32,
                None => 0,
            })
            .collect()
    } else {
        let unassigned = authored.iter().filter(|s| s.is_none()).count();
        #[allow(clippy::cast_possible_truncation)]
        let remaining = (total - explicit) as u32;
        #[allow(clippy::cast_possible_truncation)]
        let share = if unassigned == 0 {
            0
        } else {
            remaining / unassigned as u32
        };
        authored
            .iter()
            .map(|s| s.map_or(share, Split::basis_points))
            .collect()
    };

    let assigned: u32 = out.iter().sum();
    let remainder = TOTAL_BASIS_POINTS.saturating_sub(assigned);
    let target = authored
        .iter()
        .position(Option::is_none)
        .filter(|_| explicit <= total)
        .unwrap_or(0);
    out[target] += remainder;

    out.into_iter().map(Split::from_basis_points).collect()
}
