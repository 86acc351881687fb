use serde::{Deserialize, Serialize};

use crate::error::InvalidStateTransition;

//
// ─── REVIEW LEVEL ─────────────────────────────────────────────────────────────
//

/// Spaced-repetition stage of a single item.
///
/// `Initial` and `Level1` carry no countdown; the higher levels wait
/// 30, 60 and 120 days before the item resurfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReviewLevel {
    Initial,
    Level1,
    Level2,
    Level3,
    Level4,
}

impl ReviewLevel {
    /// Countdown, in days, assigned when an item enters this level.
    #[must_use]
    pub fn countdown_days(self) -> u32 {
        match self {
            ReviewLevel::Initial | ReviewLevel::Level1 => 0,
            ReviewLevel::Level2 => 30,
            ReviewLevel::Level3 => 60,
            ReviewLevel::Level4 => 120,
        }
    }

    #[must_use]
    pub fn has_countdown(self) -> bool {
        self.countdown_days() > 0
    }

    /// Decode the storage representation (`0..=4`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition::ReviewLevel` for any other value.
    pub fn from_i64(value: i64) -> Result<Self, InvalidStateTransition> {
        match value {
            0 => Ok(Self::Initial),
            1 => Ok(Self::Level1),
            2 => Ok(Self::Level2),
            3 => Ok(Self::Level3),
            4 => Ok(Self::Level4),
            other => Err(InvalidStateTransition::ReviewLevel(other)),
        }
    }

    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            ReviewLevel::Initial => 0,
            ReviewLevel::Level1 => 1,
            ReviewLevel::Level2 => 2,
            ReviewLevel::Level3 => 3,
            ReviewLevel::Level4 => 4,
        }
    }
}

//
// ─── REVIEW STATE ─────────────────────────────────────────────────────────────
//

/// Level plus the days left before the item is due for review again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    pub level: ReviewLevel,
    pub countdown_days: u32,
}

/// Result of feeding one answer through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewTransition {
    pub from: ReviewState,
    pub to: ReviewState,
}

impl ReviewTransition {
    /// True when the level or countdown moved.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

impl Default for ReviewState {
    fn default() -> Self {
        Self::at(ReviewLevel::Initial)
    }
}

impl ReviewState {
    /// A fresh state at `level` with that level's full countdown.
    #[must_use]
    pub fn at(level: ReviewLevel) -> Self {
        Self {
            level,
            countdown_days: level.countdown_days(),
        }
    }

    /// Apply an answer.
    ///
    /// `is_todo` marks answers given as part of the day's assigned workload;
    /// only those may promote out of `Initial` and `Level1`.
    #[must_use]
    pub fn answer(self, correct: bool, is_todo: bool) -> ReviewTransition {
        use ReviewLevel::{Initial, Level1, Level2, Level3, Level4};

        let next = match (self.level, correct) {
            (Initial, _) if is_todo => Some(Level1),
            (Level1, _) if is_todo => Some(Level2),
            (Initial | Level1, _) => None,
            (Level2, true) => Some(Level3),
            (Level3, true) | (Level4, true) => Some(Level4),
            (Level2, false) => Some(Level2),
            (Level3, false) | (Level4, false) => Some(Level3),
        };

        ReviewTransition {
            from: self,
            to: next.map_or(self, ReviewState::at),
        }
    }

    /// Count one day down, flooring at zero.
    ///
    /// Returns true on the tick that reaches zero.
    pub fn tick(&mut self) -> bool {
        if !self.level.has_countdown() || self.countdown_days == 0 {
            return false;
        }
        self.countdown_days -= 1;
        self.countdown_days == 0
    }

    /// Levels with a countdown become eligible to resurface once it hits zero.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.level.has_countdown() && self.countdown_days == 0
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use ReviewLevel::{Initial, Level1, Level2, Level3, Level4};

    fn step(level: ReviewLevel, correct: bool, todo: bool) -> ReviewState {
        ReviewState::at(level).answer(correct, todo).to
    }

    #[test]
    fn correct_answers_promote() {
        assert_eq!(step(Initial, true, true).level, Level1);
        assert_eq!(step(Level1, true, true).level, Level2);
        assert_eq!(step(Level2, true, false).level, Level3);
        assert_eq!(step(Level3, true, false).level, Level4);
        assert_eq!(step(Level4, true, false).level, Level4);
    }

    #[test]
    fn low_levels_are_todo_gated() {
        for correct in [true, false] {
            let t = ReviewState::at(Initial).answer(correct, false);
            assert!(!t.changed());
            let t = ReviewState::at(Level1).answer(correct, false);
            assert!(!t.changed());
        }
        assert_eq!(step(Initial, false, true).level, Level1);
        assert_eq!(step(Level1, false, true).level, Level2);
    }

    #[test]
    fn incorrect_answers_refresh_or_demote() {
        assert_eq!(step(Level2, false, false).level, Level2);
        assert_eq!(step(Level3, false, false).level, Level3);
        assert_eq!(step(Level4, false, false).level, Level3);
    }

    #[test]
    fn every_transition_sets_the_level_countdown() {
        for level in [Initial, Level1, Level2, Level3, Level4] {
            for correct in [true, false] {
                let mut from = ReviewState::at(level);
                from.countdown_days = 0;
                let t = from.answer(correct, true);
                assert_eq!(t.to.countdown_days, t.to.level.countdown_days());
            }
        }
        assert_eq!(step(Level2, true, false).countdown_days, 60);
        assert_eq!(step(Level4, false, false).countdown_days, 60);
        assert_eq!(step(Level3, true, false).countdown_days, 120);
    }

    #[test]
    fn refresh_restores_full_countdown() {
        let mut state = ReviewState::at(Level2);
        state.countdown_days = 3;
        let t = state.answer(false, false);
        assert!(t.changed());
        assert_eq!(t.to.countdown_days, 30);
    }

    #[test]
    fn tick_floors_at_zero_and_reports_due() {
        let mut state = ReviewState::at(Level2);
        state.countdown_days = 2;
        assert!(!state.tick());
        assert!(state.tick());
        assert!(state.is_due());
        assert!(!state.tick());
        assert_eq!(state.countdown_days, 0);

        let mut initial = ReviewState::default();
        assert!(!initial.tick());
        assert!(!initial.is_due());
    }

    #[test]
    fn level_decoding_rejects_unknown_values() {
        assert_eq!(ReviewLevel::from_i64(3).unwrap(), Level3);
        assert_eq!(
            ReviewLevel::from_i64(7).unwrap_err(),
            InvalidStateTransition::ReviewLevel(7)
        );
        for level in [Initial, Level1, Level2, Level3, Level4] {
            assert_eq!(ReviewLevel::from_i64(level.as_i64()).unwrap(), level);
        }
    }
}
