//! Election quorum for voted warp control
//!
//! With `N` other participants:
//! - win:  `ceil((N + 1) / 2)` yes votes
//! - fail: the win count, plus one when it is even
//!
//! `win + fail > N` always holds, so one vote split can never reach both.

/// Vote thresholds for an election with a fixed number of voters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quorum {
    /// Number of voters (participants other than the candidate)
    pub voters: usize,
    /// Yes votes that seat the candidate
    pub to_win: usize,
    /// No votes that cancel the election
    pub to_fail: usize,
}

impl Quorum {
    pub fn for_voters(voters: usize) -> Self {
        let to_win = (voters + 2) / 2;
        let to_fail = if to_win % 2 == 0 { to_win + 1 } else { to_win };
        Quorum {
            voters,
            to_win,
            to_fail,
        }
    }

    #[inline]
    pub fn is_won(&self, yes: usize) -> bool {
        yes >= self.to_win
    }

    #[inline]
    pub fn is_failed(&self, no: usize) -> bool {
        no >= self.to_fail
    }
}
