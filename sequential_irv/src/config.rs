// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One election: an ordered list of candidate names and the number of
/// positions to fill.
///
/// The candidate order matters for iteration and display. The tabulation
/// itself is order-independent, except for the ranked-delta tie breaker
/// which reads ranks from the ballots directly.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Election {
    pub name: String,
    pub candidates: Vec<String>,
    pub num_positions: usize,
}

/// One voter's ranked preferences across all elections.
///
/// `rankings[e]` is the ranking for election `e`, from most preferred to
/// least preferred. A slot may hold the empty string, which is the "no
/// vote" sentinel. Slots past the end of a row are treated as blank.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Ballot {
    pub rankings: Vec<Vec<String>>,
}

impl Ballot {
    /// The candidate name at the given rank for the given election, or
    /// `""` when the slot is blank or was never filled in.
    pub fn choice(&self, election: usize, rank: usize) -> &str {
        self.rankings
            .get(election)
            .and_then(|row| row.get(rank))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// All the rosters and all the cast ballots.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BallotBox {
    pub elections: Vec<Election>,
    pub ballots: Vec<Ballot>,
}

// ******** Output data structures *********

/// The tally for one elimination round.
///
/// The mapping is ordered by the election's declared candidate order.
/// Every candidate still active in round 1 is present, with an explicit
/// zero for candidates that received no vote. Later rounds only record
/// candidates that received at least one vote that round.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RoundTally {
    pub round: u32,
    pub tally: Vec<(String, u64)>,
    pub total_votes: u64,
}

/// How a position's exact two-way tie was resolved.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TieBreak {
    /// The cumulative rank delta across all ballots was decisive.
    /// Negative favors the first candidate of the tied pair.
    RankedDelta(i64),
    /// The first pass balanced out; the delta over ballots ranking both
    /// candidates was decisive.
    StrictRankedDelta(i64),
    /// Fully unbreakable by preference data; a random pick was made.
    Random,
}

/// The resolution of a single position: the full round history and the
/// winner.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PositionResult {
    pub position: u32,
    pub winner: String,
    pub rounds: Vec<RoundTally>,
    pub tie_break: Option<TieBreak>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ElectionResult {
    pub name: String,
    /// Winning candidates, earliest = first position filled. The length
    /// is the lesser of the positions available and the candidate count.
    pub winner_order: Vec<String>,
    pub positions: Vec<PositionResult>,
}

/// Errors that prevent the tabulation from completing successfully.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TallyErrors {
    /// The requested election does not exist in the ballot box.
    EmptyElection,
    /// The rounds exhausted every candidate without producing a winner.
    /// This indicates an invariant violation in the supplied data, such
    /// as an election with no valid ballot.
    NoConvergence,
}

impl Error for TallyErrors {}

impl Display for TallyErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TallyErrors::EmptyElection => write!(f, "no such election in the ballot box"),
            TallyErrors::NoConvergence => {
                write!(f, "tabulation exhausted all candidates without a winner")
            }
        }
    }
}

// ********* Randomness **********

/// The source of randomness for the unbreakable-tie fallback.
///
/// The tabulation is a pure function of its inputs except for this one
/// capability, so callers control it explicitly. Tests can substitute a
/// fixed answer to force either outcome.
pub trait RandomSource {
    /// Returns true to elect the first candidate of the tied pair, in
    /// the order the tie was detected.
    fn pick_first(&mut self) -> bool;
}

/// A fair coin backed by a seedable generator. Runs with the same seed
/// resolve unbreakable ties identically.
pub struct SeededCoin(StdRng);

impl SeededCoin {
    pub fn new(seed: u64) -> SeededCoin {
        SeededCoin(StdRng::seed_from_u64(seed))
    }

    /// A coin seeded from the operating system. Not reproducible.
    pub fn from_entropy() -> SeededCoin {
        SeededCoin(StdRng::from_entropy())
    }
}

impl RandomSource for SeededCoin {
    fn pick_first(&mut self) -> bool {
        self.0.gen_bool(0.5)
    }
}
