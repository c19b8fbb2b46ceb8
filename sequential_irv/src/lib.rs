//! Instant-runoff tabulation for elections with one or more positions to
//! fill.
//!
//! Each position is resolved by classic single-winner IRV: every ballot
//! counts for its highest-ranked active candidate, a candidate holding a
//! strict majority of the counted votes wins, otherwise all candidates
//! tied for the lowest count are eliminated and the ballots are counted
//! again. Additional positions in the same election are filled by
//! re-running the tabulation with the previous winners withdrawn.
//!
//! An exact 50/50 tie between the last two candidates is resolved by the
//! ranked-delta comparison (see [`TieBreak`]), falling back to a caller
//! supplied [`RandomSource`] when the ballots are perfectly balanced.

mod config;
pub mod builder;

use log::{debug, info, warn};

use std::collections::{HashMap, HashSet};

pub use crate::config::*;

// **** Private structures ****

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
struct CandidateId(u32);

/// Resolved lookup tables for one election of the ballot box.
struct ElectionView<'a> {
    index: usize,
    election: &'a Election,
    ids: HashMap<&'a str, CandidateId>,
}

impl<'a> ElectionView<'a> {
    fn new(elections: &'a [Election], index: usize) -> Result<ElectionView<'a>, TallyErrors> {
        let election = elections.get(index).ok_or(TallyErrors::EmptyElection)?;
        let ids: HashMap<&str, CandidateId> = election
            .candidates
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), CandidateId(idx as u32)))
            .collect();
        Ok(ElectionView {
            index,
            election,
            ids,
        })
    }

    fn num_candidates(&self) -> usize {
        self.election.candidates.len()
    }

    fn name_of(&self, cid: CandidateId) -> &str {
        &self.election.candidates[cid.0 as usize]
    }

    /// The candidate id at the given rank of a ballot. Blank slots and
    /// names that are not on the roster yield `None` and do not stop the
    /// scan.
    fn choice_id(&self, ballot: &Ballot, rank: usize) -> Option<CandidateId> {
        let name = ballot.choice(self.index, rank);
        if name.is_empty() {
            None
        } else {
            self.ids.get(name).copied()
        }
    }
}

/// The outcome of one position's resolution.
struct Resolution {
    winner: CandidateId,
    rounds: Vec<RoundTally>,
    tie_break: Option<TieBreak>,
}

/// Tabulates every election of the ballot box in order.
///
/// Elections are independent of each other; only positions within one
/// election share state (the withdrawal of previous winners).
pub fn run_all_elections(
    ballot_box: &BallotBox,
    rng: &mut dyn RandomSource,
) -> Result<Vec<ElectionResult>, TallyErrors> {
    info!(
        "run_all_elections: {} elections, {} ballots",
        ballot_box.elections.len(),
        ballot_box.ballots.len()
    );
    let mut results: Vec<ElectionResult> = Vec::new();
    for index in 0..ballot_box.elections.len() {
        results.push(run_election(ballot_box, index, rng)?);
    }
    for res in results.iter() {
        info!("{}:", res.name);
        for (idx, winner) in res.winner_order.iter().enumerate() {
            info!("    #{}: {}", idx + 1, winner);
        }
    }
    Ok(results)
}

/// Tabulates one election: fills min(positions, candidates) positions in
/// sequence, withdrawing each winner before resolving the next position.
pub fn run_election(
    ballot_box: &BallotBox,
    election_index: usize,
    rng: &mut dyn RandomSource,
) -> Result<ElectionResult, TallyErrors> {
    let view = ElectionView::new(&ballot_box.elections, election_index)?;
    info!(
        "run_election: {:?}: {} candidates, {} positions",
        view.election.name,
        view.num_candidates(),
        view.election.num_positions
    );

    // Excess positions are not run: with every candidate elected there is
    // nothing left to resolve.
    let positions_to_fill = view.election.num_positions.min(view.num_candidates());

    // The winner order doubles as the withdrawal set. The resolver gets an
    // immutable snapshot and returns the incremental winner.
    let mut already_won: Vec<CandidateId> = Vec::new();
    let mut positions: Vec<PositionResult> = Vec::new();
    for position in 0..positions_to_fill {
        let resolution = find_single_winner(&view, &ballot_box.ballots, &already_won, rng)?;
        info!(
            "run_election: {:?} position #{}: winner {:?}",
            view.election.name,
            position + 1,
            view.name_of(resolution.winner)
        );
        positions.push(PositionResult {
            position: (position + 1) as u32,
            winner: view.name_of(resolution.winner).to_string(),
            rounds: resolution.rounds,
            tie_break: resolution.tie_break,
        });
        already_won.push(resolution.winner);
    }

    Ok(ElectionResult {
        name: view.election.name.clone(),
        winner_order: already_won
            .iter()
            .map(|cid| view.name_of(*cid).to_string())
            .collect(),
        positions,
    })
}

/// Runs IRV rounds for a single position until a winner emerges.
///
/// `already_won` is the withdrawal snapshot: those candidates take no
/// part in the tallies, the percentage denominators or the tie break.
fn find_single_winner(
    view: &ElectionView,
    ballots: &[Ballot],
    already_won: &[CandidateId],
    rng: &mut dyn RandomSource,
) -> Result<Resolution, TallyErrors> {
    let withdrawn: HashSet<CandidateId> = already_won.iter().copied().collect();
    let mut eliminated: HashSet<CandidateId> = HashSet::new();
    let mut rounds: Vec<RoundTally> = Vec::new();

    info!(
        "find_single_winner: {:?} position #{}",
        view.election.name,
        already_won.len() + 1
    );

    // The rounds are bounded by the candidate count: every round without a
    // winner eliminates at least one candidate.
    for round in 0..view.num_candidates() {
        let round_id = (round + 1) as u32;
        debug!(
            "find_single_winner: round #{}, eliminated so far: {:?}",
            round_id,
            eliminated.len()
        );

        // Each ballot counts for its first preference that is neither
        // withdrawn nor eliminated nor blank. Ballots with no such
        // preference left are exhausted and count for no one.
        let mut tally: HashMap<CandidateId, u64> = HashMap::new();
        let mut total_votes: u64 = 0;
        for ballot in ballots.iter() {
            for rank in 0..view.num_candidates() {
                if let Some(cid) = view.choice_id(ballot, rank) {
                    if !withdrawn.contains(&cid) && !eliminated.contains(&cid) {
                        *tally.entry(cid).or_insert(0) += 1;
                        total_votes += 1;
                        break;
                    }
                }
            }
        }

        // In the first round only, active candidates without a single vote
        // are still recorded, with an explicit zero.
        if round == 0 {
            for idx in 0..view.num_candidates() {
                let cid = CandidateId(idx as u32);
                if !tally.contains_key(&cid)
                    && !withdrawn.contains(&cid)
                    && !eliminated.contains(&cid)
                {
                    tally.insert(cid, 0);
                }
            }
        }

        // Iteration follows the roster's declared candidate order.
        let ordered: Vec<(CandidateId, u64)> = (0..view.num_candidates())
            .filter_map(|idx| {
                let cid = CandidateId(idx as u32);
                tally.get(&cid).map(|count| (cid, *count))
            })
            .collect();

        let round_tally = RoundTally {
            round: round_id,
            tally: ordered
                .iter()
                .map(|(cid, count)| (view.name_of(*cid).to_string(), *count))
                .collect(),
            total_votes,
        };
        for (name, count) in round_tally.tally.iter() {
            debug!(
                "round #{}: {}: {} votes ({}%)",
                round_id,
                name,
                count,
                format_percentage(*count, total_votes)
            );
        }

        for &(cid, count) in ordered.iter() {
            if total_votes > 0 && count * 2 > total_votes {
                // Strict majority of the votes counted this round.
                rounds.push(round_tally);
                return Ok(Resolution {
                    winner: cid,
                    rounds,
                    tie_break: None,
                });
            }
            if total_votes > 0 && count * 2 == total_votes && ordered.len() == 2 {
                info!(
                    "find_single_winner: exact tie between two candidates, \
                     running the ranked-delta tie breaker"
                );
                let competitor = ordered
                    .iter()
                    .find(|(other, other_count)| *other != cid && other_count * 2 == total_votes)
                    .map(|(other, _)| *other);
                let resolution = match competitor {
                    Some(other) => {
                        let (winner, tie_break) = ranked_tie_breaker(view, ballots, cid, other, rng);
                        Resolution {
                            winner,
                            rounds: Vec::new(),
                            tie_break: Some(tie_break),
                        }
                    }
                    None => {
                        // Cannot happen with exactly two candidates summing to
                        // the total, but the tie is still resolved rather than
                        // aborted: the candidate in hand is elected.
                        warn!(
                            "find_single_winner: could not locate the competitor of {:?} at 50%",
                            view.name_of(cid)
                        );
                        Resolution {
                            winner: cid,
                            rounds: Vec::new(),
                            tie_break: None,
                        }
                    }
                };
                rounds.push(round_tally);
                return Ok(Resolution {
                    rounds,
                    ..resolution
                });
            }
        }

        // No winner: every candidate tied for the lowest count leaves the
        // running together.
        if let Some(min_count) = ordered.iter().map(|(_, count)| *count).min() {
            for &(cid, count) in ordered.iter() {
                if count == min_count {
                    debug!(
                        "find_single_winner: round #{}: eliminating {:?} at {} votes",
                        round_id,
                        view.name_of(cid),
                        count
                    );
                    eliminated.insert(cid);
                }
            }
        }
        rounds.push(round_tally);
    }

    warn!(
        "find_single_winner: {:?}: rounds exhausted without a winner",
        view.election.name
    );
    Err(TallyErrors::NoConvergence)
}

/// Resolves an exact two-way tie by comparing how the ballots rank the
/// two candidates.
///
/// For every ballot, each candidate's 0-indexed rank is extracted; a
/// candidate absent from a ballot that ranks the other one is assigned
/// the synthetic rank `candidate count + 1`, worse than any real rank.
/// The accumulated rank delta decides the tie: negative favors `a`,
/// positive favors `b`. A zero delta triggers a stricter second pass
/// over the ballots ranking both candidates; if that also balances out,
/// the winner is drawn from `rng`.
fn ranked_tie_breaker(
    view: &ElectionView,
    ballots: &[Ballot],
    a: CandidateId,
    b: CandidateId,
    rng: &mut dyn RandomSource,
) -> (CandidateId, TieBreak) {
    let absent_rank = view.num_candidates() as i64 + 1;
    let mut total_delta: i64 = 0;
    for ballot in ballots.iter() {
        match candidate_ranks(view, ballot, a, b) {
            (Some(rank_a), Some(rank_b)) => total_delta += rank_a - rank_b,
            (Some(rank_a), None) => total_delta += rank_a - absent_rank,
            (None, Some(rank_b)) => total_delta += absent_rank - rank_b,
            (None, None) => {}
        }
    }

    if total_delta == 0 {
        // Second pass: drop the synthetic worst rank and only compare
        // ballots that rank both candidates.
        for ballot in ballots.iter() {
            if let (Some(rank_a), Some(rank_b)) = candidate_ranks(view, ballot, a, b) {
                total_delta += rank_a - rank_b;
            }
        }
        if total_delta == 0 {
            let winner = if rng.pick_first() { a } else { b };
            info!(
                "ranked_tie_breaker: fully unbreakable tie, random winner: {:?}",
                view.name_of(winner)
            );
            return (winner, TieBreak::Random);
        }
        let winner = if total_delta < 0 { a } else { b };
        info!(
            "ranked_tie_breaker: second pass favors {:?} by a delta of {}",
            view.name_of(winner),
            total_delta.abs()
        );
        return (winner, TieBreak::StrictRankedDelta(total_delta));
    }

    let winner = if total_delta < 0 { a } else { b };
    info!(
        "ranked_tie_breaker: ranking difference favors {:?} by a delta of {}",
        view.name_of(winner),
        total_delta.abs()
    );
    (winner, TieBreak::RankedDelta(total_delta))
}

/// The 0-indexed ranks of two candidates on one ballot, scanning the
/// ballot's declared slot order.
fn candidate_ranks(
    view: &ElectionView,
    ballot: &Ballot,
    a: CandidateId,
    b: CandidateId,
) -> (Option<i64>, Option<i64>) {
    let mut rank_a: Option<i64> = None;
    let mut rank_b: Option<i64> = None;
    for rank in 0..view.num_candidates() {
        let name = ballot.choice(view.index, rank);
        if name == view.name_of(a) {
            rank_a = Some(rank as i64);
        }
        if name == view.name_of(b) {
            rank_b = Some(rank as i64);
        }
    }
    (rank_a, rank_b)
}

/// Formats `100 * count / total` truncated toward zero to two decimal
/// digits, trailing zeros trimmed: `60`, `66.66`, `12.5`.
pub fn format_percentage(count: u64, total: u64) -> String {
    if total == 0 {
        return "0".to_string();
    }
    let hundredths = count * 10_000 / total;
    let whole = hundredths / 100;
    let frac = hundredths % 100;
    if frac == 0 {
        format!("{}", whole)
    } else if frac % 10 == 0 {
        format!("{}.{}", whole, frac / 10)
    } else {
        format!("{}.{:02}", whole, frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCoin(bool);

    impl RandomSource for FixedCoin {
        fn pick_first(&mut self) -> bool {
            self.0
        }
    }

    fn election(candidates: &[&str]) -> Vec<Election> {
        vec![Election {
            name: "Speaker".to_string(),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
            num_positions: 1,
        }]
    }

    fn ballot(ranking: &[&str]) -> Ballot {
        Ballot {
            rankings: vec![ranking.iter().map(|s| s.to_string()).collect()],
        }
    }

    #[test]
    fn percentage_truncates_toward_zero() {
        assert_eq!(format_percentage(3, 5), "60");
        assert_eq!(format_percentage(2, 3), "66.66");
        assert_eq!(format_percentage(1, 3), "33.33");
        assert_eq!(format_percentage(1, 8), "12.5");
        assert_eq!(format_percentage(0, 4), "0");
        assert_eq!(format_percentage(1, 2000), "0.05");
        assert_eq!(format_percentage(4, 4), "100");
        assert_eq!(format_percentage(0, 0), "0");
    }

    #[test]
    fn ranked_delta_direct_comparison() {
        let elections = election(&["A", "B", "C"]);
        let view = ElectionView::new(&elections, 0).unwrap();
        // Deltas: -1, -2, +1. A is favored overall.
        let ballots = vec![
            ballot(&["A", "B", "C"]),
            ballot(&["A", "C", "B"]),
            ballot(&["B", "A", "C"]),
        ];
        let mut rng = FixedCoin(false);
        let (winner, tie_break) =
            ranked_tie_breaker(&view, &ballots, CandidateId(0), CandidateId(1), &mut rng);
        assert_eq!(winner, CandidateId(0));
        assert_eq!(tie_break, TieBreak::RankedDelta(-2));
    }

    #[test]
    fn ranked_delta_is_antisymmetric() {
        let elections = election(&["A", "B", "C"]);
        let view = ElectionView::new(&elections, 0).unwrap();
        let ballots = vec![
            ballot(&["A", "B", "C"]),
            ballot(&["B", "A", "C"]),
            ballot(&["A", "C", "B"]),
        ];
        let mut rng = FixedCoin(false);
        let (winner_ab, delta_ab) =
            ranked_tie_breaker(&view, &ballots, CandidateId(0), CandidateId(1), &mut rng);
        let (winner_ba, delta_ba) =
            ranked_tie_breaker(&view, &ballots, CandidateId(1), CandidateId(0), &mut rng);
        assert_eq!(winner_ab, winner_ba);
        assert_eq!(delta_ab, TieBreak::RankedDelta(-2));
        assert_eq!(delta_ba, TieBreak::RankedDelta(2));
    }

    #[test]
    fn ranked_delta_synthetic_rank_for_absent_candidate() {
        let elections = election(&["A", "B", "C"]);
        let view = ElectionView::new(&elections, 0).unwrap();
        // B is absent from the only ballot: synthetic rank 4 against A's 0.
        let ballots = vec![ballot(&["A", "", ""])];
        let mut rng = FixedCoin(false);
        let (winner, tie_break) =
            ranked_tie_breaker(&view, &ballots, CandidateId(0), CandidateId(1), &mut rng);
        assert_eq!(winner, CandidateId(0));
        assert_eq!(tie_break, TieBreak::RankedDelta(-4));
    }

    #[test]
    fn ranked_delta_second_pass_breaks_balanced_first_pass() {
        let elections = election(&["A", "B", "C"]);
        let view = ElectionView::new(&elections, 0).unwrap();
        // First pass: -1 - 1 + (4 - 2) = 0. Second pass drops the B-only
        // ballot and favors A by 2.
        let ballots = vec![
            ballot(&["A", "B", "C"]),
            ballot(&["A", "B", "C"]),
            ballot(&["", "", "B"]),
        ];
        let mut rng = FixedCoin(false);
        let (winner, tie_break) =
            ranked_tie_breaker(&view, &ballots, CandidateId(0), CandidateId(1), &mut rng);
        assert_eq!(winner, CandidateId(0));
        assert_eq!(tie_break, TieBreak::StrictRankedDelta(-2));
    }

    #[test]
    fn ranked_delta_ignores_ballots_ranking_neither_candidate() {
        let elections = election(&["A", "B", "C"]);
        let view = ElectionView::new(&elections, 0).unwrap();
        let ballots = vec![ballot(&["C", "", ""]), ballot(&["B", "A", ""])];
        let mut rng = FixedCoin(false);
        let (winner, tie_break) =
            ranked_tie_breaker(&view, &ballots, CandidateId(0), CandidateId(1), &mut rng);
        assert_eq!(winner, CandidateId(1));
        assert_eq!(tie_break, TieBreak::RankedDelta(1));
    }

    #[test]
    fn unbreakable_tie_uses_the_random_source() {
        let elections = election(&["A", "B"]);
        let view = ElectionView::new(&elections, 0).unwrap();
        let ballots = vec![ballot(&["A", "B"]), ballot(&["B", "A"])];
        let (winner, tie_break) = ranked_tie_breaker(
            &view,
            &ballots,
            CandidateId(0),
            CandidateId(1),
            &mut FixedCoin(true),
        );
        assert_eq!(winner, CandidateId(0));
        assert_eq!(tie_break, TieBreak::Random);
        let (winner, _) = ranked_tie_breaker(
            &view,
            &ballots,
            CandidateId(0),
            CandidateId(1),
            &mut FixedCoin(false),
        );
        assert_eq!(winner, CandidateId(1));
    }

    #[test]
    fn seeded_coin_is_reproducible() {
        let picks: Vec<bool> = {
            let mut coin = SeededCoin::new(42);
            (0..16).map(|_| coin.pick_first()).collect()
        };
        let picks2: Vec<bool> = {
            let mut coin = SeededCoin::new(42);
            (0..16).map(|_| coin.pick_first()).collect()
        };
        assert_eq!(picks, picks2);
    }
}
