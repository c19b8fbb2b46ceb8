use crate::config::*;

/// A builder for assembling a [`BallotBox`].
///
/// Ballot rows are normalized on the way in: each election's ranking is
/// padded with blank slots (or truncated) to that election's candidate
/// count, and elections a ballot does not vote in get an all-blank row.
///
/// ```
/// use sequential_irv::builder::Builder;
///
/// let mut builder = Builder::new()
///     .election("Speaker", &["Anna".to_string(), "Bob".to_string()], 1);
///
/// builder.add_ballot(&[vec!["Anna".to_string()]]);
/// builder.add_ballot(&[vec!["Bob".to_string(), "Anna".to_string()]]);
///
/// let ballot_box = builder.into_ballot_box();
/// assert_eq!(ballot_box.ballots.len(), 2);
/// ```
pub struct Builder {
    elections: Vec<Election>,
    ballots: Vec<Ballot>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            elections: Vec::new(),
            ballots: Vec::new(),
        }
    }

    /// Declares an election with its candidates in ballot order and the
    /// number of positions to fill.
    pub fn election(mut self, name: &str, candidates: &[String], num_positions: usize) -> Builder {
        self.elections.push(Election {
            name: name.to_string(),
            candidates: candidates.to_vec(),
            num_positions,
        });
        self
    }

    /// Adds one ballot: one ranking row per declared election, in
    /// declaration order. Missing trailing slots and rows count as blank.
    pub fn add_ballot(&mut self, rankings: &[Vec<String>]) {
        let rows: Vec<Vec<String>> = self
            .elections
            .iter()
            .enumerate()
            .map(|(idx, election)| {
                let mut row = rankings.get(idx).cloned().unwrap_or_default();
                row.resize(election.candidates.len(), String::new());
                row
            })
            .collect();
        self.ballots.push(Ballot { rankings: rows });
    }

    pub fn into_ballot_box(self) -> BallotBox {
        BallotBox {
            elections: self.elections,
            ballots: self.ballots,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}
