use log::{debug, info, warn};

use sequential_irv::builder::Builder;
use sequential_irv::*;
use snafu::{prelude::*, Snafu};

use std::fs;

use calamine::{open_workbook, Reader, Xlsx};

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error opening workbook {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The workbook has no readable worksheet"))]
    EmptyExcel {},
    #[snafu(display("Line {line} of the roster file: {message}"))]
    MalformedCfg { line: usize, message: String },
    #[snafu(display("Column {column} header does not mention election {election:?}"))]
    MisalignedHeader { column: usize, election: String },
    #[snafu(display("Could not find candidates {names:?} anywhere in the ballot file"))]
    MissingCandidates { names: Vec<String> },
    #[snafu(display("Error processing JSON content"))]
    ParsingJson { source: serde_json::Error },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type CliResult<T> = Result<T, CliError>;

pub mod cfg_reader {
    use crate::tally::*;

    /// Parses the roster file format. A `Name, N` line opens an election
    /// with N positions; `-Candidate` lines add candidates to the most
    /// recently opened election; `#` lines and blank lines are skipped.
    pub fn parse_cfg(contents: &str) -> CliResult<Vec<Election>> {
        let mut elections: Vec<Election> = Vec::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(candidate) = line.strip_prefix('-') {
                let election = elections.last_mut().context(MalformedCfgSnafu {
                    line: idx + 1,
                    message: "candidate listed before any election",
                })?;
                election.candidates.push(candidate.to_string());
            } else {
                let (name, rest) = line.split_once(',').context(MalformedCfgSnafu {
                    line: idx + 1,
                    message: "expected `name, number of positions`",
                })?;
                // Only the digits count, so `4 winners` or ` 4` both work.
                let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
                let num_positions = digits.parse::<usize>().ok().context(MalformedCfgSnafu {
                    line: idx + 1,
                    message: "expected a number after the comma",
                })?;
                elections.push(Election {
                    name: name.to_string(),
                    candidates: Vec::new(),
                    num_positions,
                });
            }
        }
        for election in elections.iter() {
            info!(
                "cfg_reader: {}: {} positions, {} candidates",
                election.name,
                election.num_positions,
                election.candidates.len()
            );
        }
        Ok(elections)
    }

    pub fn read_cfg(path: &str) -> CliResult<Vec<Election>> {
        let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
        parse_cfg(&contents)
    }
}

pub mod ballot_reader {
    use crate::tally::*;

    /// Reads a tab-separated ballot file into rows of cells. Empty lines
    /// are dropped; cells are kept verbatim.
    pub fn read_tsv(path: &str) -> CliResult<Vec<Vec<String>>> {
        let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
        Ok(parse_tsv(&contents))
    }

    pub fn parse_tsv(contents: &str) -> Vec<Vec<String>> {
        contents
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(|line| line.split('\t').map(|cell| cell.to_string()).collect())
            .collect()
    }

    /// Reads the first worksheet of an Excel workbook with the same
    /// column layout as the TSV export.
    pub fn read_xlsx(path: &str) -> CliResult<Vec<Vec<String>>> {
        let p = path.to_string();
        let mut workbook: Xlsx<_> = open_workbook(p).context(OpeningExcelSnafu { path })?;
        let wrange = workbook
            .worksheet_range_at(0)
            .context(EmptyExcelSnafu {})?
            .context(OpeningExcelSnafu { path })?;
        let mut rows: Vec<Vec<String>> = Vec::new();
        for row in wrange.rows() {
            debug!("workbook: {:?}", row);
            let mut cells: Vec<String> = Vec::new();
            for elt in row {
                let cell = match elt {
                    calamine::DataType::String(s) => s.clone(),
                    calamine::DataType::Empty => "".to_string(),
                    _ => whatever!("read_xlsx: could not understand cell {:?}", elt),
                };
                cells.push(cell);
            }
            rows.push(cells);
        }
        Ok(rows)
    }

    /// The vote cells of one row: everything from the 1-indexed start
    /// column to the end of the row.
    pub fn data_columns(row: &[String], start_column: usize) -> Vec<String> {
        row.iter().skip(start_column - 1).cloned().collect()
    }

    /// Derives the rosters from the ballot file itself when no roster
    /// file is given. Consecutive header cells with the same title (a
    /// trailing ` [..]` suffix stripped, case-insensitive) form one
    /// election spanning those columns; the candidates are collected
    /// from the data rows in order of first appearance. The positions
    /// count defaults to the column span, so the tabulation reports the
    /// full winning order of every election.
    pub fn scan_elections(header: &[String], rows: &[Vec<String>]) -> CliResult<Vec<Election>> {
        let mut spans: Vec<(String, usize)> = Vec::new();
        for cell in header.iter() {
            // `[` is ASCII, so slicing at its index is always valid even
            // when the title holds multi-byte characters.
            let title = match cell.rfind('[') {
                Some(idx) if idx >= 1 => cell[..idx].trim_end().to_string(),
                _ => cell.clone(),
            };
            match spans.last_mut() {
                Some((name, span)) if name.eq_ignore_ascii_case(&title) => *span += 1,
                _ => spans.push((title, 1)),
            }
        }

        let mut elections: Vec<Election> = Vec::new();
        let mut col = 0;
        for (name, span) in spans {
            let mut candidates: Vec<String> = Vec::new();
            for row in rows.iter() {
                for cell in row.iter().skip(col).take(span) {
                    if !cell.is_empty() && !candidates.iter().any(|c| c == cell) {
                        candidates.push(cell.clone());
                    }
                }
            }
            if candidates.len() != span {
                warn!(
                    "scan_elections: {}: {} columns but {} distinct candidates",
                    name,
                    span,
                    candidates.len()
                );
            }
            info!(
                "scan_elections: {}: {} candidates over {} columns",
                name,
                candidates.len(),
                span
            );
            col += span;
            elections.push(Election {
                name,
                candidates,
                num_positions: span,
            });
        }
        Ok(elections)
    }

    /// Checks that each election's columns carry the election's name in
    /// the header, which catches a roster misaligned with the file.
    pub fn verify_header(elections: &[Election], header: &[String]) -> CliResult<()> {
        let mut col = 0;
        for election in elections.iter() {
            let wanted = election.name.to_lowercase();
            for _ in 0..election.candidates.len() {
                let cell = header.get(col).context(MisalignedHeaderSnafu {
                    column: col + 1,
                    election: election.name.clone(),
                })?;
                ensure!(
                    cell.to_lowercase().contains(&wanted),
                    MisalignedHeaderSnafu {
                        column: col + 1,
                        election: election.name.clone(),
                    }
                );
                col += 1;
            }
        }
        Ok(())
    }

    /// Checks that every roster candidate is mentioned at least once in
    /// the data rows, which catches typos in the roster file.
    pub fn verify_candidates_present(
        elections: &[Election],
        rows: &[Vec<String>],
    ) -> CliResult<()> {
        let mut missing: Vec<String> = elections
            .iter()
            .flat_map(|e| e.candidates.iter().cloned())
            .collect();
        for row in rows.iter() {
            missing.retain(|name| !row.iter().any(|cell| cell == name));
            if missing.is_empty() {
                return Ok(());
            }
        }
        ensure!(missing.is_empty(), MissingCandidatesSnafu { names: missing });
        Ok(())
    }

    /// Packs the data rows into a ballot box. Each election consumes as
    /// many columns as it has candidates; rows too short at the end are
    /// padded with blanks.
    pub fn collect_ballots(elections: &[Election], rows: &[Vec<String>]) -> BallotBox {
        let mut builder = elections.iter().fold(Builder::new(), |b, e| {
            b.election(&e.name, &e.candidates, e.num_positions)
        });
        for row in rows.iter() {
            let mut rankings: Vec<Vec<String>> = Vec::new();
            let mut col = 0;
            for election in elections.iter() {
                let span = election.candidates.len();
                rankings.push(row.iter().skip(col).take(span).cloned().collect());
                col += span;
            }
            builder.add_ballot(&rankings);
        }
        builder.into_ballot_box()
    }
}

fn result_to_json(res: &ElectionResult) -> JSValue {
    let mut positions: Vec<JSValue> = Vec::new();
    for pos in res.positions.iter() {
        let mut rounds: Vec<JSValue> = Vec::new();
        for round in pos.rounds.iter() {
            let mut tally: JSMap<String, JSValue> = JSMap::new();
            for (name, count) in round.tally.iter() {
                tally.insert(name.clone(), json!(count.to_string()));
            }
            rounds.push(json!({
                "round": round.round,
                "tally": tally,
                "totalVotes": round.total_votes.to_string()
            }));
        }
        positions.push(json!({
            "position": pos.position,
            "winner": pos.winner,
            "rounds": rounds
        }));
    }
    json!({
        "election": res.name,
        "winnerOrder": res.winner_order,
        "results": positions
    })
}

fn build_summary_js(results: &[ElectionResult]) -> JSValue {
    let elections: Vec<JSValue> = results.iter().map(result_to_json).collect();
    json!({ "elections": elections })
}

fn read_summary(path: &str) -> CliResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

fn print_report(results: &[ElectionResult]) {
    let indent = "    ";
    for res in results.iter() {
        for pos in res.positions.iter() {
            println!("{} Position #{}:", res.name, pos.position);
            for round in pos.rounds.iter() {
                println!("{}Pass #{}:", indent, round.round);
                for (name, count) in round.tally.iter() {
                    let plural = if *count == 1 { "" } else { "s" };
                    println!(
                        "{}{}{}: {} vote{} ({}%)",
                        indent,
                        indent,
                        name,
                        count,
                        plural,
                        format_percentage(*count, round.total_votes)
                    );
                }
            }
            match pos.tie_break {
                Some(TieBreak::RankedDelta(delta)) => {
                    let plural = if delta.abs() == 1 { "" } else { "s" };
                    println!(
                        "{}Ranking difference favors {} by a delta of {} point{}.",
                        indent,
                        pos.winner,
                        delta.abs(),
                        plural
                    );
                }
                Some(TieBreak::StrictRankedDelta(delta)) => {
                    let plural = if delta.abs() == 1 { "" } else { "s" };
                    println!(
                        "{}Ranking difference over shared ballots favors {} by a delta of {} point{}.",
                        indent,
                        pos.winner,
                        delta.abs(),
                        plural
                    );
                }
                Some(TieBreak::Random) => {
                    println!(
                        "{}Fully unbreakable tie, random winner: {}.",
                        indent, pos.winner
                    );
                }
                None => {}
            }
        }
    }
    println!();
    println!("============ ELECTION WINNER ORDER ============");
    for res in results.iter() {
        println!("{}:", res.name);
        for (idx, winner) in res.winner_order.iter().enumerate() {
            println!("{}#{}: {}", indent, idx + 1, winner);
        }
    }
}

pub fn run(args: &Args) -> CliResult<()> {
    let start_column = args.ballot_start_column.unwrap_or(6);
    if start_column < 1 {
        whatever!("--ballot-start-column is 1-indexed and must be at least 1");
    }

    let rows = match args.input_type.as_deref() {
        None | Some("tsv") => ballot_reader::read_tsv(&args.input)?,
        Some("xlsx") => ballot_reader::read_xlsx(&args.input)?,
        Some(x) => whatever!("Input type not implemented {:?}", x),
    };
    if rows.is_empty() {
        whatever!("The ballot file {} has no rows", args.input);
    }

    let header = ballot_reader::data_columns(&rows[0], start_column);
    let data: Vec<Vec<String>> = rows[1..]
        .iter()
        .map(|row| ballot_reader::data_columns(row, start_column))
        .collect();

    let elections = match args.config.as_deref() {
        Some(path) => cfg_reader::read_cfg(path)?,
        None => ballot_reader::scan_elections(&header, &data)?,
    };
    info!("run: {} elections, {} ballot rows", elections.len(), data.len());

    ballot_reader::verify_header(&elections, &header)?;
    ballot_reader::verify_candidates_present(&elections, &data)?;

    let ballot_box = ballot_reader::collect_ballots(&elections, &data);
    println!("Counted {} cast ballots.", ballot_box.ballots.len());
    println!();

    let mut coin = match args.seed {
        Some(seed) => SeededCoin::new(seed),
        None => SeededCoin::from_entropy(),
    };
    let results = match run_all_elections(&ballot_box, &mut coin) {
        Ok(x) => x,
        Err(e) => whatever!("Tabulation error: {:?}", e),
    };

    print_report(&results);

    let summary = build_summary_js(&results);
    let pretty_js_stats = serde_json::to_string_pretty(&summary).context(ParsingJsonSnafu {})?;
    if let Some(out) = args.out.as_deref() {
        fs::write(out, &pretty_js_stats).context(OpeningFileSnafu { path: out })?;
        info!("run: summary written to {}", out);
    }

    // The reference summary, if provided for comparison
    if let Some(reference) = args.reference.as_deref() {
        let summary_ref = read_summary(reference)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference summary");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = "\
# Conference elections
Speaker of the House, 2
-Anna
-Bob
-Clara
Clerk, 1
-Xavier
-Yann
";

    #[test]
    fn cfg_roster_is_parsed() {
        let elections = cfg_reader::parse_cfg(CFG).unwrap();
        assert_eq!(elections.len(), 2);
        assert_eq!(elections[0].name, "Speaker of the House");
        assert_eq!(elections[0].num_positions, 2);
        assert_eq!(
            elections[0].candidates,
            vec!["Anna".to_string(), "Bob".to_string(), "Clara".to_string()]
        );
        assert_eq!(elections[1].name, "Clerk");
        assert_eq!(elections[1].num_positions, 1);
        assert_eq!(
            elections[1].candidates,
            vec!["Xavier".to_string(), "Yann".to_string()]
        );
    }

    #[test]
    fn cfg_candidate_before_election_is_rejected() {
        let res = cfg_reader::parse_cfg("-Anna\n");
        assert!(matches!(res, Err(CliError::MalformedCfg { line: 1, .. })));
    }

    #[test]
    fn cfg_line_without_positions_is_rejected() {
        let res = cfg_reader::parse_cfg("Speaker\n");
        assert!(matches!(res, Err(CliError::MalformedCfg { line: 1, .. })));
        let res = cfg_reader::parse_cfg("Speaker, soon\n");
        assert!(matches!(res, Err(CliError::MalformedCfg { line: 1, .. })));
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn elections_are_scanned_from_the_header() {
        let header = row(&[
            "Speaker [1st choice]",
            "Speaker [2nd choice]",
            "Clerk [1st choice]",
            "Clerk [2nd choice]",
        ]);
        let data = vec![
            row(&["Anna", "Bob", "Xavier", "Yann"]),
            row(&["Bob", "Anna", "Yann", "Xavier"]),
        ];
        let elections = ballot_reader::scan_elections(&header, &data).unwrap();
        assert_eq!(elections.len(), 2);
        assert_eq!(elections[0].name, "Speaker");
        assert_eq!(elections[0].num_positions, 2);
        // Candidate order follows first appearance in the data rows.
        assert_eq!(
            elections[0].candidates,
            vec!["Anna".to_string(), "Bob".to_string()]
        );
        assert_eq!(elections[1].name, "Clerk");
        assert_eq!(
            elections[1].candidates,
            vec!["Xavier".to_string(), "Yann".to_string()]
        );
    }

    #[test]
    fn multibyte_header_titles_are_scanned() {
        // No separator space before the bracket, and a non-ASCII title.
        let header = row(&["Café[1]", "Café[2]"]);
        let data = vec![row(&["Anna", "Bob"]), row(&["Bob", "Anna"])];
        let elections = ballot_reader::scan_elections(&header, &data).unwrap();
        assert_eq!(elections.len(), 1);
        assert_eq!(elections[0].name, "Café");
        assert_eq!(elections[0].num_positions, 2);
    }

    #[test]
    fn short_rows_are_padded_with_blanks() {
        let elections = cfg_reader::parse_cfg(CFG).unwrap();
        // Row stops after the first vote: the rest of the slots are blank.
        let data = vec![row(&["Anna"])];
        let ballot_box = ballot_reader::collect_ballots(&elections, &data);
        assert_eq!(ballot_box.ballots.len(), 1);
        assert_eq!(ballot_box.ballots[0].choice(0, 0), "Anna");
        assert_eq!(ballot_box.ballots[0].choice(0, 2), "");
        assert_eq!(ballot_box.ballots[0].choice(1, 0), "");
    }

    #[test]
    fn missing_candidates_are_reported() {
        let elections = cfg_reader::parse_cfg(CFG).unwrap();
        let data = vec![row(&["Anna", "Bob", "Clara", "Xavier", ""])];
        let res = ballot_reader::verify_candidates_present(&elections, &data);
        match res {
            Err(CliError::MissingCandidates { names }) => {
                assert_eq!(names, vec!["Yann".to_string()]);
            }
            x => panic!("unexpected result: {:?}", x),
        }
    }

    #[test]
    fn header_must_mention_the_election_names() {
        let elections = cfg_reader::parse_cfg(CFG).unwrap();
        let header = row(&[
            "Speaker of the House [1]",
            "Speaker of the House [2]",
            "Speaker of the House [3]",
            "Treasurer [1]",
            "Treasurer [2]",
        ]);
        let res = ballot_reader::verify_header(&elections, &header);
        assert!(matches!(
            res,
            Err(CliError::MisalignedHeader { column: 4, .. })
        ));
    }

    #[test]
    fn tsv_end_to_end() {
        struct FixedCoin;
        impl RandomSource for FixedCoin {
            fn pick_first(&mut self) -> bool {
                true
            }
        }

        let tsv = "\
Speaker [1]\tSpeaker [2]\tSpeaker [3]
Anna\tBob\tClara
Anna\tClara\tBob
Bob\tAnna\tClara
Clara\tBob\tAnna
Clara\tAnna\tBob
";
        let rows = ballot_reader::parse_tsv(tsv);
        let header = ballot_reader::data_columns(&rows[0], 1);
        let data: Vec<Vec<String>> = rows[1..]
            .iter()
            .map(|r| ballot_reader::data_columns(r, 1))
            .collect();
        let elections = ballot_reader::scan_elections(&header, &data).unwrap();
        ballot_reader::verify_header(&elections, &header).unwrap();
        ballot_reader::verify_candidates_present(&elections, &data).unwrap();
        let ballot_box = ballot_reader::collect_ballots(&elections, &data);

        let results = run_all_elections(&ballot_box, &mut FixedCoin).unwrap();
        assert_eq!(results.len(), 1);
        // All three positions are filled since the scan defaults the
        // positions count to the column span.
        assert_eq!(
            results[0].winner_order,
            vec!["Anna".to_string(), "Clara".to_string(), "Bob".to_string()]
        );

        let js = build_summary_js(&results);
        assert_eq!(js["elections"][0]["election"], "Speaker");
        assert_eq!(js["elections"][0]["winnerOrder"][0], "Anna");
        assert_eq!(
            js["elections"][0]["results"][0]["rounds"][0]["tally"]["Anna"],
            "2"
        );
    }
}
