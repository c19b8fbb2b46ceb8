use clap::Parser;

/// This is a tabulation program for multi-seat ranked-choice elections.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The election roster in .cfg format: a `Name, N` line starts
    /// an election with N positions to fill, following `-Candidate` lines list its
    /// candidates in ballot order, `#` lines are comments. If not provided, the rosters
    /// are derived from the ballot file's header row.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (file path) The ballot file to tabulate.
    #[clap(short, long, value_parser)]
    pub input: String,

    /// (default tsv) The type of the input: `tsv` or `xlsx`.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// (1-indexed, default 6) The first column of the ballot file that holds vote data.
    /// Earlier columns (timestamps, voter codes, ...) are ignored.
    #[clap(long, value_parser)]
    pub ballot_start_column: Option<usize>,

    /// (file path or empty) If specified, the summary of the elections will be written
    /// in JSON format to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference file containing the expected summary in JSON format. If
    /// provided, seqrcv will check that the tabulated output matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (integer, optional) Seed for the random tie-break fallback. Runs with the same
    /// seed and the same inputs resolve unbreakable ties identically.
    #[clap(long, value_parser)]
    pub seed: Option<u64>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
