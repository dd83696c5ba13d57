use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use phylo_engine::compare::{Metric, pairwise_distances};
use phylo_engine::distance::compute_distances;
use phylo_engine::io::{read_fasta, read_first_newick, read_newick_file, write_matrix_tsv, write_text};
use phylo_engine::model::{Model, options_table};
use phylo_engine::model_finder::{ModelFinderConfig, select_model};
use phylo_engine::newick::to_newick;
use phylo_engine::nj::nj_from_matrix;
use phylo_engine::random::{TreeGenMode, generate_random_trees};
use phylo_engine::search::{SearchConfig, build_tree, fit_tree};
use phylo_engine::{Alignment, PhyloError, SeqType};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

/// Phylogenetic tree inference and comparison.
#[derive(Parser, Debug)]
#[command(name = "phylo-engine", version, about = "Phylogenetic tree inference and comparison")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode: only warnings and errors
    #[arg(short = 'q', long = "quiet", default_value_t = false, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pairwise distance matrix between the trees of a Newick file
    Rf {
        /// Newick file with one or more trees
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Distance metric to compute: rf | weighted | kf
        #[arg(long = "metric", value_enum, default_value_t = MetricArg::Rf)]
        metric: MetricArg,

        /// Output path for the TSV matrix (`.gz` compresses, `-` is stdout)
        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,

        #[arg(short = 'T', long = "threads", default_value_t = 0)]
        threads: usize,
    },
    /// Random trees, one Newick per line
    Random {
        #[arg(short = 'n', long = "num-taxa")]
        num_taxa: usize,

        /// YULE_HARDING | UNIFORM | CATERPILLAR | BALANCED | BIRTH_DEATH | STAR_TREE
        #[arg(long = "mode", default_value = "YULE_HARDING")]
        mode: TreeGenMode,

        #[arg(short = 'c', long = "count", default_value_t = 1)]
        count: usize,

        /// Random seed (0 draws a fresh one)
        #[arg(long = "seed", default_value_t = 0)]
        seed: u64,

        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,
    },
    /// Jukes-Cantor distance matrix of an alignment
    Dist {
        #[command(flatten)]
        input: AlignmentArgs,

        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,

        #[arg(short = 'T', long = "threads", default_value_t = 0)]
        threads: usize,
    },
    /// Neighbour-joining tree from Jukes-Cantor distances
    Nj {
        #[command(flatten)]
        input: AlignmentArgs,

        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,

        #[arg(short = 'T', long = "threads", default_value_t = 0)]
        threads: usize,
    },
    /// Maximum-likelihood tree search, optionally with bootstrap support
    Build {
        #[command(flatten)]
        input: AlignmentArgs,

        #[arg(short = 'm', long = "model", default_value = "HKY+G4")]
        model: Model,

        #[arg(short = 'b', long = "bootstrap", default_value_t = 0)]
        bootstrap: usize,

        #[arg(long = "max-iterations", default_value_t = 100)]
        max_iterations: usize,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Fit branch lengths and model parameters on a fixed topology
    Fit {
        #[command(flatten)]
        input: AlignmentArgs,

        #[arg(short = 'm', long = "model", default_value = "HKY+G4")]
        model: Model,

        /// Newick file whose first tree is the topology to fit
        #[arg(short = 't', long = "tree")]
        tree: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Rank candidate models by AIC, AICc and BIC
    ModelFinder {
        #[command(flatten)]
        input: AlignmentArgs,

        /// Comma-separated substitution models (empty: all)
        #[arg(long = "mset", default_value = "")]
        model_set: String,

        /// Comma-separated frequency types F, FO, FQ (empty: natural per model)
        #[arg(long = "mfreq", default_value = "")]
        freq_set: String,

        /// Comma-separated rate types, e.g. E,I,G4,I+G4,R3 (empty: default set)
        #[arg(long = "mrate", default_value = "")]
        rate_set: String,

        #[command(flatten)]
        run: RunArgs,
    },
    /// List substitution models, frequency types and rate types
    Models {
        /// Only list substitution models for this alphabet
        #[arg(long = "type", value_enum)]
        seq_type: Option<SeqTypeArg>,
    },
}

#[derive(Args, Debug)]
struct AlignmentArgs {
    /// FASTA alignment (plain, `.gz`, or `-` for stdin)
    #[arg(short = 's', long = "alignment")]
    alignment: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Random seed (0 draws a fresh one)
    #[arg(long = "seed", default_value_t = 0)]
    seed: u64,

    /// Worker threads (0 uses every core)
    #[arg(short = 'T', long = "threads", default_value_t = 1)]
    threads: usize,

    /// Output path for the JSON report (`-` is stdout)
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg {
    Rf,
    Weighted,
    Kf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SeqTypeArg {
    Dna,
    Protein,
}

impl From<SeqTypeArg> for SeqType {
    fn from(t: SeqTypeArg) -> Self {
        match t {
            SeqTypeArg::Dna => SeqType::Dna,
            SeqTypeArg::Protein => SeqType::Protein,
        }
    }
}

impl From<MetricArg> for Metric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::Rf => Metric::RobinsonFoulds,
            MetricArg::Weighted => Metric::Weighted,
            MetricArg::Kf => Metric::KuhnerFelsenstein,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Rf { input, metric, output, threads } => {
            let t0 = Instant::now();
            let trees = or_exit(read_newick_file(&input), 2, "Failed to read trees");
            if trees.is_empty() {
                eprintln!("No trees parsed from {input:?}.");
                process::exit(2);
            }
            log_elapsed("Reading trees", t0);
            let names: Vec<String> = (1..=trees.len()).map(|i| format!("tree{i}")).collect();

            let t1 = Instant::now();
            let n = trees.len();
            log::info!("Determining {metric:?} distances for {} combinations", n * (n - 1) / 2);
            let flat = or_exit(pairwise_distances(&trees, metric.into(), threads), 3, "Failed to compare trees");
            let mat: Vec<Vec<f64>> = flat.chunks(n.max(1)).map(<[f64]>::to_vec).collect();
            log_elapsed("Determining distances", t1);

            write_or_exit(&output, || write_matrix_tsv(&output, &names, &mat));
        }
        Command::Random { num_taxa, mode, count, seed, output } => {
            let trees = or_exit(generate_random_trees(num_taxa, mode, count, seed), 3, "Failed to generate trees");
            log::info!("Generating {count} {mode} trees on {num_taxa} taxa with seed {}", trees.seed());
            let text = trees.map(|t| to_newick(&t)).collect::<Vec<_>>().join("\n");
            write_or_exit(&output, || write_text(&output, &text));
        }
        Command::Dist { input, output, threads } => {
            let aln = load_alignment(&input);
            let t1 = Instant::now();
            let matrix = or_exit(compute_distances(&aln, threads), 3, "Failed to compute distances");
            log_elapsed("Computing distances", t1);
            let rows = matrix.rows();
            write_or_exit(&output, || write_matrix_tsv(&output, matrix.names(), &rows));
        }
        Command::Nj { input, output, threads } => {
            let aln = load_alignment(&input);
            let t1 = Instant::now();
            let tree = or_exit(compute_distances(&aln, threads).and_then(|m| nj_from_matrix(&m)), 3, "Failed to build NJ tree");
            log_elapsed("Neighbour joining", t1);
            write_or_exit(&output, || write_text(&output, &to_newick(&tree)));
        }
        Command::Build { input, model, bootstrap, max_iterations, run } => {
            let aln = load_alignment(&input);
            let config = SearchConfig {
                seed: run.seed,
                threads: run.threads,
                bootstrap_replicates: bootstrap,
                max_iterations,
                ..SearchConfig::default()
            };
            let t1 = Instant::now();
            let result = or_exit(build_tree(&aln, &model, &config), 3, "Tree search failed");
            log_elapsed("Tree search", t1);
            let json = or_exit(result.to_json(), 4, "Failed to serialise result");
            write_or_exit(&run.output, || write_text(&run.output, &json));
        }
        Command::Fit { input, model, tree, run } => {
            let aln = load_alignment(&input);
            let newick = or_exit(read_first_newick(&tree), 2, "Failed to read tree");
            let config = SearchConfig { seed: run.seed, threads: run.threads, ..SearchConfig::default() };
            let t1 = Instant::now();
            let result = or_exit(fit_tree(&aln, &model, &newick, &config), 3, "Tree fit failed");
            log_elapsed("Fitting", t1);
            let json = or_exit(result.to_json(), 4, "Failed to serialise result");
            write_or_exit(&run.output, || write_text(&run.output, &json));
        }
        Command::ModelFinder { input, model_set, freq_set, rate_set, run } => {
            let aln = load_alignment(&input);
            let config = ModelFinderConfig { model_set, freq_set, rate_set, seed: run.seed, threads: run.threads };
            let t1 = Instant::now();
            let result = or_exit(select_model(&aln, &config), 3, "Model selection failed");
            log_elapsed("Model selection", t1);
            log::info!("Best-fit model according to BIC: {}", result.best_bic);
            let json = or_exit(result.to_json(), 4, "Failed to serialise result");
            write_or_exit(&run.output, || write_text(&run.output, &json));
        }
        Command::Models { seq_type } => {
            let table = options_table(seq_type.map(SeqType::from));
            let stdout = PathBuf::from("-");
            write_or_exit(&stdout, || write_text(&stdout, &table));
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();
}

fn load_alignment(args: &AlignmentArgs) -> Alignment {
    let t0 = Instant::now();
    let aln = or_exit(read_fasta(&args.alignment), 2, "Failed to read alignment");
    log_elapsed("Reading alignment", t0);
    log::info!("Read {} {} sequences of width {}", aln.len(), aln.seq_type(), aln.width());
    aln
}

fn or_exit<T>(result: Result<T, PhyloError>, code: i32, context: &str) -> T {
    result.unwrap_or_else(|e| {
        eprintln!("{context}: {e}");
        process::exit(code);
    })
}

fn write_or_exit(output: &PathBuf, write: impl FnOnce() -> Result<(), PhyloError>) {
    let t0 = Instant::now();
    if let Err(e) = write() {
        eprintln!("Failed to write output {output:?}: {e}");
        process::exit(4);
    }
    if output.as_os_str() == "-" {
        log_elapsed("Writing to stdout", t0);
    } else {
        log_elapsed("Writing to output", t0);
    }
}

fn log_elapsed(label: &str, start: Instant) {
    log::info!("{label} {:.3}s", start.elapsed().as_secs_f64());
}
