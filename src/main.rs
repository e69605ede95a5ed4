use clap::{Parser, Subcommand};
use color_eyre::config::HookBuilder;
use color_eyre::eyre::{Report, WrapErr};
use log::info;
use std::io::{BufRead, Write, stdin, stdout};
use std::path::PathBuf;
use tripod::Store;

/// Build and query memory-mapped RDF triple stores.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// root directory the databases live under
    #[arg(long, default_value = "DB_DATA_ARCHIVE")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// build a database from a file of whitespace-separated `s p o .` lines
    Build {
        /// name of the database to create
        name: String,
        /// the triples file to load
        rdf_file: PathBuf,
        /// worker threads for the index build
        #[arg(short = 'j', long, default_value_t = 1)]
        threads: usize,
    },
    /// run SPARQL queries against a database
    Query {
        /// name of the database to open
        name: String,
        /// file with one query per line; interactive when omitted
        query_file: Option<PathBuf>,
    },
}

fn main() -> Result<(), Report> {
    HookBuilder::default().display_env_section(false).install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match args.command {
        Command::Build { name, rdf_file, threads } => {
            Store::create(&args.data_dir, &name, &rdf_file, threads)
                .wrap_err_with(|| format!("error building database {name}"))?;
        }
        Command::Query { name, query_file } => {
            let store = Store::open(&args.data_dir, &name)
                .wrap_err_with(|| format!("error opening database {name}"))?;
            match query_file {
                Some(path) => {
                    let queries = fs_err::read_to_string(&path)?;
                    for query in queries.lines().filter(|line| !line.trim().is_empty()) {
                        execute(&store, query);
                    }
                }
                None => shell(&store)?,
            }
        }
    }
    Ok(())
}

/// Line-oriented shell: one query per line, `exit` quits.
fn shell(store: &Store) -> Result<(), Report> {
    info!("{} triples loaded, one query per line, 'exit' quits", store.triple_cnt());
    let mut line = String::new();
    loop {
        print!("> ");
        stdout().flush()?;
        line.clear();
        if stdin().lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let query = line.trim();
        match query {
            "" => {}
            "exit" => return Ok(()),
            _ => execute(store, query),
        }
    }
}

fn execute(store: &Store, query: &str) {
    let timer = std::time::Instant::now();
    match store.query(query) {
        Ok(output) => {
            for row in &output.rows {
                println!("{}", row.join(" "));
            }
            println!("{} result(s) in {:?}.", output.len(), timer.elapsed());
        }
        // a failed query leaves the store usable
        Err(e) => eprintln!("{e}"),
    }
}
