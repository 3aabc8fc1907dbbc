use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;
use std::process;
use std::time::Duration;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use net_sort::{persist_to_path, ExchangeBuilder, Record, RecordReader, RecordSorter, RetryPolicy, ServerConfigs};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    if let Err(err) = run(&arg_parser) {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn run(arg_parser: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let server_id: usize = arg_parser.value_of_t_or_exit("server_id");
    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");
    let config = arg_parser.value_of("config").expect("value is required");

    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let retry_interval: u64 = arg_parser.value_of_t_or_exit("retry_interval");
    let max_attempts: Option<usize> = arg_parser
        .is_present("max_attempts")
        .then(|| arg_parser.value_of_t_or_exit("max_attempts"));

    log::info!("server id: {}", server_id);

    let configs = ServerConfigs::load(Path::new(config))?;
    for server in &configs.servers {
        log::info!("server {} at {}", server.server_id, server.address());
    }

    let retry = match max_attempts {
        Some(max_attempts) => RetryPolicy::bounded(Duration::from_millis(retry_interval), max_attempts),
        None => RetryPolicy::unbounded(Duration::from_millis(retry_interval)),
    };
    let exchange = ExchangeBuilder::new(configs, server_id)
        .with_retry_policy(retry)
        .build()?;
    let sorter = RecordSorter::new(threads)?;

    let input_file = fs::File::open(input).map_err(|err| format!("input file opening error: {}", err))?;
    let input_size = input_file.metadata()?.len();
    let records: Vec<Record> = RecordReader::new(io::BufReader::new(input_file))
        .collect::<Result<_, _>>()
        .map_err(|err| format!("input file reading error: {}", err))?;
    log::info!("loaded {} records ({}) from {}", records.len(), ByteSize(input_size), input);

    let owned = exchange.run(records)?;
    let sorted = sorter.sort(owned);
    persist_to_path(&sorted, Path::new(output))?;

    log::info!("server {} done", server_id);

    return Ok(());
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("net-sort")
        .about("distributed partition-exchange sorter")
        .arg(
            clap::Arg::new("server_id")
                .help("id of this server in the cluster configuration")
                .required(true)
                .index(1)
                .validator(|v| match v.parse::<usize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Invalid server id, must be a non-negative integer: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("input")
                .help("file holding this server's unsorted shard")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("output")
                .help("file to store this server's sorted partition in")
                .required(true)
                .index(3),
        )
        .arg(
            clap::Arg::new("config")
                .help("cluster configuration file")
                .required(true)
                .index(4),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("retry_interval")
                .long("retry-interval-ms")
                .help("delay between peer connection attempts in milliseconds")
                .takes_value(true)
                .default_value("1000"),
        )
        .arg(
            clap::Arg::new("max_attempts")
                .long("max-attempts")
                .help("number of peer connection attempts, the first one included, before giving up (unbounded if not set)")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
