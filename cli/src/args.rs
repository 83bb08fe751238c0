use clap::{Parser, Subcommand, ValueEnum};
use serde::{Serialize, Serializer};
use sql_mapper::types::CommandKind;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run SQL against a SQLite database through sql-mapper")]
pub(crate) struct Args {
    /// Database file (`:memory:` for a throwaway database)
    #[arg(long, default_value = ":memory:")]
    pub(crate) db: String,
    /// Per-command timeout, e.g. `250ms` or `5s`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,
    /// Lock wait applied to commands without their own timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub(crate) busy_timeout: Duration,
    /// Rows a streamed query may read ahead of the printer
    #[arg(long, default_value_t = 1)]
    pub(crate) stream_buffer: usize,
    /// Treat the SQL argument as free text or as a stored procedure name
    #[arg(long, value_enum, default_value_t = CommandKind::Text)]
    pub(crate) kind: CommandKind,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Action,
}

#[derive(Subcommand, Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum Action {
    /// Print every row as one JSON object per line
    Query {
        sql: String,
        /// Read rows lazily instead of buffering the whole result
        #[arg(long)]
        stream: bool,
        /// Print only the first row
        #[arg(long, conflicts_with = "stream")]
        first: bool,
    },
    /// Run a statement and print the affected-row count
    Execute { sql: String },
    /// Run a multi-statement script file
    Script { path: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CliConfig {
    pub(crate) db: String,
    pub(crate) timeout_ms: Option<u64>,
    pub(crate) busy_timeout_ms: u64,
    pub(crate) stream_buffer: usize,
    #[serde(serialize_with = "kind_name")]
    pub(crate) kind: CommandKind,
    pub(crate) log: Option<PathBuf>,
    pub(crate) verbose: bool,
    pub(crate) action: Action,
}

impl CliConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        CliConfig {
            db: args.db,
            timeout_ms: args.timeout.map(millis),
            busy_timeout_ms: millis(args.busy_timeout),
            stream_buffer: args.stream_buffer.max(1),
            kind: args.kind,
            log: args.log,
            verbose: args.verbose,
            action: args.command,
        }
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn kind_name<S: Serializer>(kind: &CommandKind, serializer: S) -> Result<S::Ok, S::Error> {
    match kind.to_possible_value() {
        Some(value) => serializer.serialize_str(value.get_name()),
        None => serializer.serialize_none(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
