mod args;
mod logging;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value as JsonValue;
use sql_mapper::prelude::*;

use crate::args::{Action, Args, CliConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = CliConfig::from_args(args);
    if let Err(err) = logging::init(config.log.as_deref(), config.verbose) {
        eprintln!("failed to open log file: {err}");
        return ExitCode::FAILURE;
    }

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling");
            on_interrupt.cancel();
        }
    });

    match run(&config, &token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_cancelled() => {
            tracing::warn!("cancelled");
            ExitCode::from(130)
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &CliConfig, token: &CancellationToken) -> Result<(), SqlMapperError> {
    let conn = SqliteRawConnection::builder(config.db.clone())
        .busy_timeout(config.busy_timeout())
        .connection_options(ConnectionOptions::default().with_stream_buffer(config.stream_buffer))
        .open()
        .await?;

    let outcome = match &config.action {
        Action::Query { sql, stream, first } => {
            let statement = with_call_options(conn.sql(sql), config, token);
            if *first {
                let row: Option<JsonValue> = statement.query_first().await?;
                if let Some(row) = row {
                    print_row(&row)?;
                }
                Ok(())
            } else {
                let mut rows = statement.buffered(!*stream).query_rows::<JsonValue>().await?;
                let mut printed = 0usize;
                while let Some(row) = rows.next().await {
                    print_row(&row?)?;
                    printed += 1;
                }
                rows.close().await?;
                tracing::info!(rows = printed, "query finished");
                Ok(())
            }
        }
        Action::Execute { sql } => {
            let affected = with_call_options(conn.sql(sql), config, token).execute().await?;
            println!("{affected}");
            Ok(())
        }
        Action::Script { path } => {
            let script = std::fs::read_to_string(path).map_err(|err| {
                SqlMapperError::ConfigError(format!("cannot read {}: {err}", path.display()))
            })?;
            conn.execute_script(&script).await
        }
    };

    if let Err(err) = conn.close().await {
        tracing::warn!("failed to close database: {err}");
    }
    outcome
}

fn with_call_options<'a>(
    statement: StatementBuilder<'a, SqliteRawConnection>,
    config: &CliConfig,
    token: &CancellationToken,
) -> StatementBuilder<'a, SqliteRawConnection> {
    let statement = statement.kind(config.kind).cancellation(token);
    match config.timeout() {
        Some(timeout) => statement.timeout(timeout),
        None => statement,
    }
}

fn print_row(row: &JsonValue) -> Result<(), SqlMapperError> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{row}")
        .map_err(|err| SqlMapperError::Other(format!("failed to write row: {err}")))
}
