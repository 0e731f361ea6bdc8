//! ldapaccounts - report local accounts missing from LDAP
//!
//! Reads the local user table page by page, looks every email up in LDAP and
//! prints the users as CSV with their LDAP status. With `--action` the users
//! missing from LDAP are suspended, deleted or muted, and only those are
//! printed.

use tracing_subscriber::EnvFilter;

use ldapaccounts_cli::cli::{self, Cli, RunOptions};
use ldapaccounts_cli::config::ReportConfig;
use ldapaccounts_cli::error::CliResult;
use ldapaccounts_cli::report;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(failure) => {
            if failure.should_print() {
                let _ = failure.error.print();
            }
            std::process::exit(failure.exit_code());
        }
    };
    let silent = cli.silent;

    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the CSV only.
    let filter = if silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            if !silent {
                e.print();
            }
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: &Cli) -> CliResult<()> {
    let options = RunOptions::from_cli(cli)?;
    let config = ReportConfig::from_env()?;

    let report = if options.silent {
        report::execute(&options, &config, std::io::sink()).await?
    } else {
        report::execute(&options, &config, std::io::stdout().lock()).await?
    };

    tracing::info!(
        status = %report.status,
        records = report.statistics.records_processed,
        absent = report.statistics.absent,
        mutated = report.statistics.mutated,
        "Batch run finished"
    );
    Ok(())
}
