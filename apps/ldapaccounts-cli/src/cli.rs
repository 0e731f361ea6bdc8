//! Command-line options

use std::ffi::OsString;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use ldapaccounts_connector::filter::{self, FilterSet};
use ldapaccounts_reconcile::MutationIntent;

use crate::error::{CliError, CliResult};
use crate::output::parse_delimiter;

/// Lists local accounts whose email is not in LDAP, optionally suspending,
/// deleting or muting them.
#[derive(Debug, Parser)]
#[command(name = "ldapaccounts")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Action applied to accounts missing from LDAP: suspend, delete or emailstop
    #[arg(short, long, value_name = "ACTION")]
    pub action: Option<String>,

    /// Output delimiter: ; , | ~ : or tab
    #[arg(short, long, default_value = ";", allow_hyphen_values = true)]
    pub delimiter: String,

    /// JSON filter on local users, e.g. '{"deleted":0,"email":"*@example.org"}'
    #[arg(short, long, value_name = "JSON")]
    pub filter: Option<String>,

    /// LDAP attribute holding the email address
    #[arg(short = 'm', long = "ldapmail", value_name = "ATTRIBUTE")]
    pub ldap_mail: Option<String>,

    /// Filter every LDAP entry must also match, e.g. 'objectClass=person'
    #[arg(short = 'q', long = "ldapquery", value_name = "FILTER")]
    pub ldap_query: Option<String>,

    /// Print nothing
    #[arg(short, long)]
    pub silent: bool,

    /// Users processed per page
    #[arg(short, long, value_name = "N")]
    pub page_size: Option<u64>,
}

/// A command line that did not parse, or asked for help or version.
#[derive(Debug)]
pub struct ParseFailure {
    pub error: clap::Error,
    /// `-s/--silent` was on the command line.
    pub silent: bool,
}

impl ParseFailure {
    /// Help and version exit cleanly; everything else is a usage error.
    pub fn exit_code(&self) -> i32 {
        match self.error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => 1,
        }
    }

    /// Help and version are always printed, errors only without `--silent`.
    pub fn should_print(&self) -> bool {
        self.exit_code() == 0 || !self.silent
    }
}

/// Parse the command line, remembering `--silent` even when parsing fails.
pub fn parse_args<I, T>(args: I) -> Result<Cli, ParseFailure>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    Cli::try_parse_from(&args).map_err(|error| ParseFailure {
        error,
        silent: silent_requested(&args),
    })
}

/// Look for `-s/--silent` without a full parse.
///
/// Values of options that take one are skipped, so `-f -s` is not silent.
fn silent_requested(args: &[OsString]) -> bool {
    let command = Cli::command();
    let valued: Vec<_> = command
        .get_arguments()
        .filter(|arg| arg.get_action().takes_values())
        .collect();
    let takes_value_short = |c: char| valued.iter().any(|arg| arg.get_short() == Some(c));
    let takes_value_long = |name: &str| valued.iter().any(|arg| arg.get_long() == Some(name));

    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if std::mem::take(&mut skip_next) {
            continue;
        }
        let arg = arg.to_string_lossy();
        if arg == "--" {
            break;
        }
        if let Some(long) = arg.strip_prefix("--") {
            if long == "silent" {
                return true;
            }
            skip_next = !long.contains('=') && takes_value_long(long);
        } else if let Some(shorts) = arg.strip_prefix('-') {
            for (i, c) in shorts.char_indices() {
                if c == 's' {
                    return true;
                }
                if takes_value_short(c) {
                    // Attached value (`-p50`) or the next argument.
                    skip_next = i + c.len_utf8() == shorts.len();
                    break;
                }
            }
        }
    }
    false
}

/// Validated options of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mutation: Option<MutationIntent>,
    pub delimiter: u8,
    pub filter: FilterSet,
    pub ldap_mail: Option<String>,
    pub ldap_query: Option<String>,
    pub silent: bool,
    pub page_size: Option<u64>,
}

impl RunOptions {
    /// Check the option values: delimiter, then action, then filter.
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        let delimiter = parse_delimiter(&cli.delimiter)?;

        let mutation = cli
            .action
            .as_deref()
            .map(|a| {
                a.parse::<MutationIntent>()
                    .map_err(|_| CliError::InvalidAction(a.to_string()))
            })
            .transpose()?;

        let filter = match cli.filter.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                filter::decode(text).map_err(|e| CliError::InvalidFilter(e.to_string()))?
            }
            _ => FilterSet::new(),
        };

        if cli.page_size == Some(0) {
            return Err(CliError::Usage("page size must be at least 1".to_string()));
        }

        Ok(Self {
            mutation,
            delimiter,
            filter,
            ldap_mail: cli.ldap_mail.clone().filter(|m| !m.trim().is_empty()),
            ldap_query: cli.ldap_query.clone().filter(|q| !q.trim().is_empty()),
            silent: cli.silent,
            page_size: cli.page_size,
        })
    }
}
