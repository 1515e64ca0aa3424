use clap::{Arg, ArgMatches, Command, builder::PossibleValuesParser};

pub const ARG_STORE: &str = "store";
pub const ARG_DSN: &str = "dsn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Options {
    Memory,
    Postgres { dsn: String },
}

impl Options {
    /// Parse document store arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the postgres store is selected without a DSN.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let store = matches
            .get_one::<String>(ARG_STORE)
            .map_or("memory", String::as_str);
        if store != "postgres" {
            return Ok(Self::Memory);
        }

        match matches.get_one::<String>(ARG_DSN) {
            Some(dsn) if !dsn.trim().is_empty() => Ok(Self::Postgres { dsn: dsn.clone() }),
            _ => anyhow::bail!("missing required argument: --{ARG_DSN} (required for the postgres store)"),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STORE)
                .long(ARG_STORE)
                .help("Document store backend")
                .env("DEFYBLOG_STORE")
                .default_value("memory")
                .value_parser(PossibleValuesParser::new(["memory", "postgres"])),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("DEFYBLOG_DSN")
                .hide_env_values(true),
        )
}
