use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_types::{JobId, VersionId};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata — versioned key-value store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a key, optionally with an initial object
    Register(RegisterArgs),
    /// Write a new version of a key
    Set(SetArgs),
    /// Read the latest or a specific version
    Get(GetArgs),
    /// Check whether a key is registered and live
    Has(KeyArgs),
    /// Soft-delete a key
    Unregister(KeyArgs),
    /// Append a version filed under the key's own group
    Publish(PublishArgs),
    /// List versions of an object type
    List(ListArgs),
    /// Show a key's metadata record
    Meta(MetaArgs),
    /// Link an existing version to a job
    LinkJob(LinkJobArgs),
    /// List versions written by a job
    Job(JobArgs),
    /// Describe the structure of an object
    Shape(ShapeArgs),
    /// Import a JSON-LD graph document
    Import(ImportArgs),
    /// Check the database and show record counts
    Health,
}

#[derive(Args)]
pub struct RegisterArgs {
    pub key: String,
    /// Initial object: inline JSON or @path
    pub object: Option<String>,
    #[arg(long)]
    pub init: bool,
    #[arg(long)]
    pub check: bool,
    #[arg(long)]
    pub schema: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    pub key: String,
    /// Object: inline JSON or @path
    pub object: String,
    #[arg(long)]
    pub job: Option<JobId>,
    #[arg(long)]
    pub schema: Option<String>,
    #[arg(long)]
    pub check: bool,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: Option<String>,
    #[arg(long)]
    pub version: Option<VersionId>,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct PublishArgs {
    pub key: String,
    pub object: String,
    #[arg(long)]
    pub job: Option<JobId>,
}

#[derive(Args)]
pub struct ListArgs {
    pub object_type: String,
    /// Job id glob (`*` and `?`)
    #[arg(long)]
    pub job: Option<String>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct MetaArgs {
    pub key: String,
    /// Schema key to fall back to when the key has no record
    #[arg(long)]
    pub schema: Option<String>,
}

#[derive(Args)]
pub struct LinkJobArgs {
    pub job: JobId,
    pub version: VersionId,
}

#[derive(Args)]
pub struct JobArgs {
    pub job: JobId,
}

#[derive(Args)]
pub struct ShapeArgs {
    pub key: Option<String>,
    #[arg(long)]
    pub version: Option<VersionId>,
    /// Describe this object instead of a stored one
    #[arg(long, conflicts_with_all = ["key", "version"])]
    pub object: Option<String>,
}

#[derive(Args)]
pub struct ImportArgs {
    pub path: PathBuf,
    #[arg(long)]
    pub job: Option<JobId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_set() {
        let cli = Cli::try_parse_from(["strata", "set", "person", r#"{"name":"Ann"}"#, "--job", "bulk"])
            .unwrap();
        if let Command::Set(args) = cli.command {
            assert_eq!(args.key, "person");
            assert_eq!(args.job, Some(JobId::new("bulk").unwrap()));
            assert!(!args.check);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_get_version() {
        let v = VersionId::from_parts(1_700_000_000_000, 7);
        let text = v.to_string();
        let cli = Cli::try_parse_from(["strata", "get", "--version", text.as_str()]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.version, Some(v));
            assert!(args.key.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn bad_version_is_rejected() {
        assert!(Cli::try_parse_from(["strata", "get", "--version", "nope"]).is_err());
    }

    #[test]
    fn global_flags() {
        let cli = Cli::try_parse_from([
            "strata", "health", "--format", "json", "--db", "/tmp/x.db", "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Health));
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(cli.verbose);
    }

    #[test]
    fn parse_link_job() {
        let v = VersionId::from_parts(5, 5).to_string();
        let cli = Cli::try_parse_from(["strata", "link-job", "review", v.as_str()]).unwrap();
        assert!(matches!(cli.command, Command::LinkJob(_)));
    }

    #[test]
    fn shape_object_conflicts_with_key() {
        assert!(Cli::try_parse_from(["strata", "shape", "k", "--object", "{}"]).is_err());
        assert!(Cli::try_parse_from(["strata", "shape", "--object", "{}"]).is_ok());
    }
}
