use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use serde_json::{json, Value};
use strata_gateway::SqliteGateway;
use strata_store::{GetRequest, ImportOptions, RegisterOptions, SetOptions, VersionedStore};
use strata_types::{describe, MetadataRecord, VersionId};

use crate::cli::*;
use crate::config::CliConfig;

type Store = VersionedStore<SqliteGateway>;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?.with_database(cli.db);
    let format = cli.format;

    // `shape --object` never touches the database.
    if let Command::Shape(ShapeArgs {
        object: Some(object),
        ..
    }) = &cli.command
    {
        return print_json(&describe(&read_object(object)?));
    }

    let gateway = SqliteGateway::open(&config.database)
        .with_context(|| format!("opening {}", config.database.display()))?;
    let store = VersionedStore::new(Arc::new(gateway), config.store);

    match cli.command {
        Command::Register(args) => cmd_register(&store, format, args),
        Command::Set(args) => cmd_set(&store, format, args),
        Command::Get(args) => cmd_get(&store, format, args),
        Command::Has(args) => {
            let live = store.has(&args.key);
            emit(format, &json!({"key": args.key, "registered": live}), |_| {
                if live {
                    format!("{} {} is registered", "✓".green(), args.key.yellow())
                } else {
                    format!("{} {} is not registered", "✗".red(), args.key.yellow())
                }
            })
        }
        Command::Unregister(args) => {
            let done = store.unregister(&args.key);
            emit(format, &json!({"key": args.key, "unregistered": done}), |_| {
                if done {
                    format!("{} Unregistered {}", "✓".green(), args.key.yellow())
                } else {
                    format!("{} No record for {}", "✗".red(), args.key.yellow())
                }
            })
        }
        Command::Publish(args) => {
            let object = read_object(&args.object)?;
            let record = store.publish(&args.key, object, args.job)?;
            emit_record(format, "Published", &record)
        }
        Command::List(args) => cmd_list(&store, format, args),
        Command::Meta(args) => {
            let Some(record) = store.metadata(&args.key, args.schema.as_deref())? else {
                bail!("no metadata for {}", args.key);
            };
            emit(format, &record, |r| describe_record(r).join("\n"))
        }
        Command::LinkJob(args) => {
            let linked = store.link_job(&args.job, args.version);
            emit(
                format,
                &json!({"job": args.job, "version": args.version, "linked": linked}),
                |_| {
                    if linked {
                        format!("{} Linked {} to job {}", "✓".green(), args.version, args.job)
                    } else {
                        format!("{} Nothing linked (already linked or unknown version)", "✗".red())
                    }
                },
            )
        }
        Command::Job(args) => {
            let versions = store.job_versions(&args.job)?;
            emit(format, &versions, |vs| {
                if vs.is_empty() {
                    format!("Job {} has no versions.", args.job.to_string().yellow())
                } else {
                    vs.iter().map(version_line).collect::<Vec<_>>().join("\n")
                }
            })
        }
        Command::Shape(args) => {
            let stored = store.fetch(get_request(args.key, args.version)?)?;
            let shape = describe(&Value::Object(stored.object));
            print_json(&shape)
        }
        Command::Import(args) => cmd_import(&store, format, args),
        Command::Health => {
            store.ping()?;
            let stats = store.stats()?;
            emit(
                format,
                &json!({
                    "database": config.database,
                    "metadata": stats.metadata,
                    "objectVersions": stats.object_versions,
                    "jobLinks": stats.job_links,
                }),
                |_| {
                    format!(
                        "{} {} is healthy\n  metadata records: {}\n  object versions:  {}\n  job links:        {}",
                        "✓".green().bold(),
                        config.database.display().to_string().bold(),
                        stats.metadata,
                        stats.object_versions,
                        stats.job_links,
                    )
                },
            )
        }
    }
}

fn cmd_register(store: &Store, format: OutputFormat, args: RegisterArgs) -> anyhow::Result<()> {
    let initial = args.object.as_deref().map(read_object).transpose()?;
    let opts = RegisterOptions {
        init: args.init,
        check: args.check,
        schema_key: args.schema,
        timeout: None,
    };
    let record = store.register(&args.key, initial, opts)?;
    emit_record(format, "Registered", &record)
}

fn cmd_set(store: &Store, format: OutputFormat, args: SetArgs) -> anyhow::Result<()> {
    let object = read_object(&args.object)?;
    let opts = SetOptions {
        job: args.job,
        schema_key: args.schema,
        check: args.check,
        timeout: None,
    };
    let record = store.set(&args.key, object, opts)?;
    emit_record(format, "Stored", &record)
}

fn cmd_get(store: &Store, format: OutputFormat, args: GetArgs) -> anyhow::Result<()> {
    let stored = store.fetch(get_request(args.key, args.version)?)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stored.object)?),
        OutputFormat::Text => {
            println!("{}  {}  (job {})", version_line(&stored.version), stored.key.yellow(), stored.job);
            println!("{}", serde_json::to_string_pretty(&stored.object)?);
        }
    }
    Ok(())
}

fn cmd_list(store: &Store, format: OutputFormat, args: ListArgs) -> anyhow::Result<()> {
    let listing = store.list_versions_by_type(&args.object_type, args.job.as_deref());
    let limit = args.limit.unwrap_or(usize::MAX);
    let versions = listing
        .iter()
        .take(limit)
        .collect::<Result<Vec<_>, _>>()?;
    emit(format, &versions, |vs| {
        if vs.is_empty() {
            format!("No versions of type {}.", args.object_type.yellow())
        } else {
            vs.iter().map(version_line).collect::<Vec<_>>().join("\n")
        }
    })
}

fn cmd_import(store: &Store, format: OutputFormat, args: ImportArgs) -> anyhow::Result<()> {
    let path = args.path.as_path();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let document: Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let opts = ImportOptions {
        job: args.job,
        ..ImportOptions::default()
    };
    let report = store.import_graph(document, opts)?;
    emit(format, &report, |r| {
        format!(
            "{} Imported {} nodes as job {} ({} skipped, {} failed)",
            "✓".green().bold(),
            r.written,
            r.job.to_string().cyan(),
            r.skipped,
            r.failed,
        )
    })
}

fn get_request(key: Option<String>, version: Option<VersionId>) -> anyhow::Result<GetRequest> {
    if key.is_none() && version.is_none() {
        bail!("give a key or --version");
    }
    Ok(GetRequest {
        key,
        version,
        timeout: None,
    })
}

/// Parse an object argument: inline JSON, or `@path` to read a file.
fn read_object(arg: &str) -> anyhow::Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?
        }
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("object is not valid JSON")
}

fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Text => {
            println!("{}", text(value));
            Ok(())
        }
    }
}

/// Pretty-print `value` as JSON on stdout.
fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", render_json(value)?);
    Ok(())
}

fn render_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value).context("rendering JSON output")
}

fn emit_record(format: OutputFormat, verb: &str, record: &MetadataRecord) -> anyhow::Result<()> {
    emit(format, record, |r| {
        let mut lines = vec![format!("{} {} {}", "✓".green().bold(), verb, r.key.yellow())];
        lines.extend(describe_record(r).into_iter().skip(1));
        lines.join("\n")
    })
}

fn describe_record(r: &MetadataRecord) -> Vec<String> {
    let version = r
        .latest_version()
        .map(|v| version_line(&v))
        .unwrap_or_else(|| "none".dimmed().to_string());
    let state = if r.is_live() {
        "live".green().to_string()
    } else {
        format!("{} ({})", "unregistered".red(), r.tombstone.short_id())
    };
    vec![
        format!("Key: {}", r.key.yellow().bold()),
        format!("  Schema: {}", r.schema_key.cyan()),
        format!("  Version: {version}"),
        format!(
            "  Job: {}",
            r.job.as_ref().map(|j| j.to_string()).unwrap_or_else(|| "none".into())
        ),
        format!("  Last op: {}  Init: {}  Check: {}", r.last_op, r.init, r.check),
        format!("  State: {state}"),
    ]
}

/// A version id with its timestamp.
fn version_line(v: &VersionId) -> String {
    let at = i64::try_from(v.timestamp_ms())
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_default();
    format!("{}  {}", v.to_string().yellow(), at.dimmed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use clap::Parser;
    use strata_store::StoreConfig;

    fn run(db: &Path, args: &[&str]) -> anyhow::Result<()> {
        let mut argv = vec!["strata", "--db", db.to_str().unwrap()];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv).unwrap())
    }

    fn open(db: &Path) -> Store {
        VersionedStore::new(Arc::new(SqliteGateway::open(db).unwrap()), StoreConfig::default())
    }

    #[test]
    fn set_and_get_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");

        run(&db, &["register", "person", r#"{"name":"Ann"}"#]).unwrap();
        run(&db, &["set", "person", r#"{"name":"Ann","age":31}"#, "--job", "edit"]).unwrap();
        run(&db, &["--format", "json", "get", "person"]).unwrap();
        run(&db, &["meta", "person"]).unwrap();
        run(&db, &["list", "person"]).unwrap();
        run(&db, &["health"]).unwrap();

        let store = open(&db);
        let got = store.get(GetRequest::for_key("person")).unwrap();
        assert_eq!(got["age"], 31);
        assert_eq!(store.list_versions_by_type("person", Some("edit")).iter().count(), 1);
    }

    #[test]
    fn object_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");
        let obj = dir.path().join("obj.json");
        std::fs::write(&obj, r#"{"from":"file"}"#).unwrap();
        let arg = format!("@{}", obj.display());

        run(&db, &["publish", "k", arg.as_str()]).unwrap();
        let got = open(&db).get(GetRequest::for_key("k")).unwrap();
        assert_eq!(got["from"], "file");
    }

    #[test]
    fn import_and_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");
        let doc = dir.path().join("graph.json");
        std::fs::write(
            &doc,
            r#"{"@graph":[{"@id":"a","@type":"T"},{"@id":"b","@type":"T"},{"x":1}]}"#,
        )
        .unwrap();

        run(&db, &["import", doc.to_str().unwrap(), "--job", "load-1"]).unwrap();
        run(&db, &["job", "load-1"]).unwrap();
        run(&db, &["unregister", "a"]).unwrap();
        run(&db, &["has", "a"]).unwrap();

        let store = open(&db);
        assert!(!store.has("a"));
        assert!(store.has("b"));
    }

    #[test]
    fn invalid_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");
        assert!(run(&db, &["set", "k", "[1,2,3]"]).is_err());
        assert!(run(&db, &["set", "k", "{not json"]).is_err());
        assert!(run(&db, &["get"]).is_err());
        assert!(run(&db, &["meta", "ghost"]).is_err());
    }

    #[test]
    fn shape_of_inline_object_needs_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("never").join("created.db");
        run(&db, &["shape", "--object", r#"{"a":[1,2],"b":{"c":null}}"#]).unwrap();
        assert!(!db.exists());
    }

    #[test]
    fn unserializable_output_is_an_error() {
        use std::collections::HashMap;

        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");
        assert!(render_json(&bad).is_err());
        assert!(emit(OutputFormat::Json, &bad, |_| String::new()).is_err());
        assert!(render_json(&json!({"ok": true})).unwrap().contains("\"ok\": true"));
    }

    #[test]
    fn version_line_shows_timestamp() {
        let v = VersionId::from_parts(0, 1);
        assert!(version_line(&v).contains("1970-01-01 00:00:00.000 UTC"));
    }
}
