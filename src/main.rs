use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use patchwork_ingest::ingest::{ImportStats, tags};
use patchwork_ingest::store::run_migrations;
use patchwork_ingest::{
    Datastore, Error, IngestConfig, MailIngester, MemoryStore, Outcome, PgStore, init_logger,
};

#[derive(Parser, Debug)]
#[command(
    name = "patchwork-ingest",
    about = "Ingest mailing list traffic into patches and comments"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse one message from a file, or from stdin.
    Parsemail {
        /// Message file; stdin when omitted.
        file: Option<PathBuf>,

        /// Force the project by list-id instead of reading the headers.
        #[arg(long)]
        list_id: Option<String>,
    },
    /// Parse every message of an mbox file or Maildir.
    Parsearchive {
        path: PathBuf,

        #[arg(long)]
        list_id: Option<String>,

        /// Parse into a throwaway in-memory store; requires --list-id.
        #[arg(long)]
        dry_run: bool,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Recount review tags for every patch.
    Retag {
        /// Only this project (by link name).
        #[arg(long)]
        project: Option<String>,
    },
    /// Recompute the diff hash of every patch.
    Rehash,
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Error> {
    init_logger();

    let args = Args::parse();
    let config = IngestConfig::from_env();

    match args.command {
        Command::Parsemail { file, list_id } => {
            let raw = match &file {
                Some(path) => std::fs::read(path)?,
                None => {
                    let mut raw = Vec::new();
                    io::stdin().read_to_end(&mut raw)?;
                    raw
                }
            };

            let pool = connect(&config, true).await?;
            let ingester = MailIngester::new(PgStore::new(pool));
            let outcome = ingester
                .parse_mail(&raw, config.list_id_override(list_id.as_deref()))
                .await?;

            report_outcome(&outcome);
            Ok(if outcome.is_stored() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Parsearchive {
            path,
            list_id,
            dry_run,
            json,
        } => {
            let list_id = config.list_id_override(list_id.as_deref());

            let stats = if dry_run {
                let Some(list_id) = list_id else {
                    return Err(Error::Usage("--dry-run requires --list-id".to_string()));
                };
                let store = MemoryStore::with_defaults();
                store.add_project(list_id, list_id, "");
                import(MailIngester::new(store), &path, Some(list_id)).await?
            } else {
                let pool = connect(&config, true).await?;
                import(MailIngester::new(PgStore::new(pool)), &path, list_id).await?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Retag { project } => {
            let pool = connect(&config, true).await?;
            let store = PgStore::new(pool);

            let project = match project {
                Some(linkname) => match store.find_project_by_linkname(&linkname).await? {
                    Some(project) => Some(project),
                    None => return Err(Error::UnknownProject(linkname)),
                },
                None => None,
            };

            let processed = tags::retag(&store, project.as_ref()).await?;
            println!("retagged {} patches", processed);
            Ok(ExitCode::SUCCESS)
        }
        Command::Rehash => {
            let pool = connect(&config, true).await?;
            let processed = tags::rehash(&PgStore::new(pool)).await?;
            println!("rehashed {} patches", processed);
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate => {
            let pool = connect(&config, false).await?;
            run_migrations(&pool).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(config: &IngestConfig, migrate: bool) -> Result<PgPool, Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.require_database_url()?)
        .await?;

    if migrate && config.run_migrations {
        run_migrations(&pool).await?;
    }

    Ok(pool)
}

async fn import<S: Datastore>(
    ingester: MailIngester<S>,
    path: &Path,
    list_id: Option<&str>,
) -> Result<ImportStats, Error> {
    Ok(ingester.import_archive(path, list_id).await?)
}

fn report_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Accepted { patch, comment } => {
            if let Some(patch) = patch {
                println!("patch {} {}", patch.id, patch.msgid);
            }
            if let Some(comment) = comment {
                println!("comment {} on patch {}", comment.id, comment.patch_id);
            }
        }
        Outcome::Duplicate { msgid } => println!("duplicate {}", msgid),
        Outcome::Dropped(reason) => println!("dropped: {}", reason),
        Outcome::Ignored(reason) => println!("ignored: {}", reason),
    }
}
