//! Command-line parsing and execution.

use anyhow::{anyhow, bail, Context, Result};

use repo_history_core::utils::truncate;
use repo_history_core::{HistoryRecord, HistoryStore, NewRecord, Session, SessionData};

pub const USAGE: &str = "\
Usage: repo-history <command> [args]

Commands:
  add <url> [--name N] [--description D] [--branch B] [--commit C]
                          Record an imported repository
  list [limit] [--json]   Show the history, newest first
  show <id>               Show one record as JSON
  remove <id>             Remove a record
  clear                   Remove every record
  sync                    Reconcile with the backend now
  status                  Show login and sync state
  login <token> [user]    Save a backend token for later runs
  logout                  Forget the saved token
  help                    Show this message";

/// Width of the name column in `list` output
const NAME_COLUMN_WIDTH: usize = 24;

/// Abbreviated commit hash length, as `git log --oneline` prints it
const SHORT_HASH_LEN: usize = 7;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Add(NewRecord),
    List { limit: Option<usize>, json: bool },
    Show(String),
    Remove(String),
    Clear,
    Sync,
    Status,
    Login { token: String, username: Option<String> },
    Logout,
    Help,
}

impl Command {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let Some(name) = args.next() else {
            return Ok(Command::Help);
        };

        let command = match name.as_str() {
            "add" => Command::Add(parse_add(args)?),
            "list" | "ls" => {
                let mut limit = None;
                let mut json = false;
                for arg in args {
                    if arg == "--json" {
                        json = true;
                    } else {
                        let n = arg
                            .parse()
                            .with_context(|| format!("Invalid limit: {}", arg))?;
                        limit = Some(n);
                    }
                }
                Command::List { limit, json }
            }
            "show" => Command::Show(required(args.next(), "id")?),
            "remove" | "rm" => Command::Remove(required(args.next(), "id")?),
            "clear" => Command::Clear,
            "sync" => Command::Sync,
            "status" => Command::Status,
            "login" => Command::Login {
                token: required(args.next(), "token")?,
                username: args.next(),
            },
            "logout" => Command::Logout,
            "help" | "--help" | "-h" => Command::Help,
            other => bail!("Unknown command: {}", other),
        };
        Ok(command)
    }
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("Missing {}", what))
}

fn parse_add(mut args: impl Iterator<Item = String>) -> Result<NewRecord> {
    let url = required(args.next(), "url")?;
    let mut record = NewRecord::new(url.clone(), default_name(&url));

    while let Some(flag) = args.next() {
        let value = required(args.next(), &format!("value for {}", flag))?;
        match flag.as_str() {
            "--name" => record.name = value,
            "--description" => record.description = Some(value),
            "--branch" => record.branch = Some(value),
            "--commit" => record.commit_hash = Some(value),
            other => bail!("Unknown option for add: {}", other),
        }
    }
    Ok(record)
}

/// Last path segment of a repository url, without a `.git` suffix.
fn default_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(&['/', ':'][..]).next().unwrap_or(trimmed);
    last.trim_end_matches(".git").to_string()
}

pub async fn run(command: Command, store: &HistoryStore, session: &Session) -> Result<()> {
    match command {
        Command::Login { token, username } => {
            session.update(SessionData::new(token, username));
            session.save().context("Failed to save session")?;
            store.reset_session();
            println!("Saved session. History will sync on the next command.");
            return Ok(());
        }
        Command::Logout => {
            session.clear().context("Failed to clear session")?;
            store.reset_session();
            println!("Signed out. History stays available locally.");
            return Ok(());
        }
        Command::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        _ => {}
    }

    // An explicit sync reconciles itself
    if command != Command::Sync {
        store.initialize().await;
    }

    match command {
        Command::Add(record) => {
            let record = store.add_repository(record);
            println!("Recorded {} ({})", record.url, record.id);
        }
        Command::List { limit, json } => {
            let records = match limit {
                Some(limit) => store.list_recent(limit),
                None => store.list(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No imported repositories yet.");
            } else {
                for record in &records {
                    println!("{}", format_row(record));
                }
            }
        }
        Command::Show(id) => match store.get(&id) {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => bail!("No history record with id {}", id),
        },
        Command::Remove(id) => {
            store.remove(&id);
            println!("Removed {}", id);
        }
        Command::Clear => {
            store.clear();
            println!("Cleared import history");
        }
        Command::Sync => {
            if session.is_valid() {
                store.sync_with_remote().await;
                println!("Synced {} records", store.len());
            } else {
                println!("Not signed in; history is local only.");
            }
        }
        Command::Status => {
            match session.data().filter(|d| !d.is_expired()) {
                Some(data) => println!(
                    "Signed in{} (expires {}, {} min left)",
                    data.username.as_ref().map(|u| format!(" as {}", u)).unwrap_or_default(),
                    data.expires_at().with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
                    data.minutes_until_expiry()
                ),
                None => println!("Not signed in"),
            }
            let pending = store.list().iter().filter(|r| r.is_pending()).count();
            println!("{} records, {} not yet on the backend", store.len(), pending);
        }
        Command::Login { .. } | Command::Logout | Command::Help => {}
    }
    Ok(())
}

fn short_hash(commit: &str) -> String {
    commit.chars().take(SHORT_HASH_LEN).collect()
}

fn format_row(record: &HistoryRecord) -> String {
    let provenance = match (&record.branch, &record.commit_hash) {
        (Some(branch), Some(commit)) => format!("  [{}@{}]", branch, short_hash(commit)),
        (Some(branch), None) => format!("  [{}]", branch),
        (None, Some(commit)) => format!("  [@{}]", short_hash(commit)),
        (None, None) => String::new(),
    };
    let marker = if record.is_pending() { "*" } else { " " };
    format!(
        "{:>9} {} {:<width$}  {}{}",
        record.age_display(),
        marker,
        truncate(&record.name, NAME_COLUMN_WIDTH),
        record.url,
        provenance,
        width = NAME_COLUMN_WIDTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_add_with_options() {
        let command = Command::parse(args(&[
            "add",
            "https://github.com/rust-lang/cargo.git",
            "--branch",
            "master",
            "--commit",
            "abc1234",
        ]))
        .unwrap();

        let expected = NewRecord::new("https://github.com/rust-lang/cargo.git", "cargo")
            .with_branch("master")
            .with_commit_hash("abc1234");
        assert_eq!(command, Command::Add(expected));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(args(&["add"])).is_err());
        assert!(Command::parse(args(&["add", "u", "--name"])).is_err());
        assert!(Command::parse(args(&["add", "u", "--bogus", "x"])).is_err());
        assert!(Command::parse(args(&["list", "many"])).is_err());
        assert!(Command::parse(args(&["frobnicate"])).is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse(args(&[])).unwrap(), Command::Help);
        assert_eq!(
            Command::parse(args(&["list", "5", "--json"])).unwrap(),
            Command::List { limit: Some(5), json: true }
        );
        assert_eq!(
            Command::parse(args(&["login", "tok"])).unwrap(),
            Command::Login { token: "tok".to_string(), username: None }
        );
        assert_eq!(Command::parse(args(&["rm", "srv1"])).unwrap(), Command::Remove("srv1".to_string()));
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name("https://github.com/a/b"), "b");
        assert_eq!(default_name("https://github.com/a/b.git/"), "b");
        assert_eq!(default_name("git@github.com:owner/repo.git"), "repo");
    }

    #[test]
    fn test_format_row_marks_pending() {
        let record = HistoryRecord::provisional(
            NewRecord::new("https://github.com/a/b", "b").with_branch("main"),
            chrono::Utc::now().timestamp_millis(),
        );
        let row = format_row(&record);
        assert!(row.contains(" * "));
        assert!(row.ends_with("https://github.com/a/b  [main]"));
    }
}
