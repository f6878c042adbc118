/// What the session should do with one input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Clear,
    /// Print the current database without asking the engine.
    CurrentDatabase,
    /// Switch to another database (name already unquoted).
    Use(String),
    /// SQL to hand to the executor, possibly rewritten.
    Sql(String),
}

pub const HELP_TEXT: &str = "\
Session
  quit | exit                 leave the console (also Ctrl-D, or Ctrl-C at an empty prompt)
  help                        show this help
  clear | cls                 clear the screen

Databases
  show databases              list databases (alias: show schemas)
  show tables                 list tables in the current database
  show tables from DB         list tables in DB
  use DB                      switch the current database
  show current database       print the current database (alias: select database())
  describe TABLE              describe TABLE (qualified with the current database)

Anything else is sent to the engine as SQL.
While a query runs, Ctrl-C cancels it.
At a page prompt: Enter = next page, a = show all, q = stop.
";

/// Parse one input line. Returns `None` for blank input.
///
/// Keywords match case-insensitively; a single trailing `;` is ignored.
pub fn parse_command(line: &str, database: &str) -> Option<Command> {
    let trimmed = line.trim();
    let stmt = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if stmt.is_empty() {
        return None;
    }

    let lower: Vec<String> = stmt.split_whitespace().map(str::to_lowercase).collect();
    let lower: Vec<&str> = lower.iter().map(String::as_str).collect();

    Some(match lower.as_slice() {
        ["quit"] | ["exit"] => Command::Quit,
        ["help"] => Command::Help,
        ["clear"] | ["cls"] => Command::Clear,
        ["show", "databases"] | ["show", "schemas"] => Command::Sql("SHOW SCHEMAS".to_string()),
        ["show", "tables"] => Command::Sql("SHOW TABLES".to_string()),
        ["show", "tables", "from", _, ..] => Command::Sql(format!(
            "SHOW TABLES FROM {}",
            quote_ident(&unquote_ident(after_words(stmt, 3)))
        )),
        ["show", "current", "database"] => Command::CurrentDatabase,
        ["select", rest @ ..] if rest.concat() == "database()" => Command::CurrentDatabase,
        ["use", _, ..] => Command::Use(unquote_ident(after_words(stmt, 1))),
        ["describe", _, ..] => Command::Sql(describe_sql(after_words(stmt, 1), database)),
        _ => Command::Sql(stmt.to_string()),
    })
}

/// Text of `stmt` after its first `n` words, exactly as typed, so quoted
/// names keep their inner spaces.
fn after_words(stmt: &str, n: usize) -> &str {
    let mut rest = stmt.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}

/// `DESCRIBE` for `name`, qualifying it with `database` when it has no
/// database part of its own.
pub fn describe_sql(name: &str, database: &str) -> String {
    if name.contains('.') {
        format!("DESCRIBE {}", name)
    } else {
        format!(
            "DESCRIBE {}.{}",
            quote_ident(database),
            quote_ident(&unquote_ident(name))
        )
    }
}

/// Probe used to validate a database before switching to it.
pub fn use_probe_sql(database: &str) -> String {
    format!("SHOW TABLES FROM {} LIMIT 1", quote_ident(database))
}

/// Wrap an identifier in double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Strip one pair of matching `"`, `'` or `` ` `` quotes.
pub fn unquote_ident(name: &str) -> String {
    let name = name.trim();
    for q in ['"', '\'', '`'] {
        if name.len() >= 2 && name.starts_with(q) && name.ends_with(q) {
            let inner = &name[1..name.len() - 1];
            let doubled = format!("{}{}", q, q);
            return inner.replace(&doubled, &q.to_string());
        }
    }
    name.to_string()
}
