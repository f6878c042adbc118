use crate::cache::IdentifierCache;
use crate::client::{first_column, Engine};
use crate::error::{ConsoleError, ConsoleResult};
use crate::meta::quote_ident;
use parking_lot::Mutex;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::debug;

/// Static list of SQL keywords for tab completion.
static SQL_KEYWORDS: &[&str] = &[
    "SELECT",
    "FROM",
    "WHERE",
    "INSERT",
    "INTO",
    "VALUES",
    "UPDATE",
    "SET",
    "DELETE",
    "CREATE",
    "TABLE",
    "DROP",
    "ALTER",
    "NOT",
    "NULL",
    "JOIN",
    "LEFT",
    "RIGHT",
    "INNER",
    "OUTER",
    "CROSS",
    "ON",
    "AND",
    "OR",
    "IN",
    "IS",
    "LIKE",
    "BETWEEN",
    "ORDER",
    "BY",
    "GROUP",
    "HAVING",
    "LIMIT",
    "OFFSET",
    "DISTINCT",
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "AS",
    "CASE",
    "WHEN",
    "THEN",
    "ELSE",
    "END",
    "WITH",
    "UNION",
    "ALL",
    "EXCEPT",
    "INTERSECT",
    "EXPLAIN",
    "ANALYZE",
    "DESCRIBE",
    "SHOW",
    "TABLES",
    "SCHEMAS",
    "DATABASES",
    "USE",
    "ASC",
    "DESC",
    "APPROX_DISTINCT",
    "DATE_TRUNC",
    "CAST",
];

/// Where completion looks up identifiers.
pub trait Catalog: Send + Sync {
    fn list_tables(&self, database: &str) -> ConsoleResult<Vec<String>>;
    fn list_databases(&self) -> ConsoleResult<Vec<String>>;
}

/// Catalog backed by the live engine. Completion runs synchronously inside
/// the line editor, so lookups block the prompt thread on the runtime.
/// Requires the multi-threaded runtime.
pub struct EngineCatalog {
    engine: Arc<dyn Engine>,
    runtime: Handle,
}

impl EngineCatalog {
    pub fn new(engine: Arc<dyn Engine>, runtime: Handle) -> Self {
        Self { engine, runtime }
    }

    fn names(&self, sql: &str) -> ConsoleResult<Vec<String>> {
        tokio::task::block_in_place(|| self.runtime.block_on(first_column(&*self.engine, sql)))
            .map_err(|e| ConsoleError::CacheRefresh(e.to_string()))
    }
}

impl Catalog for EngineCatalog {
    fn list_tables(&self, database: &str) -> ConsoleResult<Vec<String>> {
        self.names(&format!("SHOW TABLES FROM {}", quote_ident(database)))
    }

    fn list_databases(&self) -> ConsoleResult<Vec<String>> {
        self.names("SHOW SCHEMAS")
    }
}

/// Result of one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Byte offset where the replaced word starts.
    pub start: usize,
    /// Sorted, duplicate-free.
    pub candidates: Vec<String>,
}

struct CompletionState {
    database: String,
    catalog: Arc<dyn Catalog>,
    cache: IdentifierCache,
}

/// Context-aware completion for the console. Owned by the session and
/// shared with the line editor's helper.
pub struct CompletionEngine {
    keywords: Vec<&'static str>,
    state: Mutex<CompletionState>,
}

impl CompletionEngine {
    pub fn new(database: &str, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            keywords: SQL_KEYWORDS.to_vec(),
            state: Mutex::new(CompletionState {
                database: database.to_string(),
                catalog,
                cache: IdentifierCache::new(),
            }),
        }
    }

    #[cfg(test)]
    pub fn with_keywords(mut self, keywords: &[&'static str]) -> Self {
        self.keywords = keywords.to_vec();
        self
    }

    #[cfg(test)]
    pub fn database(&self) -> String {
        self.state.lock().database.clone()
    }

    /// Point completion at another database. The next table lookup refreshes
    /// unconditionally.
    pub fn switch_database(&self, database: &str, catalog: Arc<dyn Catalog>) {
        let mut state = self.state.lock();
        state.database = database.to_string();
        state.catalog = catalog;
        state.cache.invalidate();
    }

    pub fn complete(&self, line: &str, pos: usize) -> Completion {
        self.complete_at(line, pos, Instant::now())
    }

    pub fn complete_at(&self, line: &str, pos: usize, now: Instant) -> Completion {
        let pos = pos.min(line.len());
        let before = &line[..pos];
        let start = word_start(before);
        let word = &before[start..];
        if word.is_empty() {
            return Completion {
                start: pos,
                candidates: Vec::new(),
            };
        }
        debug!("Completing word: {:?}", word);

        let upper = word.to_uppercase();
        let mut candidates: Vec<String> = self
            .keywords
            .iter()
            .filter(|kw| kw.starts_with(&upper))
            .map(|kw| kw.to_string())
            .collect();

        let context = &before[..start];
        if is_from_context(context) {
            candidates.extend(matching(&self.table_names(now), word));
        }
        if is_use_context(context) {
            candidates.extend(matching(&self.database_names(), word));
        }

        candidates.sort();
        candidates.dedup();
        Completion { start, candidates }
    }

    /// Tables of the current database, refreshing the cache when stale.
    fn table_names(&self, now: Instant) -> Vec<String> {
        let mut state = self.state.lock();
        if state.cache.is_stale(now) {
            let database = state.database.clone();
            let fetched = state.catalog.list_tables(&database);
            match fetched {
                Ok(tables) => {
                    debug!("refreshed {} table names for {}", tables.len(), database);
                    state.cache.store(&database, tables, now);
                }
                Err(e) => debug!("table name refresh failed: {}", e),
            }
        }
        let database = state.database.clone();
        state.cache.tables(&database).to_vec()
    }

    fn database_names(&self) -> Vec<String> {
        let catalog = self.state.lock().catalog.clone();
        catalog.list_databases().unwrap_or_else(|e| {
            debug!("database name lookup failed: {}", e);
            Vec::new()
        })
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte offset where the identifier ending at the end of `before` starts.
fn word_start(before: &str) -> usize {
    before
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_word_char(*c))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(before.len())
}

/// `... FROM <word>`: the text before the word ends with FROM plus whitespace.
fn is_from_context(context: &str) -> bool {
    if !context.ends_with(char::is_whitespace) {
        return false;
    }
    let trimmed = context.trim_end();
    let Some(split) = trimmed.len().checked_sub(4) else {
        return false;
    };
    match (trimmed.get(..split), trimmed.get(split..)) {
        (Some(head), Some(kw)) => kw.eq_ignore_ascii_case("from") && !head.ends_with(is_word_char),
        _ => false,
    }
}

/// `USE <word>` at the start of the line.
fn is_use_context(context: &str) -> bool {
    context.ends_with(char::is_whitespace) && context.trim().eq_ignore_ascii_case("use")
}

fn matching(names: &[String], word: &str) -> Vec<String> {
    let lower = word.to_lowercase();
    names
        .iter()
        .filter(|n| n.to_lowercase().starts_with(&lower))
        .cloned()
        .collect()
}

/// rustyline Helper that delegates tab completion to the session's engine.
pub struct QshHelper {
    engine: Arc<CompletionEngine>,
}

impl QshHelper {
    pub fn new(engine: Arc<CompletionEngine>) -> Self {
        Self { engine }
    }
}

impl Completer for QshHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let completion = self.engine.complete(line, pos);
        let pairs = completion
            .candidates
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((completion.start, pairs))
    }
}

impl Hinter for QshHelper {
    type Hint = String;
    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for QshHelper {}
impl Validator for QshHelper {}
impl Helper for QshHelper {}
