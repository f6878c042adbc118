use crate::client::{first_column, Engine};
use crate::complete::{CompletionEngine, EngineCatalog, QshHelper};
use crate::error::{ConsoleError, ConsoleResult};
use crate::executor::{execute, QueryOutcome, Submission};
use crate::format::StreamOptions;
use crate::meta::{parse_command, use_probe_sql, Command, HELP_TEXT};
use crate::pager::{PageInput, StdinPageInput};
use crate::timing::{format_cancelled, format_success};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::history::History;
use rustyline::Editor;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Where the session sends results, status lines and errors, and where
/// pagination answers come from.
pub trait ConsoleIo: Send {
    /// A fresh writer for one statement's result.
    fn result_writer(&mut self) -> io::Result<Box<dyn Write + Send>>;
    /// `None` when output is not paged (file output or no terminal).
    fn page_input(&mut self) -> Option<Box<dyn PageInput>>;
    fn status(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    /// Appended to, one open per statement.
    File(PathBuf),
}

/// Terminal-backed console.
pub struct StdConsole {
    target: OutputTarget,
    interactive: bool,
}

impl StdConsole {
    pub fn new(target: OutputTarget, interactive: bool) -> Self {
        Self {
            target,
            interactive,
        }
    }
}

impl ConsoleIo for StdConsole {
    fn result_writer(&mut self) -> io::Result<Box<dyn Write + Send>> {
        match &self.target {
            OutputTarget::Stdout => Ok(Box::new(io::stdout())),
            OutputTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Box::new(file))
            }
        }
    }

    fn page_input(&mut self) -> Option<Box<dyn PageInput>> {
        if self.interactive && self.target == OutputTarget::Stdout {
            Some(Box::new(StdinPageInput))
        } else {
            None
        }
    }

    fn status(&mut self, msg: &str) {
        println!("{}", msg);
    }

    fn error(&mut self, msg: &str) {
        eprintln!("{}", msg);
    }
}

/// True when both stdin and stdout are attached to a terminal.
pub fn terminal_is_interactive() -> bool {
    let stdin = unsafe { libc::isatty(io::stdin().as_raw_fd()) } != 0;
    let stdout = unsafe { libc::isatty(io::stdout().as_raw_fd()) } != 0;
    stdin && stdout
}

/// Resolves on Ctrl-C. Never resolves if the signal handler can't be installed.
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// What the read loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    ClearScreen,
    Quit,
}

/// The console session: current database, the engine bound to it, and the
/// completion state for it.
pub struct Session<C: ConsoleIo> {
    database: String,
    engine: Arc<dyn Engine>,
    completion: Arc<CompletionEngine>,
    opts: StreamOptions,
    console: C,
}

impl<C: ConsoleIo> Session<C> {
    /// Must be called inside the multi-threaded runtime; completion lookups
    /// go through it.
    pub fn new(engine: Arc<dyn Engine>, opts: StreamOptions, console: C) -> Self {
        let database = engine.database().to_string();
        let catalog = Arc::new(EngineCatalog::new(engine.clone(), Handle::current()));
        Self {
            completion: Arc::new(CompletionEngine::new(&database, catalog)),
            database,
            engine,
            opts,
            console,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn completion(&self) -> Arc<CompletionEngine> {
        self.completion.clone()
    }

    #[cfg(test)]
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Handle one input line. Per-statement errors are reported here and
    /// never end the session.
    pub async fn handle_line<I>(&mut self, line: &str, interrupt: I) -> Next
    where
        I: Future<Output = ()>,
    {
        match self.dispatch(line, interrupt).await {
            Ok(next) => next,
            // reported with its elapsed time already
            Err(e) if e.is_cancelled() => Next::Continue,
            Err(e) => {
                if e.is_connection() {
                    warn!("connection problem: {}", e);
                }
                self.console.error(&format!("Error: {}", e));
                Next::Continue
            }
        }
    }

    /// Like `handle_line`, but hands any failure back to the caller.
    pub async fn dispatch<I>(&mut self, line: &str, interrupt: I) -> ConsoleResult<Next>
    where
        I: Future<Output = ()>,
    {
        let Some(command) = parse_command(line, &self.database) else {
            return Ok(Next::Continue);
        };
        debug!("command: {:?}", command);

        match command {
            Command::Quit => return Ok(Next::Quit),
            Command::Help => self.console.status(HELP_TEXT.trim_end()),
            Command::Clear => return Ok(Next::ClearScreen),
            Command::CurrentDatabase => {
                let db = self.database.clone();
                self.console.status(&db);
            }
            Command::Use(database) => {
                self.use_database(&database).await?;
                self.console
                    .status(&format!("Using database \"{}\"", database));
            }
            Command::Sql(sql) => self.run_sql(sql, interrupt).await?,
        }
        Ok(Next::Continue)
    }

    /// Validate `database` on a freshly bound engine before switching to it.
    /// On failure the current database and engine stay as they were.
    async fn use_database(&mut self, database: &str) -> ConsoleResult<()> {
        let engine = self.engine.bind(database).await?;
        first_column(engine.as_ref(), &use_probe_sql(database)).await?;

        let catalog = Arc::new(EngineCatalog::new(engine.clone(), Handle::current()));
        self.completion.switch_database(database, catalog);
        self.database = database.to_string();
        self.engine = engine;
        debug!("switched to database {}", database);
        Ok(())
    }

    async fn run_sql<I>(&mut self, sql: String, interrupt: I) -> ConsoleResult<()>
    where
        I: Future<Output = ()>,
    {
        let submission = Submission {
            sql,
            opts: self.opts,
            out: self.console.result_writer()?,
            pages: self.console.page_input(),
        };
        let report = execute(self.engine.clone(), submission, interrupt).await;
        match report.outcome {
            QueryOutcome::Success(summary) => {
                self.console
                    .status(&format_success(summary.rows, report.elapsed));
                Ok(())
            }
            QueryOutcome::Cancelled => {
                self.console.status(&format_cancelled(report.elapsed));
                Err(ConsoleError::Cancelled)
            }
            QueryOutcome::Failure(e) => Err(e),
        }
    }
}

/// Where line history persists between sessions. Load and save failures are
/// logged and otherwise ignored.
struct HistoryFile {
    path: Option<PathBuf>,
}

impl HistoryFile {
    /// `configured`, else `~/.qsh_history`.
    fn new(configured: Option<&Path>) -> Self {
        let path = configured
            .map(Path::to_path_buf)
            .or_else(|| dirs_next::home_dir().map(|h| h.join(".qsh_history")));
        Self { path }
    }

    fn load<I: History>(&self, history: &mut I) {
        let Some(path) = self.path.as_deref().filter(|p| p.exists()) else {
            return;
        };
        match history.load(path) {
            Ok(()) => debug!("Loaded {} history entries from {}", history.len(), path.display()),
            Err(e) => debug!("Could not load history from {}: {}", path.display(), e),
        }
    }

    fn save<I: History>(&self, history: &mut I) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        match history.save(path) {
            Ok(()) => debug!("Saved history to {}", path.display()),
            Err(e) => debug!("Could not save history to {}: {}", path.display(), e),
        }
    }
}

/// The interactive read loop. Ends on `quit`, end of input, or Ctrl-C at the
/// prompt.
pub async fn run_repl<C: ConsoleIo>(
    session: &mut Session<C>,
    history_file: Option<&Path>,
) -> Result<()> {
    let mut rl = Editor::new()?;
    rl.set_helper(Some(QshHelper::new(session.completion())));

    let history = HistoryFile::new(history_file);
    history.load(rl.history_mut());

    println!(
        "qsh v{}, database \"{}\". Type help for commands, quit to exit.",
        env!("CARGO_PKG_VERSION"),
        session.database()
    );

    loop {
        let prompt = format!("qsh:{}> ", session.database());
        let line = match rl.readline(&prompt) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(trimmed);

        match session.handle_line(trimmed, interrupted()).await {
            Next::Continue => {}
            Next::ClearScreen => {
                if let Err(e) = rl.clear_screen() {
                    debug!("clear screen failed: {}", e);
                }
            }
            Next::Quit => break,
        }
    }

    history.save(rl.history_mut());
    Ok(())
}
