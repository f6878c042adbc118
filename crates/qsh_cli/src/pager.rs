use crate::cancel::CancelToken;
use crate::format::{FLUSH_EVERY, UNBOUNDED_FLUSH_EVERY};
use std::io::{self, BufRead, Write};
use std::os::unix::io::AsRawFd;
use tracing::debug;

/// How often a waiting pagination prompt re-checks for cancellation.
const PROMPT_POLL_MS: i32 = 100;

/// Answer given at a page boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCommand {
    /// Empty input: show the next page.
    Continue,
    /// `a` / `all`: stop prompting for the rest of this query.
    All,
    /// `q` / `quit`: stop emitting rows.
    Quit,
}

/// Interpret one line typed at the pagination prompt.
pub fn parse_page_command(input: &str) -> PageCommand {
    match input.trim().to_lowercase().as_str() {
        "q" | "quit" => PageCommand::Quit,
        "a" | "all" => PageCommand::All,
        _ => PageCommand::Continue,
    }
}

/// Source of pagination answers. Called off the runtime's worker threads,
/// so it may block; it should give up once `cancel` is set.
pub trait PageInput: Send {
    fn read_command(&mut self, shown: u64, cancel: &CancelToken) -> io::Result<PageCommand>;
}

/// Reads answers from the terminal; the prompt goes to stderr so it never
/// ends up in redirected result output.
pub struct StdinPageInput;

impl PageInput for StdinPageInput {
    fn read_command(&mut self, shown: u64, cancel: &CancelToken) -> io::Result<PageCommand> {
        let mut err = io::stderr();
        write!(
            err,
            "-- {} rows shown -- [Enter] next page, [a] all, [q] quit: ",
            shown
        )?;
        err.flush()?;

        while !stdin_ready(PROMPT_POLL_MS)? {
            if cancel.is_cancelled() {
                debug!("query cancelled at pagination prompt");
                writeln!(err)?;
                return Ok(PageCommand::Quit);
            }
        }

        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line)?;
        if n == 0 {
            debug!("EOF at pagination prompt, stopping output");
            return Ok(PageCommand::Quit);
        }
        Ok(parse_page_command(&line))
    }
}

/// Wait up to `timeout_ms` for stdin to become readable.
fn stdin_ready(timeout_ms: i32) -> io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: io::stdin().as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if n < 0 {
        let e = io::Error::last_os_error();
        // Ctrl-C lands here as EINTR; the caller re-checks the token.
        if e.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(e);
    }
    Ok(n > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Paging { page_size: u64, on_page: u64 },
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Transition table of the pagination machine, applied at a page boundary.
pub fn transition(state: PageState, cmd: PageCommand) -> (PageState, Flow) {
    match (state, cmd) {
        (_, PageCommand::Quit) => (state, Flow::Stop),
        (_, PageCommand::All) => (PageState::Unbounded, Flow::Continue),
        (PageState::Paging { page_size, .. }, PageCommand::Continue) => (
            PageState::Paging {
                page_size,
                on_page: 0,
            },
            Flow::Continue,
        ),
        (PageState::Unbounded, PageCommand::Continue) => (PageState::Unbounded, Flow::Continue),
    }
}

/// Per-query pagination state.
#[derive(Debug)]
pub struct Paginator {
    state: PageState,
    flush_every: u64,
}

impl Paginator {
    /// `page_size == 0` starts unbounded.
    pub fn new(page_size: u64) -> Self {
        let state = if page_size == 0 {
            PageState::Unbounded
        } else {
            PageState::Paging {
                page_size,
                on_page: 0,
            }
        };
        Self {
            state,
            flush_every: FLUSH_EVERY,
        }
    }

    /// A pager that never prompts.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    #[cfg(test)]
    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn flush_every(&self) -> u64 {
        self.flush_every
    }

    /// Count one emitted row. Returns true when a page boundary was reached
    /// and the user must be asked how to proceed.
    pub fn record_row(&mut self) -> bool {
        match &mut self.state {
            PageState::Paging { page_size, on_page } => {
                *on_page += 1;
                *on_page >= *page_size
            }
            PageState::Unbounded => false,
        }
    }

    pub fn apply(&mut self, cmd: PageCommand) -> Flow {
        let (next, flow) = transition(self.state, cmd);
        if cmd == PageCommand::All {
            self.flush_every = UNBOUNDED_FLUSH_EVERY;
        }
        self.state = next;
        flow
    }
}
