use crate::cancel::CancelToken;
use crate::client::Engine;
use crate::error::{ConsoleError, ConsoleResult};
use crate::format::StreamOptions;
use crate::pager::PageInput;
use crate::stream::{ResultStreamer, StreamSummary};
use crate::timing::Timer;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one submitted statement.
#[derive(Debug)]
pub enum QueryOutcome {
    Success(StreamSummary),
    Failure(ConsoleError),
    Cancelled,
}

/// Outcome plus wall-clock time from submission until the worker finished.
#[derive(Debug)]
pub struct Report {
    pub outcome: QueryOutcome,
    pub elapsed: Duration,
}

/// One statement ready to run: SQL plus where and how its rows go.
pub struct Submission<W> {
    pub sql: String,
    pub opts: StreamOptions,
    pub out: W,
    pub pages: Option<Box<dyn PageInput>>,
}

/// Run a statement on a worker task while watching `interrupt`.
///
/// If the worker finishes first its result is reported. If `interrupt`
/// resolves first, cancellation is requested from both the worker and the
/// engine, and this still waits for the worker to unwind before returning,
/// so two statements never run at once.
pub async fn execute<W, I>(engine: Arc<dyn Engine>, submission: Submission<W>, interrupt: I) -> Report
where
    W: Write + Send + 'static,
    I: Future<Output = ()>,
{
    let timer = Timer::start();
    let cancel = CancelToken::new();

    let mut worker = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_worker(engine, submission, cancel).await })
    };
    tokio::pin!(interrupt);

    let joined = tokio::select! {
        res = &mut worker => res,
        _ = &mut interrupt => {
            debug!("interrupt received, cancelling query");
            cancel.cancel();
            if let Err(e) = engine.cancel().await {
                warn!("engine cancel request failed: {}", e);
            }
            worker.await
        }
    };

    let outcome = match joined {
        Ok(_) if cancel.is_cancelled() => QueryOutcome::Cancelled,
        Ok(Ok(summary)) => QueryOutcome::Success(summary),
        Ok(Err(ConsoleError::Cancelled)) => QueryOutcome::Cancelled,
        Ok(Err(e)) => QueryOutcome::Failure(e),
        Err(e) => QueryOutcome::Failure(ConsoleError::Statement(format!(
            "query worker failed: {}",
            e
        ))),
    };
    Report {
        outcome,
        elapsed: timer.elapsed(),
    }
}

async fn run_worker<W: Write>(
    engine: Arc<dyn Engine>,
    submission: Submission<W>,
    cancel: CancelToken,
) -> ConsoleResult<StreamSummary> {
    let Submission {
        sql,
        opts,
        out,
        pages,
    } = submission;

    let mut cursor = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ConsoleError::Cancelled),
        cursor = engine.query(&sql) => cursor?,
    };

    let mut streamer = ResultStreamer::new(opts, out, pages, cancel);
    let summary = streamer.stream(cursor.as_mut()).await?;
    streamer.into_inner()?;
    debug!(
        "worker finished: {} rows over {} columns, stopped={}",
        summary.rows,
        summary.columns.len(),
        summary.stopped
    );
    Ok(summary)
}
