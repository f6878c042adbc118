use crate::cancel::CancelToken;
use crate::client::{Row, RowCursor, Value};
use crate::csv::{write_record, CsvOptions};
use crate::error::{ConsoleError, ConsoleResult};
use crate::format::{OutputFormat, StreamOptions, FLUSH_EVERY, OUTPUT_BUFFER_BYTES};
use crate::pager::{Flow, PageCommand, PageInput, Paginator};
use std::fmt::Write as _;
use std::io::{self, BufWriter, Write};
use tracing::debug;

/// What a finished stream produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub columns: Vec<String>,
    pub rows: u64,
    /// The user quit at a pagination prompt before the cursor was exhausted.
    pub stopped: bool,
}

/// Renders a row cursor incrementally. Only the current row is ever held in
/// memory; output goes through a bounded buffer that is flushed periodically
/// and before any pagination prompt.
pub struct ResultStreamer<W: Write> {
    opts: StreamOptions,
    out: BufWriter<W>,
    pages: Option<Box<dyn PageInput>>,
    cancel: CancelToken,
    csv: CsvOptions,
}

impl<W: Write> ResultStreamer<W> {
    /// `pages` enables interactive pagination (table format only).
    pub fn new(
        opts: StreamOptions,
        out: W,
        pages: Option<Box<dyn PageInput>>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            opts,
            out: BufWriter::with_capacity(OUTPUT_BUFFER_BYTES, out),
            pages,
            cancel,
            csv: CsvOptions::default(),
        }
    }

    pub fn into_inner(self) -> ConsoleResult<W> {
        self.out
            .into_inner()
            .map_err(|e| ConsoleError::Io(e.into_error()))
    }

    pub async fn stream(&mut self, cursor: &mut dyn RowCursor) -> ConsoleResult<StreamSummary> {
        let columns = cursor.columns().to_vec();
        debug!(
            "streaming {} columns as {:?} (limit={}, page_size={})",
            columns.len(),
            self.opts.format,
            self.opts.limit,
            self.opts.page_size
        );
        if columns.is_empty() {
            // Statement without a result set: nothing to render.
            while next_row(&self.cancel, cursor).await?.is_some() {}
            return Ok(StreamSummary {
                columns,
                rows: 0,
                stopped: false,
            });
        }
        let (rows, stopped) = match self.opts.format {
            OutputFormat::Table => self.stream_table(&columns, cursor).await?,
            OutputFormat::Json => (self.stream_json(&columns, cursor).await?, false),
            OutputFormat::Csv => (self.stream_csv(&columns, cursor).await?, false),
        };
        self.out.flush()?;
        Ok(StreamSummary {
            columns,
            rows,
            stopped,
        })
    }

    async fn stream_table(
        &mut self,
        columns: &[String],
        cursor: &mut dyn RowCursor,
    ) -> ConsoleResult<(u64, bool)> {
        let mut line = String::with_capacity(256);
        line.push_str(&columns.join("\t"));
        line.push('\n');
        for (i, c) in columns.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&"-".repeat(c.chars().count().max(3)));
        }
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;

        let mut pager = match (&self.pages, self.opts.page_size) {
            (Some(_), size) if size > 0 => Paginator::new(size),
            _ => Paginator::unbounded(),
        };

        let mut emitted = 0u64;
        while !self.opts.limit_reached(emitted) {
            let Some(row) = next_row(&self.cancel, cursor).await? else {
                break;
            };
            line.clear();
            for (i, v) in row.iter().enumerate() {
                if i > 0 {
                    line.push('\t');
                }
                let _ = write!(line, "{}", v);
            }
            line.push('\n');
            self.out.write_all(line.as_bytes())?;
            emitted += 1;

            if self.opts.limit_reached(emitted) {
                break;
            }
            if pager.record_row() {
                self.out.flush()?;
                let Some(pages) = self.pages.take() else {
                    break;
                };
                let cmd = self.ask(pages, emitted).await?;
                if pager.apply(cmd) == Flow::Stop {
                    debug!("pagination stopped after {} rows", emitted);
                    return Ok((emitted, true));
                }
            } else if emitted % pager.flush_every() == 0 {
                self.out.flush()?;
            }
        }
        Ok((emitted, false))
    }

    /// Read a pagination answer on the blocking pool so a user who takes
    /// their time never stalls the runtime. Cancellation wins over the answer.
    async fn ask(&mut self, mut pages: Box<dyn PageInput>, shown: u64) -> ConsoleResult<PageCommand> {
        let cancel = self.cancel.clone();
        let mut read = tokio::task::spawn_blocking(move || {
            let cmd = pages.read_command(shown, &cancel);
            (pages, cmd)
        });
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConsoleError::Cancelled),
            joined = &mut read => {
                let (pages, cmd) = joined
                    .map_err(|e| ConsoleError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
                self.pages = Some(pages);
                Ok(cmd?)
            }
        }
    }

    async fn stream_json(
        &mut self,
        columns: &[String],
        cursor: &mut dyn RowCursor,
    ) -> ConsoleResult<u64> {
        self.out.write_all(b"[\n")?;
        let mut emitted = 0u64;
        while !self.opts.limit_reached(emitted) {
            let Some(row) = next_row(&self.cancel, cursor).await? else {
                break;
            };
            let mut obj = serde_json::Map::new();
            for (col, v) in columns.iter().zip(row) {
                obj.insert(col.clone(), to_json(v));
            }
            if emitted > 0 {
                self.out.write_all(b",\n")?;
            }
            serde_json::to_writer(&mut self.out, &obj).map_err(std::io::Error::from)?;
            emitted += 1;
            if emitted % FLUSH_EVERY == 0 {
                self.out.flush()?;
            }
        }
        self.out.write_all(b"\n]\n")?;
        Ok(emitted)
    }

    async fn stream_csv(
        &mut self,
        columns: &[String],
        cursor: &mut dyn RowCursor,
    ) -> ConsoleResult<u64> {
        write_record(&mut self.out, columns, &self.csv)?;
        self.out.flush()?;

        let mut record: Vec<String> = vec![String::new(); columns.len()];
        let mut emitted = 0u64;
        while !self.opts.limit_reached(emitted) {
            let Some(row) = next_row(&self.cancel, cursor).await? else {
                break;
            };
            for (i, slot) in record.iter_mut().enumerate() {
                slot.clear();
                match row.get(i) {
                    Some(Value::Null) | None => slot.push_str(&self.csv.null_as),
                    Some(v) => {
                        let _ = write!(slot, "{}", v);
                    }
                }
            }
            write_record(&mut self.out, &record, &self.csv)?;
            emitted += 1;
            if emitted % FLUSH_EVERY == 0 {
                self.out.flush()?;
            }
        }
        Ok(emitted)
    }
}

/// Fetch the next row unless cancellation is requested first.
async fn next_row(cancel: &CancelToken, cursor: &mut dyn RowCursor) -> ConsoleResult<Option<Row>> {
    if cancel.is_cancelled() {
        return Err(ConsoleError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConsoleError::Cancelled),
        row = cursor.next_row() => row,
    }
}

fn to_json(v: Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Text(s) => serde_json::Value::String(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{text_rows, FailingCursor, VecCursor};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Answers prompts from a script, then keeps pressing Enter.
    struct Scripted {
        answers: VecDeque<PageCommand>,
        prompts: Arc<AtomicUsize>,
        shown_at: Arc<parking_lot::Mutex<Vec<u64>>>,
    }

    impl Scripted {
        fn new(answers: &[PageCommand]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                prompts: Arc::new(AtomicUsize::new(0)),
                shown_at: Arc::default(),
            }
        }
    }

    impl PageInput for Scripted {
        fn read_command(&mut self, shown: u64, _cancel: &CancelToken) -> io::Result<PageCommand> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.shown_at.lock().push(shown);
            Ok(self.answers.pop_front().unwrap_or(PageCommand::Continue))
        }
    }

    fn opts(format: OutputFormat, limit: u64, page_size: u64) -> StreamOptions {
        StreamOptions {
            format,
            limit,
            page_size,
        }
    }

    async fn run(
        opts: StreamOptions,
        rows: Vec<Row>,
        pages: Option<Scripted>,
    ) -> (String, StreamSummary) {
        let mut cursor = VecCursor::new(&["id", "name"], rows);
        let pages = pages.map(|p| Box::new(p) as Box<dyn PageInput>);
        let mut s = ResultStreamer::new(opts, Vec::new(), pages, CancelToken::new());
        let summary = s.stream(&mut cursor).await.unwrap();
        let out = String::from_utf8(s.into_inner().unwrap()).unwrap();
        (out, summary)
    }

    #[tokio::test]
    async fn test_table_header_separator_and_rows() {
        let rows = vec![
            vec![Value::Text("1".into()), Value::Text("alice".into())],
            vec![Value::Text("2".into()), Value::Null],
        ];
        let (out, summary) = run(opts(OutputFormat::Table, 0, 0), rows, None).await;
        assert_eq!(out, "id\tname\n---\t----\n1\talice\n2\tNULL\n");
        assert_eq!(summary.rows, 2);
        assert!(!summary.stopped);
    }

    #[tokio::test]
    async fn test_pagination_prompts_floor_n_over_p() {
        for p in 1..=7u64 {
            for n in 0..=30usize {
                let script = Scripted::new(&[]);
                let prompts = script.prompts.clone();
                let (out, summary) =
                    run(opts(OutputFormat::Table, 0, p), text_rows(n), Some(script)).await;
                assert_eq!(
                    prompts.load(Ordering::SeqCst) as u64,
                    n as u64 / p,
                    "n={} p={}",
                    n,
                    p
                );
                assert_eq!(summary.rows, n as u64);
                assert_eq!(out.lines().count(), n + 2, "header + separator + rows");
            }
        }
    }

    #[tokio::test]
    async fn test_pagination_quit_stops_at_k() {
        let script = Scripted::new(&[PageCommand::Continue, PageCommand::Quit]);
        let prompts = script.prompts.clone();
        let (out, summary) = run(opts(OutputFormat::Table, 0, 5), text_rows(50), Some(script)).await;
        assert_eq!(summary.rows, 10);
        assert!(summary.stopped);
        assert_eq!(prompts.load(Ordering::SeqCst), 2);
        assert_eq!(out.lines().count(), 12);
    }

    #[tokio::test]
    async fn test_pagination_all_disables_prompts() {
        let script = Scripted::new(&[PageCommand::All]);
        let prompts = script.prompts.clone();
        let (out, summary) = run(opts(OutputFormat::Table, 0, 4), text_rows(41), Some(script)).await;
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        assert_eq!(summary.rows, 41);
        assert_eq!(out.lines().count(), 43);
    }

    #[tokio::test]
    async fn test_prompt_reports_rows_shown() {
        let script = Scripted::new(&[]);
        let shown = script.shown_at.clone();
        run(opts(OutputFormat::Table, 0, 3), text_rows(7), Some(script)).await;
        assert_eq!(*shown.lock(), vec![3, 6]);
    }

    #[tokio::test]
    async fn test_non_interactive_table_never_prompts() {
        let (out, summary) = run(opts(OutputFormat::Table, 0, 5), text_rows(23), None).await;
        assert_eq!(summary.rows, 23);
        assert_eq!(out.lines().count(), 25);
    }

    #[tokio::test]
    async fn test_limit_truncates_every_format() {
        for format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Csv] {
            let (_, summary) = run(opts(format, 7, 0), text_rows(100), None).await;
            assert_eq!(summary.rows, 7, "{:?}", format);
        }
    }

    #[tokio::test]
    async fn test_limit_on_page_boundary_does_not_prompt() {
        let script = Scripted::new(&[]);
        let prompts = script.prompts.clone();
        let (_, summary) = run(opts(OutputFormat::Table, 10, 5), text_rows(30), Some(script)).await;
        assert_eq!(summary.rows, 10);
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_json_is_valid_for_any_row_count() {
        for n in 0..=5usize {
            let (out, summary) = run(opts(OutputFormat::Json, 0, 0), text_rows(n), None).await;
            assert!(out.starts_with("[\n"));
            assert!(out.ends_with("\n]\n"));
            assert_eq!(summary.rows, n as u64);
            assert_eq!(out.matches("},\n{").count(), n.saturating_sub(1));
            let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
            let arr = parsed.as_array().unwrap();
            assert_eq!(arr.len(), n);
            if n > 0 {
                assert_eq!(arr[0]["id"], "0");
                assert_eq!(arr[0]["name"], "row0");
            }
        }
    }

    #[tokio::test]
    async fn test_json_renders_text_as_string_and_null() {
        let rows = vec![vec![Value::Text("\\x726177".into()), Value::Null]];
        let (out, _) = run(opts(OutputFormat::Json, 0, 0), rows, None).await;
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], "\\x726177");
        assert!(parsed[0]["name"].is_null());
    }

    #[tokio::test]
    async fn test_csv_line_count_is_n_plus_one() {
        for n in [0usize, 1, 99, 100, 101, 250] {
            let (out, summary) = run(opts(OutputFormat::Csv, 0, 0), text_rows(n), None).await;
            assert_eq!(out.lines().count(), n + 1);
            assert_eq!(summary.rows, n as u64);
        }
    }

    #[tokio::test]
    async fn test_csv_quotes_and_nulls() {
        let rows = vec![vec![Value::Text("a,b".into()), Value::Null]];
        let (out, _) = run(opts(OutputFormat::Csv, 0, 0), rows, None).await;
        assert_eq!(out, "id,name\n\"a,b\",\n");
    }

    #[tokio::test]
    async fn test_no_result_set_writes_nothing() {
        let mut cursor = VecCursor::new(&[], Vec::new());
        let mut s = ResultStreamer::new(
            opts(OutputFormat::Json, 0, 0),
            Vec::new(),
            None,
            CancelToken::new(),
        );
        let summary = s.stream(&mut cursor).await.unwrap();
        assert_eq!(summary.rows, 0);
        assert!(s.into_inner().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_error_aborts_stream() {
        let mut cursor = FailingCursor {
            columns: vec!["n".into()],
            ok_rows: 3,
            yielded: 0,
        };
        let mut s = ResultStreamer::new(
            opts(OutputFormat::Table, 0, 0),
            Vec::new(),
            None,
            CancelToken::new(),
        );
        let err = s.stream(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Scan(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_stream() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut cursor = VecCursor::new(&["id"], text_rows(10));
        let mut s = ResultStreamer::new(opts(OutputFormat::Csv, 0, 0), Vec::new(), None, cancel);
        let err = s.stream(&mut cursor).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    /// Writer that only records how much it was handed and in what sizes.
    #[derive(Default)]
    struct Chunks {
        total: usize,
        largest: usize,
    }

    impl Write for Chunks {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.total += buf.len();
            self.largest = self.largest.max(buf.len());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_json_memory_does_not_grow_with_rows() {
        let mut cursor = VecCursor::new(&["id", "name"], text_rows(10_000));
        let mut s = ResultStreamer::new(
            opts(OutputFormat::Json, 0, 0),
            Chunks::default(),
            None,
            CancelToken::new(),
        );
        let summary = s.stream(&mut cursor).await.unwrap();
        assert_eq!(summary.rows, 10_000);
        assert_eq!(s.out.capacity(), OUTPUT_BUFFER_BYTES);
        assert!(s.out.buffer().is_empty());

        let sink = s.into_inner().unwrap();
        assert!(sink.total > 2 * OUTPUT_BUFFER_BYTES);
        assert!(sink.largest <= OUTPUT_BUFFER_BYTES);
    }

    /// Waits for an answer that never comes until the query is cancelled.
    struct Silent;

    impl PageInput for Silent {
        fn read_command(&mut self, _shown: u64, cancel: &CancelToken) -> io::Result<PageCommand> {
            while !cancel.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Ok(PageCommand::Quit)
        }
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_at_page_prompt() {
        let cancel = CancelToken::new();
        let mut cursor = VecCursor::new(&["id", "name"], text_rows(50));
        let mut s = ResultStreamer::new(
            opts(OutputFormat::Table, 0, 5),
            Vec::new(),
            Some(Box::new(Silent) as Box<dyn PageInput>),
            cancel.clone(),
        );
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            cancel.cancel();
        });
        let err = s.stream(&mut cursor).await.unwrap_err();
        assert!(err.is_cancelled());
        trigger.await.unwrap();
        let out = String::from_utf8(s.into_inner().unwrap()).unwrap();
        assert_eq!(out.lines().count(), 2 + 5);
    }
}
