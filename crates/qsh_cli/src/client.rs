use crate::error::{ConsoleError, ConsoleResult};
use async_trait::async_trait;
use futures::{future, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tracing::{debug, warn};

/// A single cell. The engine delivers every non-NULL cell in its text form,
/// binary columns included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

pub type Row = Vec<Value>;

/// Rows of one statement, fetched lazily. Dropping the cursor closes it.
#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[String];

    /// Next row, or `None` once the result is exhausted.
    async fn next_row(&mut self) -> ConsoleResult<Option<Row>>;
}

/// Handle to the remote query engine, bound to one database.
#[async_trait]
pub trait Engine: Send + Sync {
    fn database(&self) -> &str;

    async fn query(&self, sql: &str) -> ConsoleResult<Box<dyn RowCursor>>;

    /// Ask the engine to stop whatever request is in flight on this handle.
    async fn cancel(&self) -> ConsoleResult<()>;

    /// A new handle with the same credentials, bound to `database`.
    async fn bind(&self, database: &str) -> ConsoleResult<Arc<dyn Engine>>;
}

/// Run `sql` and collect the first column of every row as text.
/// Used for catalog lookups (table and schema names).
pub async fn first_column(engine: &dyn Engine, sql: &str) -> ConsoleResult<Vec<String>> {
    let mut cursor = engine.query(sql).await?;
    let mut out = Vec::new();
    while let Some(row) = cursor.next_row().await? {
        match row.into_iter().next() {
            Some(Value::Null) | None => {}
            Some(v) => out.push(v.to_string()),
        }
    }
    Ok(out)
}

/// Connection parameters for `PgEngine`.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

/// Engine backed by a PostgreSQL-protocol endpoint. Statements go through the
/// simple-query protocol verbatim and rows are streamed as they arrive.
pub struct PgEngine {
    client: Client,
    settings: ConnectSettings,
}

impl PgEngine {
    pub async fn connect(settings: ConnectSettings) -> ConsoleResult<Self> {
        debug!(
            "Connecting: host={} port={} user={} database={}",
            settings.host, settings.port, settings.user, settings.database
        );

        let mut config = tokio_postgres::Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .dbname(&settings.database)
            .application_name("qsh");
        if let Some(pw) = settings.password.as_deref() {
            config.password(pw);
        }

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            ConsoleError::Connection(format!(
                "cannot connect to {}:{}/{}: {}",
                settings.host, settings.port, settings.database, e
            ))
        })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection error: {}", e);
            }
        });

        Ok(Self { client, settings })
    }
}

#[async_trait]
impl Engine for PgEngine {
    fn database(&self) -> &str {
        &self.settings.database
    }

    async fn query(&self, sql: &str) -> ConsoleResult<Box<dyn RowCursor>> {
        debug!("query: {}", sql);
        let stream = self
            .client
            .simple_query_raw(sql)
            .await
            .map_err(classify_error)?;
        let mut cursor = PgCursor {
            stream: Box::pin(first_result(stream)),
            columns: Vec::new(),
            pending: None,
        };
        cursor.prime().await?;
        Ok(Box::new(cursor))
    }

    async fn cancel(&self) -> ConsoleResult<()> {
        debug!("cancel requested on {}", self.settings.database);
        self.client
            .cancel_token()
            .cancel_query(NoTls)
            .await
            .map_err(|e| ConsoleError::Connection(e.to_string()))
    }

    async fn bind(&self, database: &str) -> ConsoleResult<Arc<dyn Engine>> {
        let settings = ConnectSettings {
            database: database.to_string(),
            ..self.settings.clone()
        };
        let engine = PgEngine::connect(settings).await?;
        Ok(Arc::new(engine))
    }
}

type Messages = Pin<Box<dyn Stream<Item = Result<SimpleQueryMessage, tokio_postgres::Error>> + Send>>;

/// End a simple-query response at the first CommandComplete. A batch like
/// `select 1; select 2` shows only the first statement's rows instead of
/// running the later result sets on under the first header.
fn first_result<S, E>(messages: S) -> impl Stream<Item = Result<SimpleQueryMessage, E>>
where
    S: Stream<Item = Result<SimpleQueryMessage, E>>,
{
    messages.take_while(|msg| {
        future::ready(!matches!(msg, Ok(SimpleQueryMessage::CommandComplete(_))))
    })
}

struct PgCursor {
    stream: Messages,
    columns: Vec<String>,
    pending: Option<SimpleQueryRow>,
}

impl PgCursor {
    /// Read ahead until the column names are known or the result ends.
    async fn prime(&mut self) -> ConsoleResult<()> {
        while let Some(msg) = self.stream.next().await {
            match msg.map_err(classify_error)? {
                SimpleQueryMessage::RowDescription(cols) => {
                    self.columns = cols.iter().map(|c| c.name().to_string()).collect();
                    return Ok(());
                }
                SimpleQueryMessage::Row(row) => {
                    self.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    self.pending = Some(row);
                    return Ok(());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn convert_row(row: &SimpleQueryRow) -> Row {
    (0..row.len())
        .map(|i| match row.get(i) {
            Some(s) => Value::Text(s.to_string()),
            None => Value::Null,
        })
        .collect()
}

#[async_trait]
impl RowCursor for PgCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> ConsoleResult<Option<Row>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(convert_row(&row)));
        }
        while let Some(msg) = self.stream.next().await {
            let msg = msg.map_err(|e| match classify_error(e) {
                ConsoleError::Cancelled => ConsoleError::Cancelled,
                other => ConsoleError::Scan(other.to_string()),
            })?;
            if let SimpleQueryMessage::Row(row) = msg {
                return Ok(Some(convert_row(&row)));
            }
        }
        Ok(None)
    }
}

fn classify_error(e: tokio_postgres::Error) -> ConsoleError {
    if let Some(db) = e.as_db_error() {
        if *db.code() == SqlState::QUERY_CANCELED {
            return ConsoleError::Cancelled;
        }
        return ConsoleError::Statement(db.message().to_string());
    }
    ConsoleError::Connection(e.to_string())
}
