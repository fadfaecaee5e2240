//! Streaming result cursors
//!
//! A [`StreamCursor`] owns a live stream from the port until the stream
//! ends, the cursor is closed, or the cursor is dropped. Whichever exit
//! path is taken, the stream is released exactly once; releasing a stream
//! that has not ended asks the port to cancel it.

use std::collections::VecDeque;
use std::sync::Arc;

use shardgate_core::{Context, Error, Field, QueryResult, Result, Row};
use tracing::debug;

use crate::output::RowStream;
use crate::port::ExecutionPort;
use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Open,
    Exhausted,
    /// The stream delivered an error; the cursor cannot be advanced again
    Failed,
    Closed,
}

/// A live stream plus what is needed to release it
struct Lease {
    port: Arc<dyn ExecutionPort>,
    stats: Arc<Stats>,
    stream: RowStream,
}

impl Lease {
    fn release(mut self, ended: bool) {
        self.stream.close();
        if !ended {
            self.port.cancel(self.stream.id());
        }
        self.stats.stream_released();
        debug!(
            target: "shardgate::stream",
            request = %self.stream.id(),
            ended,
            "Stream released"
        );
    }
}

/// Lazily advanced cursor over a streaming execution
///
/// Column metadata is available from the first chunk on. Rows are not
/// restartable: each row is yielded once. After [`StreamCursor::close`]
/// every advance fails with a programming error.
pub struct StreamCursor {
    lease: Option<Lease>,
    fields: Vec<Field>,
    buffered: VecDeque<Row>,
    state: CursorState,
}

impl StreamCursor {
    /// A cursor with no rows that holds no stream
    pub(crate) fn exhausted() -> Self {
        Self {
            lease: None,
            fields: Vec::new(),
            buffered: VecDeque::new(),
            state: CursorState::Exhausted,
        }
    }

    /// Take ownership of `stream` and wait for its first chunk
    pub(crate) async fn open(
        ctx: &Context,
        port: Arc<dyn ExecutionPort>,
        stats: Arc<Stats>,
        stream: RowStream,
    ) -> Result<Self> {
        stats.stream_opened();
        debug!(target: "shardgate::stream", request = %stream.id(), "Stream opened");

        let mut cursor = Self {
            lease: Some(Lease {
                port,
                stats,
                stream,
            }),
            fields: Vec::new(),
            buffered: VecDeque::new(),
            state: CursorState::Open,
        };
        // On failure the cursor is dropped here, which releases the stream.
        cursor.advance(ctx).await?;
        Ok(cursor)
    }

    /// Column metadata
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Check if every row has been yielded
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted && self.buffered.is_empty()
    }

    /// Check if [`StreamCursor::close`] was called
    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Next row, or `None` once the stream has ended
    ///
    /// Waits for the next chunk when no rows are buffered. If `ctx` fires
    /// while waiting, the stream is released and the cursor is closed.
    pub async fn next_row(&mut self, ctx: &Context) -> Result<Option<Row>> {
        loop {
            match self.state {
                CursorState::Closed => return Err(Error::programming("stream cursor is closed")),
                CursorState::Failed => {
                    return Err(Error::programming("stream cursor already failed"))
                }
                _ => {}
            }
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }
            if self.state == CursorState::Exhausted {
                return Ok(None);
            }
            self.advance(ctx).await?;
        }
    }

    /// Read the remaining rows into one result
    pub async fn collect(mut self, ctx: &Context) -> Result<QueryResult> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row(ctx).await? {
            rows.push(row);
        }
        Ok(QueryResult {
            fields: std::mem::take(&mut self.fields),
            rows,
            ..QueryResult::default()
        })
    }

    /// Release the stream and stop the cursor
    ///
    /// Idempotent: the stream is released at most once.
    pub fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        let ended = self.state == CursorState::Exhausted;
        if let Some(lease) = self.lease.take() {
            lease.release(ended);
        }
        self.buffered.clear();
        self.state = CursorState::Closed;
    }

    /// Receive one chunk into the buffer
    async fn advance(&mut self, ctx: &Context) -> Result<()> {
        let lease = match self.lease.as_mut() {
            Some(lease) => lease,
            None => {
                self.state = CursorState::Exhausted;
                return Ok(());
            }
        };

        let received = tokio::select! {
            biased;
            chunk = lease.stream.recv() => Ok(chunk),
            cause = ctx.done() => Err(cause),
        };
        let chunk = match received {
            Ok(chunk) => chunk,
            Err(cause) => {
                self.close();
                return Err(Error::cancelled(cause));
            }
        };

        match chunk {
            Some(Ok(result)) => {
                if self.fields.is_empty() {
                    self.fields = result.fields;
                }
                self.buffered.extend(result.rows);
                Ok(())
            }
            Some(Err(e)) => {
                self.finish(false);
                self.state = CursorState::Failed;
                Err(e)
            }
            None => {
                self.finish(true);
                Ok(())
            }
        }
    }

    fn finish(&mut self, ended: bool) {
        if let Some(lease) = self.lease.take() {
            lease.release(ended);
        }
        self.state = CursorState::Exhausted;
    }
}

impl Drop for StreamCursor {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release(false);
        }
    }
}

impl std::fmt::Debug for StreamCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCursor")
            .field("state", &self.state)
            .field("fields", &self.fields.len())
            .field("buffered", &self.buffered.len())
            .finish()
    }
}
