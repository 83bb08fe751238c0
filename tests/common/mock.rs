use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sql_mapper::driver::{Command, CommandCanceller, RawConnection, RowCursor};
use sql_mapper::results::ColumnSet;
use sql_mapper::types::{RowValues, TxId};
use sql_mapper::SqlMapperError;

/// Counters and recorded commands, shared between a mock connection and the test.
#[derive(Default)]
pub struct MockState {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub executes: AtomicUsize,
    pub queries: AtomicUsize,
    pub cancels: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub rows_read: AtomicUsize,
    interrupted: AtomicBool,
    commands: Mutex<Vec<Command>>,
}

impl MockState {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("commands lock").clone()
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// What the mock does when asked to run a command.
#[derive(Clone, Default)]
pub struct MockBehavior {
    /// Blocking time per command, interruptible by the canceller
    pub latency: Duration,
    /// Blocking time before each row
    pub row_latency: Duration,
    pub fail_with: Option<String>,
    pub fail_close: bool,
    pub affected: usize,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<RowValues>>,
}

pub struct MockConnection {
    state: Arc<MockState>,
    behavior: MockBehavior,
    open: bool,
    next_tx: TxId,
}

impl MockConnection {
    pub fn new(behavior: MockBehavior) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let conn = Self {
            state: Arc::clone(&state),
            behavior,
            open: false,
            next_tx: 0,
        };
        (conn, state)
    }

    pub fn opened(behavior: MockBehavior) -> (Self, Arc<MockState>) {
        let (mut conn, state) = Self::new(behavior);
        conn.open = true;
        (conn, state)
    }

    fn start(&self, command: &Command) -> Result<(), SqlMapperError> {
        if !self.open {
            return Err(SqlMapperError::ConnectionError("mock connection is closed".into()));
        }
        self.state.interrupted.store(false, Ordering::SeqCst);
        self.state
            .commands
            .lock()
            .expect("commands lock")
            .push(command.clone());
        wait(&self.state, self.behavior.latency)?;
        match &self.behavior.fail_with {
            Some(message) => Err(SqlMapperError::ExecutionError(message.clone())),
            None => Ok(()),
        }
    }
}

// Sleep in small steps, failing as soon as the canceller fires.
fn wait(state: &MockState, total: Duration) -> Result<(), SqlMapperError> {
    let deadline = Instant::now() + total;
    loop {
        if state.interrupted() {
            return Err(SqlMapperError::ExecutionError("interrupted".into()));
        }
        if Instant::now() >= deadline {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(2));
    }
}

struct MockCanceller(Arc<MockState>);

impl CommandCanceller for MockCanceller {
    fn cancel(&self) -> Result<(), SqlMapperError> {
        self.0.cancels.fetch_add(1, Ordering::SeqCst);
        self.0.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCursor<'a> {
    state: &'a MockState,
    columns: ColumnSet,
    rows: &'a [Vec<RowValues>],
    row_latency: Duration,
    at: usize,
    exhausted: bool,
}

impl RowCursor for MockCursor<'_> {
    fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    fn advance(&mut self) -> Result<Option<&[RowValues]>, SqlMapperError> {
        wait(self.state, self.row_latency)?;
        if self.at >= self.rows.len() {
            self.exhausted = true;
            return Ok(None);
        }
        self.at += 1;
        self.state.rows_read.fetch_add(1, Ordering::SeqCst);
        Ok(Some(&self.rows[self.at - 1]))
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl RawConnection for MockConnection {
    fn provider(&self) -> &'static str {
        "mock"
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), SqlMapperError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
        if self.behavior.fail_close {
            return Err(SqlMapperError::ConnectionError("close failed".into()));
        }
        Ok(())
    }

    fn canceller(&self) -> Option<Arc<dyn CommandCanceller>> {
        Some(Arc::new(MockCanceller(Arc::clone(&self.state))))
    }

    fn execute(&mut self, command: &Command) -> Result<usize, SqlMapperError> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        self.start(command)?;
        Ok(self.behavior.affected)
    }

    fn query<R, F>(&mut self, command: &Command, consume: F) -> Result<R, SqlMapperError>
    where
        F: FnOnce(&mut dyn RowCursor) -> Result<R, SqlMapperError>,
    {
        self.state.queries.fetch_add(1, Ordering::SeqCst);
        self.start(command)?;
        let mut cursor = MockCursor {
            state: &self.state,
            columns: ColumnSet::from_names(self.behavior.columns.iter().copied()),
            rows: &self.behavior.rows,
            row_latency: self.behavior.row_latency,
            at: 0,
            exhausted: false,
        };
        consume(&mut cursor)
    }

    fn execute_script(&mut self, _script: &str) -> Result<(), SqlMapperError> {
        Ok(())
    }

    fn begin(&mut self) -> Result<TxId, SqlMapperError> {
        self.next_tx += 1;
        Ok(self.next_tx)
    }

    fn commit(&mut self, _tx: TxId) -> Result<(), SqlMapperError> {
        Ok(())
    }

    fn rollback(&mut self, _tx: TxId) -> Result<(), SqlMapperError> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rows `(Id, Name)` numbered `1..=count`.
pub fn numbered_rows(count: i64) -> Vec<Vec<RowValues>> {
    (1..=count)
        .map(|i| vec![RowValues::Int(i), RowValues::Text(format!("row-{i}"))])
        .collect()
}
