#![forbid(unsafe_code)]

//! Backend-agnostic query runner.
//!
//! A [`Query`] is an explicit state machine: each call to [`Query::resume`] gets the
//! result of the previous step and returns the next one. [`run`] drives it against an
//! [`Executor`]. Against an executor that always resolves immediately the run completes
//! inline and never suspends; against one that returns pending futures the run suspends
//! at that effect and continues inside the returned future. Steps of one query never
//! interleave, and the first error ends the run.

mod build;
mod exec;

pub use build::{Map, Pure, QueryExt, Single, Then, delete, effect, get, insert, pure, scan, update};
pub use exec::{Blocking, Immediate, apply};

use crate::bounds::ScanBounds;
use crate::error::StoreError;
use ps_core::{Row, RowId};
use std::future::{Future, IntoFuture};
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One backend operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Scan {
        table: String,
        index: String,
        bounds: ScanBounds,
    },
    Get {
        table: String,
        id: RowId,
    },
    Insert {
        table: String,
        rows: Vec<Row>,
    },
    Update {
        table: String,
        rows: Vec<Row>,
    },
    Delete {
        table: String,
        ids: Vec<RowId>,
    },
    /// Runs the inner effects in order inside one backend transaction.
    Batch(Vec<Effect>),
}

/// Result of a step, fed back into the query.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Unit,
    Rows(Vec<Row>),
    Row(Option<Row>),
    Affected(usize),
    Batch(Vec<Outcome>),
}

impl Outcome {
    pub fn into_rows(self) -> Result<Vec<Row>, StoreError> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            _ => Err(StoreError::InvalidInput("expected rows")),
        }
    }

    pub fn into_row(self) -> Result<Option<Row>, StoreError> {
        match self {
            Outcome::Row(row) => Ok(row),
            _ => Err(StoreError::InvalidInput("expected a row")),
        }
    }

    pub fn into_affected(self) -> Result<usize, StoreError> {
        match self {
            Outcome::Affected(count) => Ok(count),
            _ => Err(StoreError::InvalidInput("expected an affected count")),
        }
    }

    pub fn into_batch(self) -> Result<Vec<Outcome>, StoreError> {
        match self {
            Outcome::Batch(outcomes) => Ok(outcomes),
            _ => Err(StoreError::InvalidInput("expected a batch")),
        }
    }
}

pub enum Step<T> {
    /// A value available now; fed straight back without touching the backend.
    Immediate(Outcome),
    /// A backend operation; the runner may suspend here.
    Effect(Effect),
    /// A nested query. Its final outcome is fed back as this step's result.
    Delegate(Box<dyn Query<Output = Outcome>>),
    Done(T),
}

impl<T> Step<T> {
    /// Maps a non-final step to another output type. `Done` is handed back unchanged.
    pub(crate) fn pass<U>(self) -> Result<Step<U>, T> {
        match self {
            Step::Immediate(outcome) => Ok(Step::Immediate(outcome)),
            Step::Effect(effect) => Ok(Step::Effect(effect)),
            Step::Delegate(query) => Ok(Step::Delegate(query)),
            Step::Done(value) => Err(value),
        }
    }
}

impl<T> std::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Immediate(outcome) => f.debug_tuple("Immediate").field(outcome).finish(),
            Step::Effect(effect) => f.debug_tuple("Effect").field(effect).finish(),
            Step::Delegate(_) => f.write_str("Delegate(..)"),
            Step::Done(_) => f.write_str("Done(..)"),
        }
    }
}

pub trait Query: Send {
    type Output: Send;

    /// Advances the query. The first call receives `Outcome::Unit`.
    fn resume(&mut self, input: Outcome) -> Result<Step<Self::Output>, StoreError>;

    fn boxed(self) -> Box<dyn Query<Output = Self::Output>>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl<Q: Query + ?Sized> Query for Box<Q> {
    type Output = Q::Output;

    fn resume(&mut self, input: Outcome) -> Result<Step<Self::Output>, StoreError> {
        (**self).resume(input)
    }
}

/// Resolves one effect, now or later.
pub enum Resolution {
    Ready(Result<Outcome, StoreError>),
    Pending(BoxFuture<'static, Result<Outcome, StoreError>>),
}

pub trait Executor: Send {
    fn execute(&mut self, effect: Effect) -> Resolution;
}

enum Advance<T> {
    Effect(Effect),
    Done(T),
}

/// The running query plus the stack of delegated queries it is waiting on.
struct Machine<T> {
    top: Box<dyn Query<Output = T>>,
    frames: Vec<Box<dyn Query<Output = Outcome>>>,
}

impl<T: Send> Machine<T> {
    fn new(top: Box<dyn Query<Output = T>>) -> Self {
        Self {
            top,
            frames: Vec::new(),
        }
    }

    /// Feeds `input` to the innermost frame and keeps going until a backend effect
    /// is needed or the top query finishes.
    fn advance(&mut self, mut input: Outcome) -> Result<Advance<T>, StoreError> {
        loop {
            let step = match self.frames.last_mut() {
                Some(frame) => match frame.resume(input)?.pass::<T>() {
                    Ok(step) => step,
                    Err(outcome) => {
                        self.frames.pop();
                        input = outcome;
                        continue;
                    }
                },
                None => self.top.resume(input)?,
            };
            match step {
                Step::Immediate(outcome) => input = outcome,
                Step::Effect(effect) => return Ok(Advance::Effect(effect)),
                Step::Delegate(query) => {
                    self.frames.push(query);
                    input = Outcome::Unit;
                }
                Step::Done(value) => return Ok(Advance::Done(value)),
            }
        }
    }
}

/// State of a run after its synchronous prefix.
pub enum Run<'a, T> {
    /// Every effect resolved immediately.
    Complete(Result<T, StoreError>),
    /// An effect is pending; the future finishes the remaining steps.
    Suspended(BoxFuture<'a, Result<T, StoreError>>),
}

impl<T> Run<'_, T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Run::Complete(_))
    }
}

impl<T> std::fmt::Debug for Run<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Run::Complete(_) => f.write_str("Complete(..)"),
            Run::Suspended(_) => f.write_str("Suspended(..)"),
        }
    }
}

impl<'a, T: Send + 'a> IntoFuture for Run<'a, T> {
    type Output = Result<T, StoreError>;
    type IntoFuture = BoxFuture<'a, Result<T, StoreError>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Run::Complete(result) => Box::pin(std::future::ready(result)),
            Run::Suspended(future) => future,
        }
    }
}

pub fn run<'a, Q, E>(query: Q, executor: &'a mut E) -> Run<'a, Q::Output>
where
    Q: Query + 'static,
    Q::Output: 'static,
    E: Executor,
{
    let mut machine = Machine::new(Box::new(query));
    let mut input = Outcome::Unit;
    loop {
        let effect = match machine.advance(input) {
            Ok(Advance::Effect(effect)) => effect,
            Ok(Advance::Done(value)) => return Run::Complete(Ok(value)),
            Err(err) => return Run::Complete(Err(err)),
        };
        match executor.execute(effect) {
            Resolution::Ready(Ok(outcome)) => input = outcome,
            Resolution::Ready(Err(err)) => return Run::Complete(Err(err)),
            pending @ Resolution::Pending(_) => {
                return Run::Suspended(Box::pin(finish(machine, pending, executor)));
            }
        }
    }
}

async fn finish<T: Send, E: Executor>(
    mut machine: Machine<T>,
    mut resolution: Resolution,
    executor: &mut E,
) -> Result<T, StoreError> {
    loop {
        let input = match resolution {
            Resolution::Ready(result) => result?,
            Resolution::Pending(future) => future.await?,
        };
        match machine.advance(input)? {
            Advance::Done(value) => return Ok(value),
            Advance::Effect(effect) => resolution = executor.execute(effect),
        }
    }
}

/// Runs a query that must not suspend, such as one against [`Immediate`].
pub fn run_sync<Q, E>(query: Q, executor: &mut E) -> Result<Q::Output, StoreError>
where
    Q: Query + 'static,
    Q::Output: 'static,
    E: Executor,
{
    match run(query, executor) {
        Run::Complete(result) => result,
        Run::Suspended(_) => Err(StoreError::InvalidInput(
            "query suspended on a synchronous run",
        )),
    }
}
