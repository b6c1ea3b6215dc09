#![forbid(unsafe_code)]

use super::{Effect, Outcome, Query, Step};
use crate::bounds::ScanBounds;
use crate::error::StoreError;
use ps_core::{Row, RowId};

/// A query that issues one effect and returns its outcome.
#[derive(Debug)]
pub struct Single {
    effect: Option<Effect>,
}

impl Query for Single {
    type Output = Outcome;

    fn resume(&mut self, input: Outcome) -> Result<Step<Outcome>, StoreError> {
        match self.effect.take() {
            Some(effect) => Ok(Step::Effect(effect)),
            None => Ok(Step::Done(input)),
        }
    }
}

pub fn effect(effect: Effect) -> Single {
    Single {
        effect: Some(effect),
    }
}

pub fn scan(table: impl Into<String>, index: impl Into<String>, bounds: ScanBounds) -> Single {
    effect(Effect::Scan {
        table: table.into(),
        index: index.into(),
        bounds,
    })
}

pub fn get(table: impl Into<String>, id: impl Into<RowId>) -> Single {
    effect(Effect::Get {
        table: table.into(),
        id: id.into(),
    })
}

pub fn insert(table: impl Into<String>, rows: Vec<Row>) -> Single {
    effect(Effect::Insert {
        table: table.into(),
        rows,
    })
}

pub fn update(table: impl Into<String>, rows: Vec<Row>) -> Single {
    effect(Effect::Update {
        table: table.into(),
        rows,
    })
}

pub fn delete(table: impl Into<String>, ids: Vec<RowId>) -> Single {
    effect(Effect::Delete {
        table: table.into(),
        ids,
    })
}

/// Finishes immediately with a value, touching no backend.
#[derive(Debug)]
pub struct Pure<T>(Option<T>);

pub fn pure<T: Send>(value: T) -> Pure<T> {
    Pure(Some(value))
}

impl<T: Send> Query for Pure<T> {
    type Output = T;

    fn resume(&mut self, _input: Outcome) -> Result<Step<T>, StoreError> {
        self.0
            .take()
            .map(Step::Done)
            .ok_or(StoreError::InvalidInput("query resumed after completion"))
    }
}

pub struct Map<Q, F> {
    query: Q,
    f: Option<F>,
}

impl<Q, F, U> Query for Map<Q, F>
where
    Q: Query,
    F: FnOnce(Q::Output) -> Result<U, StoreError> + Send,
    U: Send,
{
    type Output = U;

    fn resume(&mut self, input: Outcome) -> Result<Step<U>, StoreError> {
        match self.query.resume(input)?.pass() {
            Ok(step) => Ok(step),
            Err(value) => {
                let f = self
                    .f
                    .take()
                    .ok_or(StoreError::InvalidInput("query resumed after completion"))?;
                f(value).map(Step::Done)
            }
        }
    }
}

enum ThenState<A, B, F> {
    First(A, F),
    Second(B),
    Poisoned,
}

/// Runs `A`, builds `B` from its output, then runs `B` in the same sequence.
pub struct Then<A, B, F> {
    state: ThenState<A, B, F>,
}

impl<A, B, F> Query for Then<A, B, F>
where
    A: Query,
    B: Query,
    F: FnOnce(A::Output) -> Result<B, StoreError> + Send,
{
    type Output = B::Output;

    fn resume(&mut self, input: Outcome) -> Result<Step<B::Output>, StoreError> {
        match &mut self.state {
            ThenState::First(first, _) => {
                let value = match first.resume(input)?.pass() {
                    Ok(step) => return Ok(step),
                    Err(value) => value,
                };
                let ThenState::First(_, f) = std::mem::replace(&mut self.state, ThenState::Poisoned)
                else {
                    return Err(StoreError::InvalidInput("query state corrupted"));
                };
                let mut second = f(value)?;
                let step = second.resume(Outcome::Unit);
                self.state = ThenState::Second(second);
                step
            }
            ThenState::Second(second) => second.resume(input),
            ThenState::Poisoned => Err(StoreError::InvalidInput("query resumed after failure")),
        }
    }
}

pub trait QueryExt: Query + Sized {
    fn map<F, U>(self, f: F) -> Map<Self, F>
    where
        F: FnOnce(Self::Output) -> Result<U, StoreError> + Send,
    {
        Map {
            query: self,
            f: Some(f),
        }
    }

    fn then<F, B>(self, f: F) -> Then<Self, B, F>
    where
        B: Query,
        F: FnOnce(Self::Output) -> Result<B, StoreError> + Send,
    {
        Then {
            state: ThenState::First(self, f),
        }
    }
}

impl<Q: Query> QueryExt for Q {}
