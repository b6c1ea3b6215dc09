#![forbid(unsafe_code)]

//! Hybrid logical clock.
//!
//! Tokens render as `{epochMillis}-{counter:04}-{clientId}` and compare as plain
//! strings. The counter restarts at zero whenever the millisecond advances and
//! carries into the millisecond once it passes [`MAX_COUNTER`].

use crate::ids::ClientId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const MAX_COUNTER: u32 = 9999;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockToken(String);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("clock token is malformed: {0}")]
    Malformed(String),
    #[error("clock token millis are out of range: {0}")]
    MillisOutOfRange(String),
    #[error("clock token counter must be four digits: {0}")]
    BadCounter(String),
    #[error("clock token has an invalid client id: {0}")]
    BadClientId(String),
}

impl ClockToken {
    pub fn from_parts(millis: u64, counter: u32, client_id: &ClientId) -> Self {
        Self(format!("{millis}-{counter:04}-{client_id}"))
    }

    pub fn parse(value: &str) -> Result<Self, ClockError> {
        let (millis, counter, client) = split(value)?;
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClockError::Malformed(value.to_string()));
        }
        millis
            .parse::<u64>()
            .map_err(|_| ClockError::MillisOutOfRange(value.to_string()))?;
        if counter.len() != 4 || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClockError::BadCounter(value.to_string()));
        }
        ClientId::try_new(client).map_err(|_| ClockError::BadClientId(value.to_string()))?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn millis(&self) -> u64 {
        split(&self.0)
            .ok()
            .and_then(|(millis, _, _)| millis.parse().ok())
            .unwrap_or(0)
    }

    pub fn counter(&self) -> u32 {
        split(&self.0)
            .ok()
            .and_then(|(_, counter, _)| counter.parse().ok())
            .unwrap_or(0)
    }

    pub fn client_id(&self) -> &str {
        split(&self.0).map(|(_, _, client)| client).unwrap_or("")
    }
}

fn split(value: &str) -> Result<(&str, &str, &str), ClockError> {
    let mut parts = value.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(millis), Some(counter), Some(client)) => Ok((millis, counter, client)),
        _ => Err(ClockError::Malformed(value.to_string())),
    }
}

impl TryFrom<String> for ClockToken {
    type Error = ClockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClockToken> for String {
    fn from(value: ClockToken) -> Self {
        value.0
    }
}

impl std::fmt::Display for ClockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of wall time in epoch milliseconds.
pub trait WallClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> u64 {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        u64::try_from(nanos / 1_000_000).unwrap_or(0)
    }
}

/// Wall clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl<W: WallClock + ?Sized> WallClock for std::sync::Arc<W> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

#[derive(Debug)]
pub struct HybridClock<W = SystemClock> {
    client_id: ClientId,
    wall: W,
    last_millis: u64,
    counter: u32,
}

impl HybridClock<SystemClock> {
    pub fn system(client_id: ClientId) -> Self {
        Self::new(client_id, SystemClock)
    }
}

impl<W: WallClock> HybridClock<W> {
    pub fn new(client_id: ClientId, wall: W) -> Self {
        Self {
            client_id,
            wall,
            last_millis: 0,
            counter: 0,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Issues a token strictly greater than every token this clock issued or observed.
    pub fn tick(&mut self) -> ClockToken {
        let wall = self.wall.now_millis();
        if wall > self.last_millis {
            self.last_millis = wall;
            self.counter = 0;
        } else {
            self.bump();
        }
        ClockToken::from_parts(self.last_millis, self.counter, &self.client_id)
    }

    /// Folds a remote token into the local state so the next `tick` sorts after it.
    pub fn observe(&mut self, remote: &ClockToken) {
        let millis = remote.millis();
        let counter = remote.counter();
        if millis > self.last_millis || (millis == self.last_millis && counter > self.counter) {
            self.last_millis = millis;
            self.counter = counter;
        }
    }

    /// At `u64::MAX` millis with a full counter the clock stops advancing.
    fn bump(&mut self) {
        if self.counter < MAX_COUNTER {
            self.counter += 1;
        } else if let Some(next) = self.last_millis.checked_add(1) {
            self.last_millis = next;
            self.counter = 0;
        }
    }
}
