#![forbid(unsafe_code)]

pub mod change;
pub mod clock;
pub mod codec;
pub mod model;
pub mod row;
pub mod schema;
pub mod value;

pub use change::ChangeRecord;
pub use clock::{ClockError, ClockToken, HybridClock, ManualClock, SystemClock, WallClock};
pub use row::{Row, RowId};
pub use schema::{IDS_INDEX, IndexDef, SchemaError, TableDef};
pub use value::{KeyPart, Tuple, Value, compare_key_parts, compare_tuple, compare_value};

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientId(String);

    impl ClientId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn into_string(self) -> String {
            self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, ClientIdError> {
            let value = value.into();
            validate_client_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for ClientId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
    pub enum ClientIdError {
        #[error("client id must not be empty")]
        Empty,
        #[error("client id is too long")]
        TooLong,
        #[error("client id must start with an ascii letter or digit")]
        InvalidFirstChar,
        #[error("client id contains invalid char {ch:?} at {index}")]
        InvalidChar { ch: char, index: usize },
    }

    fn validate_client_id(value: &str) -> Result<(), ClientIdError> {
        if value.is_empty() {
            return Err(ClientIdError::Empty);
        }
        if value.len() > 64 {
            return Err(ClientIdError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(ClientIdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(ClientIdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate().skip(1) {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                continue;
            }
            return Err(ClientIdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    /// Table, index and column names end up inlined into SQL, so they are
    /// restricted to `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn is_identifier(value: &str) -> bool {
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if !(first.is_ascii_alphabetic() || first == '_') {
            return false;
        }
        value.len() <= 64 && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    }

}
