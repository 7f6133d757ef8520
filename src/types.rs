//! Core types for usenet-indexer

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Declares an `i64`-backed row identifier with the conversions and sqlx
/// encoding every table key needs.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

row_id!(
    /// Identifier of a group (upstream source)
    GroupId
);
row_id!(
    /// Identifier of an in-progress binary
    BinaryId
);
row_id!(
    /// Identifier of a published release
    ReleaseId
);
row_id!(
    /// Identifier of a stored NZB descriptor
    NzbId
);

/// Password state of a release, as discovered by archive inspection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Passworded {
    /// Not inspected yet
    #[default]
    Unknown,
    /// Inspected, no password
    No,
    /// Looks encrypted but could not be confirmed
    Maybe,
    /// Confirmed password protected
    Yes,
}

impl Passworded {
    /// Convert the stored text value into the enum (unknown values map to `Unknown`)
    pub fn from_db(value: &str) -> Self {
        match value {
            "no" => Passworded::No,
            "maybe" => Passworded::Maybe,
            "yes" => Passworded::Yes,
            _ => Passworded::Unknown,
        }
    }

    /// Text value stored in the `releases.passworded` column
    pub fn as_db(&self) -> &'static str {
        match self {
            Passworded::Unknown => "unknown",
            Passworded::No => "no",
            Passworded::Maybe => "maybe",
            Passworded::Yes => "yes",
        }
    }
}

/// Convert a timestamp into the microsecond representation used by the store
pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Convert a stored microsecond timestamp back into a `DateTime`
///
/// Out-of-range values clamp to the unix epoch rather than failing, matching
/// how the rest of the crate treats corrupt timestamps as "very old".
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// `now - days`, or `None` when that falls before the earliest representable date
pub fn days_ago(days: u32) -> Option<DateTime<Utc>> {
    Utc::now().checked_sub_signed(chrono::Duration::try_days(i64::from(days))?)
}
