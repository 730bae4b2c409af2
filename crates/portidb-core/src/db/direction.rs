use serde::{Deserialize, Serialize};

///
/// CursorDirection
///
/// Iteration order of a cursor. The unique variants visit each distinct key
/// once, taking the record with the lowest primary key.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    /// True for the ascending directions.
    #[must_use]
    pub const fn is_next(self) -> bool {
        matches!(self, Self::Next | Self::NextUnique)
    }

    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }

    #[must_use]
    pub const fn scan(self) -> ScanDirection {
        if self.is_next() {
            ScanDirection::Asc
        } else {
            ScanDirection::Desc
        }
    }
}

///
/// ScanDirection
///
/// Order in which a record store yields a range.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ScanDirection {
    #[default]
    Asc,
    Desc,
}

///
/// TransactionMode
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    #[default]
    ReadOnly,
    ReadWrite,
    VersionChange,
}

impl TransactionMode {
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    #[must_use]
    pub const fn is_version_change(self) -> bool {
        matches!(self, Self::VersionChange)
    }
}
