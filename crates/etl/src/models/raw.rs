use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use log::warn;
use serde::de::DeserializeOwned;

/// A decoded raw row whose concrete type is only known at runtime.
///
/// The streaming pipeline carries rows of every payload kind through the same
/// code path; dispatch recovers the concrete type per raw table.
pub struct RawRecord {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

impl RawRecord {
    pub fn new<R: Any + Send>(row: R) -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            type_name: type_name::<R>(),
            value: Box::new(row),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<R: Any>(&self) -> bool {
        self.type_id == TypeId::of::<R>()
    }

    /// Recovers the concrete row, handing the record back on mismatch.
    pub fn downcast<R: Any>(self) -> Result<R, RawRecord> {
        if !self.is::<R>() {
            return Err(self);
        }
        let type_id = self.type_id;
        let type_name = self.type_name;
        self.value.downcast::<R>().map(|b| *b).map_err(|value| RawRecord {
            type_id,
            type_name,
            value,
        })
    }
}

impl fmt::Debug for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRecord")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

type DecodeFn = fn(&[u8]) -> serde_json::Result<RawRecord>;

/// Runtime descriptor of a raw payload element type.
///
/// Identifies the element type for layout lookup and knows how to decode one
/// JSON array element into a [`RawRecord`].
#[derive(Clone, Copy)]
pub struct RawElementType {
    name: &'static str,
    type_id: TypeId,
    decode: DecodeFn,
}

impl RawElementType {
    pub fn of<R: DeserializeOwned + Send + 'static>() -> Self {
        fn decode<R: DeserializeOwned + Send + 'static>(bytes: &[u8]) -> serde_json::Result<RawRecord> {
            serde_json::from_slice::<R>(bytes).map(RawRecord::new)
        }
        Self {
            name: type_name::<R>(),
            type_id: TypeId::of::<R>(),
            decode: decode::<R>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn decode(&self, bytes: &[u8]) -> serde_json::Result<RawRecord> {
        (self.decode)(bytes)
    }
}

impl PartialEq for RawElementType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for RawElementType {}

impl Hash for RawElementType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for RawElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Handle to a downloaded raw payload on disk.
///
/// The orchestrator never looks inside; contents are only read by the
/// streaming stage.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub element_type: RawElementType,
    pub file_path: PathBuf,
    /// Continuation token for the next page, if the provider returned one.
    pub next_token: Option<String>,
}

impl Snapshot {
    pub fn new(element_type: RawElementType, file_path: impl Into<PathBuf>) -> Self {
        Self {
            element_type,
            file_path: file_path.into(),
            next_token: None,
        }
    }

    pub fn with_next_token(mut self, token: Option<String>) -> Self {
        self.next_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Deletes the backing file. Failures are logged, never raised.
    pub fn discard(&self) {
        delete_snapshot_file(&self.file_path);
    }
}

/// Raw table names are interpolated into DDL, so only `raw_[a-z0-9_]+` is accepted.
pub fn is_valid_raw_table(name: &str) -> bool {
    match name.strip_prefix("raw_") {
        Some(rest) => {
            !rest.is_empty()
                && rest
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        }
        None => false,
    }
}

pub(crate) fn delete_snapshot_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete snapshot file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sale {
        id: i64,
    }

    #[derive(Debug, Deserialize)]
    struct Stock {}

    #[test]
    fn decodes_and_downcasts() {
        let element = RawElementType::of::<Sale>();
        let record = element.decode(br#"{"id": 5}"#).unwrap();
        assert!(record.is::<Sale>());
        assert!(record.type_name().ends_with("Sale"));
        assert_eq!(record.downcast::<Sale>().unwrap(), Sale { id: 5 });
    }

    #[test]
    fn downcast_mismatch_returns_record() {
        let record = RawRecord::new(Sale { id: 1 });
        let back = record.downcast::<Stock>().unwrap_err();
        assert!(back.is::<Sale>());
    }

    #[test]
    fn raw_table_names_are_restricted() {
        assert!(is_valid_raw_table("raw_wb_sales"));
        assert!(is_valid_raw_table("raw_ozon_v3_finance"));
        assert!(!is_valid_raw_table("raw_"));
        assert!(!is_valid_raw_table("sales"));
        assert!(!is_valid_raw_table("raw_Sales"));
        assert!(!is_valid_raw_table("raw_x; drop table y"));
    }

    #[test]
    fn element_types_compare_by_type() {
        assert_eq!(RawElementType::of::<Sale>(), RawElementType::of::<Sale>());
        assert_ne!(RawElementType::of::<Sale>(), RawElementType::of::<Stock>());
    }
}
