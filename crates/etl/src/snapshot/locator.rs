//! Positioning a reader on the payload array regardless of envelope shape.

use std::fmt;
use std::io::BufRead;

use super::JsonStreamReader;
use crate::errors::{EtlError, Result};

/// Object path leading to the array of raw elements. An empty path means the
/// document itself is the array.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonArrayLocator {
    path: Vec<String>,
}

impl JsonArrayLocator {
    pub fn root_array() -> Self {
        Self::default()
    }

    /// `{"result": {"data": [...]}}`
    pub fn result_data_array() -> Self {
        Self::at_path("result.data")
    }

    /// `{"items": [...]}`
    pub fn items_array() -> Self {
        Self::at_path("items")
    }

    /// Dotted path such as `"result.items"`. Blank segments are ignored.
    pub fn at_path(path: &str) -> Self {
        Self {
            path: path
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Leaves `reader` just inside the target array.
    pub fn locate<R: BufRead>(&self, reader: &mut JsonStreamReader<R>) -> Result<()> {
        self.navigate(reader).map_err(|e| {
            EtlError::Snapshot(format!("Failed to position reader on '{}[]': {}", self, e))
        })
    }

    fn navigate<R: BufRead>(&self, reader: &mut JsonStreamReader<R>) -> Result<()> {
        for segment in &self.path {
            reader.begin_object()?;
            loop {
                match reader.next_name()? {
                    Some(name) if &name == segment => break,
                    Some(_) => reader.skip_value()?,
                    None => {
                        return Err(EtlError::Snapshot(format!("field '{}' not found", segment)))
                    }
                }
            }
        }
        reader.begin_array()
    }
}

impl fmt::Display for JsonArrayLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str("<root-array>")
        } else {
            f.write_str(&self.path.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(locator: &JsonArrayLocator, json: &str) -> Result<Vec<String>> {
        let mut reader = JsonStreamReader::new(json.as_bytes());
        locator.locate(&mut reader)?;
        let mut out = Vec::new();
        while let Some(bytes) = reader.next_element()? {
            out.push(String::from_utf8(bytes).unwrap());
        }
        Ok(out)
    }

    #[test]
    fn locates_common_envelopes() {
        assert_eq!(
            collect(&JsonArrayLocator::root_array(), "[1,2]").unwrap(),
            vec!["1", "2"]
        );
        assert_eq!(
            collect(
                &JsonArrayLocator::result_data_array(),
                r#"{"meta": {"total": 2}, "result": {"totals": [9], "data": [{"id":1},{"id":2}]}}"#
            )
            .unwrap(),
            vec![r#"{"id":1}"#, r#"{"id":2}"#]
        );
        assert_eq!(
            collect(&JsonArrayLocator::items_array(), r#"{"items": [], "cursor": "x"}"#).unwrap(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn missing_field_names_the_path() {
        let err = collect(
            &JsonArrayLocator::result_data_array(),
            r#"{"result": {"rows": []}}"#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("result.data[]"), "{message}");
        assert!(message.contains("field 'data' not found"), "{message}");
    }

    #[test]
    fn non_array_target_fails() {
        assert!(collect(&JsonArrayLocator::items_array(), r#"{"items": {"a": 1}}"#).is_err());
        assert!(collect(&JsonArrayLocator::root_array(), r#"{"items": []}"#).is_err());
    }

    #[test]
    fn blank_segments_are_ignored() {
        assert_eq!(JsonArrayLocator::at_path(" result. .data ").path(), ["result", "data"]);
        assert_eq!(JsonArrayLocator::at_path("").to_string(), "<root-array>");
    }
}
