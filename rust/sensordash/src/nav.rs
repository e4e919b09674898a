//! Navigation state carried in the query string between view renders.

use crate::{
    error::{Result, ServiceError},
    filter::Filter,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavState {
    /// Base64 (standard alphabet, padded) of a JSON array of filter transports.
    #[serde(default)]
    pub filters: Option<String>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub edit: Option<u8>,
    #[serde(default)]
    pub id: Option<i64>,
}

impl NavState {
    pub fn editing(&self) -> bool {
        self.edit.unwrap_or(0) != 0
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn with_offset(&self, offset: i64) -> Self {
        Self {
            offset: Some(offset.max(0)),
            ..self.clone()
        }
    }

    /// Link state for editing `id`, keeping the current filters and page.
    pub fn edit_record(&self, id: Option<i64>) -> Self {
        Self {
            edit: Some(1),
            id,
            ..self.clone()
        }
    }

    /// Decodes the persisted filter list. A missing key is an empty list.
    pub fn decode_filters(&self) -> Result<Vec<Filter>> {
        let Some(encoded) = self.filters.as_deref().filter(|raw| !raw.is_empty()) else {
            return Ok(Vec::new());
        };
        decode_filters(encoded)
    }

    pub fn with_filters(&self, filters: &[Filter]) -> Self {
        Self {
            filters: Some(encode_filters(filters)),
            ..self.clone()
        }
    }

    pub fn without_filters(&self) -> Self {
        Self {
            filters: None,
            ..self.clone()
        }
    }
}

pub fn encode_filters(filters: &[Filter]) -> String {
    let list: Vec<JsonValue> = filters.iter().map(Filter::to_transport).collect();
    STANDARD.encode(serde_json::to_vec(&list).unwrap_or_default())
}

pub fn decode_filters(encoded: &str) -> Result<Vec<Filter>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ServiceError::InvalidRequest("invalid filters encoding".into()))?;
    let list: Vec<JsonValue> = serde_json::from_slice(&bytes)
        .map_err(|_| ServiceError::InvalidRequest("invalid filters payload".into()))?;
    list.iter()
        .map(|item| {
            Filter::from_transport(item)
                .map_err(|err| ServiceError::InvalidRequest(format!("invalid filter: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{filter::FilterOp, record::Value};

    #[test]
    fn filters_survive_the_base64_transport() {
        let filters = vec![
            Filter::new("sensor_id", FilterOp::Eq)
                .with_value(&Value::Int(3))
                .required(),
            Filter::new("valor", FilterOp::Ge),
        ];
        let nav = NavState::default().with_filters(&filters);

        assert_eq!(nav.decode_filters().expect("filters decode"), filters);
        assert!(nav.without_filters().filters.is_none());
    }

    #[test]
    fn empty_state_has_no_filters() {
        assert!(NavState::default()
            .decode_filters()
            .expect("missing key is fine")
            .is_empty());
    }

    #[test]
    fn garbage_is_an_invalid_request() {
        let nav = NavState {
            filters: Some("%%%".into()),
            ..NavState::default()
        };
        assert!(matches!(
            nav.decode_filters(),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn accepts_python_style_padding() {
        // base64 of `[{"field": "tipo", "operator": "==", "value": "L"}]`
        let encoded = STANDARD.encode(br#"[{"field": "tipo", "operator": "==", "value": "L"}]"#);
        let filters = decode_filters(&encoded).expect("decodes");
        assert_eq!(filters.len(), 1);
        assert!(filters[0].optional);
        assert_eq!(filters[0].operator, FilterOp::Eq);
    }

    #[test]
    fn edit_links_keep_page_state() {
        let nav = NavState::default().with_offset(100);
        let link = nav.edit_record(Some(8));
        assert!(link.editing());
        assert_eq!(link.offset(), 100);
        assert_eq!(link.id, Some(8));
    }
}
