//! Reverse-geocoding response parsing.
//!
//! Only the first feature is consumed. Its `context` list is read
//! positionally:
//!
//! | index | field        | required |
//! |-------|--------------|----------|
//! | 0     | sub-district | yes      |
//! | 1     | postal code  | yes      |
//! | 2     | district     | yes      |
//! | 3     | city/regency | yes      |
//! | 4     | province     | no       |
//!
//! A missing required element is a malformed response, never an indexing
//! fault.

use serde::Deserialize;

use crate::lookup::error::LookupError;
use crate::types::EnrichedRecord;

pub const SUB_DISTRICT_INDEX: usize = 0;
pub const POSTAL_CODE_INDEX: usize = 1;
pub const DISTRICT_INDEX: usize = 2;
pub const CITY_INDEX: usize = 3;
pub const PROVINCE_INDEX: usize = 4;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    context: Option<Vec<ContextEntry>>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    #[serde(default)]
    text: Option<String>,
}

/// Parses a response body into an enriched record carrying `code`.
///
/// Pure: the same body and code always give the same result.
pub fn parse_response(body: &[u8], code: Option<String>) -> Result<EnrichedRecord, LookupError> {
    let collection: FeatureCollection = serde_json::from_slice(body)?;

    let feature = collection.features.first().ok_or(LookupError::NoFeature)?;

    let context = feature
        .context
        .as_deref()
        .ok_or_else(|| LookupError::Malformed("first feature has no context".to_string()))?;

    Ok(EnrichedRecord {
        province: optional_text(context, PROVINCE_INDEX)?,
        city: required_text(context, CITY_INDEX)?,
        district: required_text(context, DISTRICT_INDEX)?,
        sub_district: required_text(context, SUB_DISTRICT_INDEX)?,
        postal_code: required_text(context, POSTAL_CODE_INDEX)?,
        code,
    })
}

fn required_text(context: &[ContextEntry], index: usize) -> Result<String, LookupError> {
    let entry = context.get(index).ok_or_else(|| {
        LookupError::Malformed(format!(
            "context has {} entries, expected at least {}",
            context.len(),
            index + 1
        ))
    })?;

    entry
        .text
        .clone()
        .ok_or_else(|| LookupError::Malformed(format!("context[{}] has no text", index)))
}

fn optional_text(context: &[ContextEntry], index: usize) -> Result<String, LookupError> {
    match context.get(index) {
        Some(_) => required_text(context, index),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;
    use pretty_assertions::assert_eq;

    const FULL_BODY: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "id": "poi.1",
            "text": "Monas",
            "context": [
                {"id": "neighborhood.1", "text": "Gambir"},
                {"id": "postcode.1", "text": "10110"},
                {"id": "locality.1", "text": "Gambir District"},
                {"id": "place.1", "text": "Jakarta Pusat"},
                {"id": "region.1", "text": "DKI Jakarta"}
            ]
        }, {
            "id": "poi.2",
            "context": []
        }]
    }"#;

    #[test]
    fn test_parse_full_feature() {
        let record = parse_response(FULL_BODY.as_bytes(), Some("001".to_string())).unwrap();
        assert_eq!(
            record,
            EnrichedRecord {
                province: "DKI Jakarta".to_string(),
                city: "Jakarta Pusat".to_string(),
                district: "Gambir District".to_string(),
                sub_district: "Gambir".to_string(),
                postal_code: "10110".to_string(),
                code: Some("001".to_string()),
            }
        );
    }

    #[test]
    fn test_province_is_optional() {
        let body = r#"{"features":[{"context":[
            {"text":"Dago"},{"text":"40135"},{"text":"Coblong"},{"text":"Bandung"}
        ]}]}"#;
        let record = parse_response(body.as_bytes(), None).unwrap();
        assert_eq!(record.city, "Bandung");
        assert_eq!(record.province, "");
    }

    #[test]
    fn test_empty_features_is_not_found() {
        let error = parse_response(br#"{"features": []}"#, Some("007".to_string())).unwrap_err();
        assert_eq!(error, LookupError::NoFeature);
        assert_eq!(error.kind(), FailureKind::NotFound);
    }

    #[test]
    fn test_short_context_is_malformed() {
        let body = br#"{"features":[{"context":[{"text":"Dago"},{"text":"40135"}]}]}"#;
        let error = parse_response(body, None).unwrap_err();
        assert_eq!(error.kind(), FailureKind::MalformedResponse);
        assert!(error.to_string().contains("expected at least"));
    }

    #[test]
    fn test_structural_failures_are_malformed() {
        let bodies: [&[u8]; 5] = [
            b"",
            b"<html>502 Bad Gateway</html>",
            br#"{"message": "Not Authorized - Invalid Token"}"#,
            br#"{"features":[{"text":"no context"}]}"#,
            br#"{"features":[{"context":[{"id":"a"},{"text":"1"},{"text":"2"},{"text":"3"}]}]}"#,
        ];
        for body in bodies {
            let error = parse_response(body, None).unwrap_err();
            assert_eq!(error.kind(), FailureKind::MalformedResponse, "body: {:?}", body);
        }
    }

    #[test]
    fn test_parse_is_idempotent() {
        let first = parse_response(FULL_BODY.as_bytes(), Some("9".to_string()));
        let second = parse_response(FULL_BODY.as_bytes(), Some("9".to_string()));
        assert_eq!(first, second);

        let first = parse_response(b"{broken", None);
        let second = parse_response(b"{broken", None);
        assert_eq!(first, second);
    }
}
