//! `manifest.json` parsing and the primary-query/side-archive composition
//! rules.
//!
//! Uses `serde_json::Value` plus targeted field extraction rather than a
//! single `Deserialize` struct: several fields are conditionally required
//! (a `primary` filename only becomes meaningful once the referenced file
//! is read; `bCIDs` only matters when more than one archive is present)
//! and a partial or malformed manifest must still produce a specific
//! fatal error code rather than one opaque deserialization failure.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{Outcomes, PanelMember};

/// A parsed `manifest.json`, with only the fields this crate cares about
/// pulled out of the raw `Value`.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// This archive's own declared name (§3 data model). Used by a
    /// *side* archive so the primary archive can look up its expected
    /// description in its own `bCIDs` map by name rather than by the
    /// caller's content-id ordering.
    pub name: Option<String>,
    pub primary_file: String,
    pub additional: Vec<AttachmentDescriptor>,
    pub support: Vec<String>,
    pub jury_parameters: Option<JuryParameters>,
    pub bcids: BTreeMap<String, String>,
    pub addendum_template: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttachmentDescriptor {
    pub file: String,
    pub media_type: String,
}

#[derive(Debug, Clone)]
pub struct JuryParameters {
    pub panel: Vec<PanelMember>,
    pub iterations: u32,
}

/// The parsed contents of the file named by `manifest.primary`.
#[derive(Debug, Clone)]
pub struct PrimaryDocument {
    pub query: String,
    pub references: Vec<String>,
    pub outcomes: Option<Outcomes>,
}

/// Parse a manifest's top-level JSON. Fails with `manifest_invalid` if
/// `version` or `primary` is absent, and with
/// `external_primary_unsupported` if `primary` names only a content-id
/// hash rather than a filename.
pub fn parse_manifest(raw: &[u8]) -> Result<Manifest> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| Error::manifest_invalid(format!("malformed manifest.json: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::manifest_invalid("manifest.json is not a JSON object"))?;

    if !obj.contains_key("version") {
        return Err(Error::manifest_invalid("missing required field: version"));
    }

    let primary = obj
        .get("primary")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::manifest_invalid("missing required field: primary"))?;

    if !looks_like_filename(primary) {
        return Err(Error::ExternalPrimaryUnsupported);
    }

    let additional = obj
        .get("additional")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_attachment_descriptor).collect())
        .unwrap_or_default();

    let support = obj
        .get("support")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let jury_parameters = obj.get("juryParameters").and_then(parse_jury_parameters);

    let bcids = obj
        .get("bCIDs")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|desc| (k.clone(), desc.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let addendum_template = obj.get("addendum").and_then(Value::as_str).map(str::to_string);

    let name = obj.get("name").and_then(Value::as_str).map(str::to_string);

    Ok(Manifest {
        name,
        primary_file: primary.to_string(),
        additional,
        support,
        jury_parameters,
        bcids,
        addendum_template,
    })
}

/// A primary entry "names a file" if it doesn't look like a bare
/// content-id hash (no path separator, no extension). Content-id-only
/// primaries are unsupported (§4.3 step 2).
fn looks_like_filename(primary: &str) -> bool {
    primary.contains('.') || primary.contains('/')
}

fn parse_attachment_descriptor(value: &Value) -> Option<AttachmentDescriptor> {
    let obj = value.as_object()?;
    let file = obj.get("file")?.as_str()?.to_string();
    let media_type = obj
        .get("mediaType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();
    Some(AttachmentDescriptor { file, media_type })
}

fn parse_jury_parameters(value: &Value) -> Option<JuryParameters> {
    let obj = value.as_object()?;
    let panel = obj
        .get("panel")?
        .as_array()?
        .iter()
        .filter_map(parse_panel_member)
        .collect();
    let iterations = obj.get("iterations").and_then(Value::as_u64).unwrap_or(1) as u32;
    Some(JuryParameters { panel, iterations })
}

fn parse_panel_member(value: &Value) -> Option<PanelMember> {
    let obj = value.as_object()?;
    let provider_id = obj.get("providerId")?.as_str()?.to_string();
    let model_id = obj.get("modelId")?.as_str()?.to_string();
    let weight = obj.get("weight")?.as_f64()?;
    let count = obj.get("count").and_then(Value::as_u64).unwrap_or(1) as u32;
    Some(PanelMember {
        provider_id,
        model_id,
        weight,
        count,
    })
}

/// Parse the file named by `manifest.primary` out of the archive's
/// extracted files.
pub fn parse_primary_document(raw: &[u8]) -> Result<PrimaryDocument> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| Error::manifest_invalid(format!("malformed primary document: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::manifest_invalid("primary document is not a JSON object"))?;

    let query = obj
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::manifest_invalid("primary document missing required field: query"))?
        .to_string();

    let references = obj
        .get("references")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let outcomes = obj
        .get("outcomes")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect());

    Ok(PrimaryDocument {
        query,
        references,
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_manifest_missing_version() {
        let raw = br#"{"primary": "primary.json"}"#;
        assert!(matches!(parse_manifest(raw), Err(Error::ManifestInvalid(_))));
    }

    #[test]
    fn rejects_manifest_missing_primary() {
        let raw = br#"{"version": 1}"#;
        assert!(matches!(parse_manifest(raw), Err(Error::ManifestInvalid(_))));
    }

    #[test]
    fn rejects_content_id_only_primary() {
        let raw = br#"{"version": 1, "primary": "bafy1234567890abcdef"}"#;
        assert!(matches!(parse_manifest(raw), Err(Error::ExternalPrimaryUnsupported)));
    }

    #[test]
    fn parses_bcids_and_addendum_template() {
        let raw = br#"{
            "version": 1,
            "primary": "primary.json",
            "bCIDs": {"plaintiff": "Plaintiff's filing", "defendant": "Defendant's filing"},
            "addendum": "Price at dispute time"
        }"#;
        let manifest = parse_manifest(raw).unwrap();
        assert_eq!(manifest.bcids.len(), 2);
        assert_eq!(manifest.addendum_template.as_deref(), Some("Price at dispute time"));
    }

    #[test]
    fn parses_side_archive_name() {
        let raw = br#"{"version": 1, "primary": "primary.json", "name": "defendant"}"#;
        let manifest = parse_manifest(raw).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("defendant"));
    }

    #[test]
    fn parses_primary_document_fields() {
        let raw = br#"{"query": "Did the contract breach occur?", "references": ["exhibit-a"], "outcomes": ["yes", "no"]}"#;
        let doc = parse_primary_document(raw).unwrap();
        assert_eq!(doc.query, "Did the contract breach occur?");
        assert_eq!(doc.references, vec!["exhibit-a".to_string()]);
        assert_eq!(doc.outcomes, Some(vec!["yes".to_string(), "no".to_string()]));
    }

    #[test]
    fn primary_document_requires_query() {
        let raw = br#"{"references": []}"#;
        assert!(matches!(parse_primary_document(raw), Err(Error::ManifestInvalid(_))));
    }
}
