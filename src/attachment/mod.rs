//! Fetches and merges content-addressed evidence archives into the
//! effective prompt and attachment set a deliberation runs against.
//!
//! `ArchiveTransport` is an `async_trait` capability trait the host
//! implements and injects — the same single-method shape as
//! `ProviderAdapter`, kept deliberately narrow so the core never assumes
//! a specific content-addressing scheme.

pub mod manifest;

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::model::{Attachment, AttachmentKind, Outcomes, PanelMember};
use manifest::{parse_manifest, parse_primary_document, Manifest, PrimaryDocument};

/// Fetches the raw bytes of an archive given its content id. The core
/// never interprets content-id syntax beyond splitting the caller string
/// on commas and the first colon — it does not assume IPFS or any
/// specific content-addressed store.
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    async fn fetch(&self, content_id: &str) -> std::result::Result<Vec<u8>, String>;
}

/// The caller-facing attachment reference string:
/// `primaryCid[,bCid1,…,bCidN][:addendumText]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentReference {
    pub primary_cid: String,
    pub side_cids: Vec<String>,
    pub addendum: Option<String>,
}

/// Split on the first colon (addendum separator), then on commas within
/// the content-id portion.
pub fn parse_reference(input: &str) -> AttachmentReference {
    let (cid_part, addendum) = match input.split_once(':') {
        Some((cids, text)) => (cids, Some(text.to_string())),
        None => (input, None),
    };

    let mut ids = cid_part.split(',').map(str::trim).filter(|s| !s.is_empty());
    let primary_cid = ids.next().unwrap_or_default().to_string();
    let side_cids = ids.map(str::to_string).collect();

    AttachmentReference {
        primary_cid,
        side_cids,
        addendum,
    }
}

/// Strips `<`, `>`, `{`, `}` from caller-supplied addendum text before it
/// is composed into the prompt (§4.3, §8 invariant 8).
pub fn sanitize_addendum(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '<' | '>' | '{' | '}')).collect()
}

/// The effective prompt and attachment set materialized from one or more
/// archives, plus any panel/iterations/outcomes the manifest supplied for
/// the scheduler to fall back on if the caller's request didn't specify
/// them.
#[derive(Debug, Clone)]
pub struct MaterializedRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub inherited_panel: Option<Vec<PanelMember>>,
    pub inherited_iterations: Option<u32>,
    pub inherited_outcomes: Option<Outcomes>,
    pub warnings: Vec<String>,
}

/// One archive's extracted files, held alive only for the duration of
/// composition. The backing `TempDir` is released on drop — including on
/// every early-return error path and on cancellation, since dropping the
/// future holding this guard runs its destructor.
struct ExtractedArchive {
    _dir: TempDir,
    files: BTreeMap<String, Vec<u8>>,
}

fn extract_zip(bytes: &[u8]) -> Result<ExtractedArchive> {
    let dir = tempfile::tempdir().map_err(|e| Error::Archive(format!("failed to create temp dir: {e}")))?;

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::Archive(format!("invalid zip archive: {e}")))?;

    let mut files = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::Archive(format!("failed to read zip entry {i}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| Error::Archive(format!("failed to decompress {name}: {e}")))?;
        files.insert(name, contents);
    }

    Ok(ExtractedArchive { _dir: dir, files })
}

/// One fetched-and-parsed archive: its manifest, primary document, and
/// raw extracted files (so `additional[]`/`support[]` entries can be
/// resolved by filename).
struct LoadedArchive {
    manifest: Manifest,
    primary: PrimaryDocument,
    files: BTreeMap<String, Vec<u8>>,
}

fn load_archive(bytes: &[u8]) -> Result<LoadedArchive> {
    let extracted = extract_zip(bytes)?;
    let manifest_bytes = extracted
        .files
        .get("manifest.json")
        .ok_or_else(|| Error::manifest_invalid("archive does not contain manifest.json"))?;
    let manifest = parse_manifest(manifest_bytes)?;

    let primary_bytes = extracted
        .files
        .get(&manifest.primary_file)
        .ok_or_else(|| Error::manifest_invalid(format!("primary file {} not found in archive", manifest.primary_file)))?;
    let primary = parse_primary_document(primary_bytes)?;

    Ok(LoadedArchive {
        manifest,
        primary,
        files: extracted.files,
    })
}

fn classify_attachment_kind(media_type: &str) -> AttachmentKind {
    if media_type.starts_with("image/") {
        AttachmentKind::Image
    } else if media_type == "application/pdf" {
        AttachmentKind::Pdf
    } else if media_type.starts_with("text/") {
        AttachmentKind::Text
    } else {
        AttachmentKind::Document
    }
}

/// Fetch, extract, and merge all archives named by `reference`, producing
/// the materialized prompt/attachments/inherited-config the scheduler
/// consumes. `max_attachment_bytes` enforces the per-item size cap
/// (§4.3 step 7, §4.6 `maxAttachmentBytes`).
pub async fn materialize(
    transport: &dyn ArchiveTransport,
    reference: &AttachmentReference,
    max_attachment_bytes: usize,
) -> Result<MaterializedRequest> {
    let primary_bytes = transport
        .fetch(&reference.primary_cid)
        .await
        .map_err(|e| Error::bcid_fetch_failed(reference.primary_cid.clone(), e))?;
    let primary_archive = load_archive(&primary_bytes)?;

    if !reference.side_cids.is_empty() {
        let expected = primary_archive.manifest.bcids.len();
        if expected != reference.side_cids.len() {
            return Err(Error::BcidCountMismatch {
                expected,
                actual: reference.side_cids.len(),
            });
        }
    }

    let mut warnings = Vec::new();
    let mut side_archives = Vec::new();
    for cid in &reference.side_cids {
        let bytes = transport
            .fetch(cid)
            .await
            .map_err(|e| Error::bcid_fetch_failed(cid.clone(), e))?;
        side_archives.push((cid.clone(), load_archive(&bytes)?));
    }

    // §4.3 step 4: for each side archive in caller order, look up the
    // expected name from the primary's declared `bCIDs` map by the side
    // archive's own declared name — not by its position in caller order,
    // since `bCIDs` is looked up by key and a caller may supply content
    // ids in any order. A name mismatch is a warning, not fatal.
    for (cid, archive) in &side_archives {
        match &archive.manifest.name {
            Some(name) if primary_archive.manifest.bcids.contains_key(name) => {}
            Some(name) => warnings.push(format!(
                "side archive {cid} declares name {name:?} with no corresponding bCIDs entry in the primary manifest"
            )),
            None => warnings.push(format!("side archive {cid} has no declared name to match against the primary manifest's bCIDs")),
        }
    }

    let mut prompt = primary_archive.primary.query.clone();

    for (_cid, archive) in &side_archives {
        let name = archive.manifest.name.as_deref();
        let description = name
            .and_then(|n| primary_archive.manifest.bcids.get(n))
            .cloned()
            .unwrap_or_else(|| "Supplemental archive".to_string());

        prompt.push_str("\n\n**\n");
        prompt.push_str(&description);
        prompt.push_str(":\n");
        if let Some(n) = name {
            prompt.push_str("Name: ");
            prompt.push_str(n);
            prompt.push('\n');
        }
        prompt.push_str(&archive.primary.query);
    }

    let has_references = !primary_archive.primary.references.is_empty()
        || side_archives.iter().any(|(_, a)| !a.primary.references.is_empty());
    if has_references {
        prompt.push_str("\n\nReferences:\n");
        if !primary_archive.primary.references.is_empty() {
            for r in &primary_archive.primary.references {
                prompt.push_str(r);
                prompt.push('\n');
            }
        }
        for (_cid, archive) in &side_archives {
            if archive.primary.references.is_empty() {
                continue;
            }
            if let Some(n) = archive.manifest.name.as_deref() {
                prompt.push_str(n);
                prompt.push_str(":\n");
            }
            for r in &archive.primary.references {
                prompt.push_str(r);
                prompt.push('\n');
            }
        }
    }

    if let (Some(template), Some(text)) = (&primary_archive.manifest.addendum_template, &reference.addendum) {
        let sanitized = sanitize_addendum(text);
        prompt.push_str("\n\nAddendum:\n");
        prompt.push_str(template);
        prompt.push_str(": ");
        prompt.push_str(&sanitized);
    }

    let mut attachments = Vec::new();
    for archive in std::iter::once(&primary_archive).chain(side_archives.iter().map(|(_, a)| a)) {
        for descriptor in &archive.manifest.additional {
            let Some(bytes) = archive.files.get(&descriptor.file) else {
                warnings.push(format!("additional file {} not found in archive", descriptor.file));
                continue;
            };
            if bytes.len() > max_attachment_bytes {
                return Err(Error::bad_request(format!(
                    "attachment {} exceeds the {max_attachment_bytes}-byte cap",
                    descriptor.file
                )));
            }
            let mut attachment = Attachment::new(
                classify_attachment_kind(&descriptor.media_type),
                descriptor.media_type.clone(),
                bytes.clone(),
            );
            attachment.name = Some(descriptor.file.clone());
            attachments.push(attachment);
        }
    }

    let inherited_panel = primary_archive.manifest.jury_parameters.as_ref().map(|j| j.panel.clone());
    let inherited_iterations = primary_archive.manifest.jury_parameters.as_ref().map(|j| j.iterations);
    let inherited_outcomes = primary_archive.primary.outcomes.clone();

    Ok(MaterializedRequest {
        prompt,
        attachments,
        inherited_panel,
        inherited_iterations,
        inherited_outcomes,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reference_splits_cids_and_addendum() {
        let r = parse_reference("primary123,side1,side2:2009.67");
        assert_eq!(r.primary_cid, "primary123");
        assert_eq!(r.side_cids, vec!["side1".to_string(), "side2".to_string()]);
        assert_eq!(r.addendum.as_deref(), Some("2009.67"));
    }

    #[test]
    fn parse_reference_single_cid_no_colon() {
        let r = parse_reference("solo-cid");
        assert_eq!(r.primary_cid, "solo-cid");
        assert!(r.side_cids.is_empty());
        assert!(r.addendum.is_none());
    }

    #[test]
    fn parse_reference_addendum_may_contain_colons() {
        let r = parse_reference("primary:http://example.com/x");
        assert_eq!(r.primary_cid, "primary");
        assert_eq!(r.addendum.as_deref(), Some("http://example.com/x"));
    }

    #[test]
    fn sanitize_strips_angle_brackets_and_braces() {
        let dirty = "<script>{alert('x')}</script>";
        let clean = sanitize_addendum(dirty);
        assert!(!clean.contains('<'));
        assert!(!clean.contains('>'));
        assert!(!clean.contains('{'));
        assert!(!clean.contains('}'));
    }

    #[test]
    fn sanitize_is_identity_for_clean_text() {
        assert_eq!(sanitize_addendum("2009.67"), "2009.67");
    }

    #[test]
    fn classify_attachment_kind_by_media_type() {
        assert_eq!(classify_attachment_kind("image/png"), AttachmentKind::Image);
        assert_eq!(classify_attachment_kind("application/pdf"), AttachmentKind::Pdf);
        assert_eq!(classify_attachment_kind("text/plain"), AttachmentKind::Text);
        assert_eq!(classify_attachment_kind("application/msword"), AttachmentKind::Document);
    }

    use std::collections::HashMap;
    use std::io::Write;

    fn build_archive(manifest_json: &str, primary_json: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        let options = zip::write::SimpleFileOptions::default();
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
        writer.start_file("manifest.json", options).unwrap();
        writer.write_all(manifest_json.as_bytes()).unwrap();
        writer.start_file("primary.json", options).unwrap();
        writer.write_all(primary_json.as_bytes()).unwrap();
        writer.finish().unwrap();
        drop(writer);
        buf
    }

    struct MapTransport(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ArchiveTransport for MapTransport {
        async fn fetch(&self, content_id: &str) -> std::result::Result<Vec<u8>, String> {
            self.0.get(content_id).cloned().ok_or_else(|| format!("unknown cid {content_id}"))
        }
    }

    /// The literal S7 scenario: `bCIDs = {plaintiff: …, defendant: …}`
    /// (where "defendant" sorts before "plaintiff" alphabetically) with
    /// caller CID order that puts the plaintiff archive first. Each side
    /// archive must be paired with its bCIDs description by its own
    /// declared `name`, not by position over the (alphabetically sorted)
    /// `bCIDs` map keys.
    #[tokio::test]
    async fn s7_side_archives_paired_by_declared_name_not_caller_order() {
        let primary_manifest = r#"{
            "version": 1,
            "primary": "primary.json",
            "bCIDs": {"plaintiff": "Plaintiff's filing", "defendant": "Defendant's filing"}
        }"#;
        let primary_doc = r#"{"query": "Did the breach occur?", "references": []}"#;
        let primary_bytes = build_archive(primary_manifest, primary_doc);

        let defendant_manifest = r#"{"version": 1, "primary": "primary.json", "name": "defendant"}"#;
        let defendant_doc = r#"{"query": "We dispute the claim.", "references": []}"#;
        let defendant_bytes = build_archive(defendant_manifest, defendant_doc);

        let plaintiff_manifest = r#"{"version": 1, "primary": "primary.json", "name": "plaintiff"}"#;
        let plaintiff_doc = r#"{"query": "The contract was breached.", "references": []}"#;
        let plaintiff_bytes = build_archive(plaintiff_manifest, plaintiff_doc);

        let mut map = HashMap::new();
        map.insert("primary-cid".to_string(), primary_bytes);
        map.insert("defendant-cid".to_string(), defendant_bytes);
        map.insert("plaintiff-cid".to_string(), plaintiff_bytes);
        let transport = MapTransport(map);

        let reference = AttachmentReference {
            primary_cid: "primary-cid".to_string(),
            // Caller order puts plaintiff first, which does not match
            // the alphabetical bCIDs key order ("defendant" < "plaintiff").
            side_cids: vec!["plaintiff-cid".to_string(), "defendant-cid".to_string()],
            addendum: None,
        };

        let materialized = materialize(&transport, &reference, 20 * 1024 * 1024).await.unwrap();

        assert!(materialized.warnings.is_empty(), "unexpected warnings: {:?}", materialized.warnings);
        let plaintiff_pos = materialized.prompt.find("Plaintiff's filing").unwrap();
        let defendant_pos = materialized.prompt.find("Defendant's filing").unwrap();
        assert!(plaintiff_pos < defendant_pos, "caller order (plaintiff first) must be preserved in the composed prompt");
        assert!(materialized.prompt.contains("Name: plaintiff"));
        assert!(materialized.prompt.contains("Name: defendant"));
        assert!(materialized.prompt.contains("The contract was breached."));
        assert!(materialized.prompt.contains("We dispute the claim."));
    }

    #[tokio::test]
    async fn side_archive_with_unrecognized_name_warns_but_does_not_fail() {
        let primary_manifest = r#"{
            "version": 1,
            "primary": "primary.json",
            "bCIDs": {"defendant": "Defendant's filing"}
        }"#;
        let primary_doc = r#"{"query": "Did the breach occur?", "references": []}"#;
        let primary_bytes = build_archive(primary_manifest, primary_doc);

        let side_manifest = r#"{"version": 1, "primary": "primary.json", "name": "amicus"}"#;
        let side_doc = r#"{"query": "A third party's view.", "references": []}"#;
        let side_bytes = build_archive(side_manifest, side_doc);

        let mut map = HashMap::new();
        map.insert("primary-cid".to_string(), primary_bytes);
        map.insert("side-cid".to_string(), side_bytes);
        let transport = MapTransport(map);

        let reference = AttachmentReference {
            primary_cid: "primary-cid".to_string(),
            side_cids: vec!["side-cid".to_string()],
            addendum: None,
        };

        let materialized = materialize(&transport, &reference, 20 * 1024 * 1024).await.unwrap();
        assert!(materialized.warnings.iter().any(|w| w.contains("amicus")));
        assert!(materialized.prompt.contains("Supplemental archive"));
    }
}
