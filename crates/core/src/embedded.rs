//! Readers for workflow documents embedded in media files.
//!
//! ComfyUI stores two JSON documents alongside its outputs:
//!
//! - PNG: `tEXt` (or uncompressed `iTXt`) chunks keyed `prompt` (API format)
//!   and `workflow` (UI format). PNG layout: 8-byte signature, then chunks of
//!   4-byte big-endian length, 4-byte type, data, 4-byte CRC.
//! - WebP/JPEG: EXIF string fields with `prompt:{...}` / `workflow:{...}`
//!   prefixes. The EXIF block is not parsed; the raw bytes are scanned for
//!   the markers instead.
//! - Video containers: `prompt`, `workflow` or `comment` format tags, read
//!   through ffprobe.

use std::collections::HashMap;

use serde_json::Value;

use crate::ffmpeg::{container_tag, FfprobeOutput};
use crate::workflow::parse_document;

/// PNG file signature (8 bytes).
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Upper bound on a single chunk we are willing to buffer.
const MAX_TEXT_CHUNK_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("not a PNG file")]
    NotPng,

    #[error("PNG chunk '{chunk}' is truncated")]
    Truncated { chunk: String },
}

/// The candidate documents found in one file, in extraction order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedDocuments {
    /// API-format document.
    pub prompt: Option<Value>,
    /// UI-format document.
    pub workflow: Option<Value>,
}

impl EmbeddedDocuments {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_none() && self.workflow.is_none()
    }

    /// Candidates in preference order: the API prompt, then the UI workflow.
    pub fn candidates(&self) -> impl Iterator<Item = &Value> {
        self.prompt.iter().chain(self.workflow.iter())
    }

    /// Build from a text key/value map (PNG chunks, container tags).
    pub fn from_text_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| parse_document(v))
        };
        Self {
            prompt: get("prompt"),
            workflow: get("workflow"),
        }
    }

    /// Build from ffprobe container tags.
    ///
    /// `prompt` and `workflow` tags are used directly. A `comment` tag may hold
    /// either an object wrapping both documents or a single document.
    pub fn from_probe(probe: &FfprobeOutput) -> Self {
        let mut docs = Self {
            prompt: container_tag(probe, "prompt").and_then(parse_document),
            workflow: container_tag(probe, "workflow").and_then(parse_document),
        };
        if !docs.is_empty() {
            return docs;
        }

        let Some(comment) = container_tag(probe, "comment").and_then(parse_document) else {
            return docs;
        };
        let wrapped = |key: &str| match comment.get(key) {
            Some(Value::String(raw)) => parse_document(raw),
            Some(value @ Value::Object(_)) => Some(value.clone()),
            _ => None,
        };
        docs.prompt = wrapped("prompt");
        docs.workflow = wrapped("workflow");
        if docs.is_empty() {
            docs.prompt = Some(comment);
        }
        docs
    }
}

// ---------------------------------------------------------------------------
// PNG text chunks
// ---------------------------------------------------------------------------

/// Extract all `tEXt` and uncompressed `iTXt` chunks from PNG bytes.
///
/// Reading stops at `IEND`. A truncated trailing chunk is an error only if no
/// text chunk was read before it.
pub fn read_png_text_chunks(bytes: &[u8]) -> Result<HashMap<String, String>, EmbedError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return Err(EmbedError::NotPng);
    }

    let mut chunks = HashMap::new();
    let mut offset = PNG_SIGNATURE.len();

    while offset + 8 <= bytes.len() {
        let len = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let chunk_type = &bytes[offset + 4..offset + 8];
        let data_start = offset + 8;
        let data_end = data_start.saturating_add(len);

        if chunk_type == b"IEND" {
            break;
        }
        if data_end > bytes.len() || len > MAX_TEXT_CHUNK_BYTES {
            if chunks.is_empty() {
                return Err(EmbedError::Truncated {
                    chunk: String::from_utf8_lossy(chunk_type).to_string(),
                });
            }
            break;
        }

        let data = &bytes[data_start..data_end];
        match chunk_type {
            b"tEXt" => parse_text_chunk(data, &mut chunks),
            b"iTXt" => parse_itxt_chunk(data, &mut chunks),
            _ => {}
        }

        // Data plus CRC.
        offset = data_end + 4;
    }

    Ok(chunks)
}

/// `keyword\0value`.
fn parse_text_chunk(data: &[u8], chunks: &mut HashMap<String, String>) {
    if let Some(null_pos) = data.iter().position(|&b| b == 0) {
        let keyword = String::from_utf8_lossy(&data[..null_pos]).to_string();
        let value = String::from_utf8_lossy(&data[null_pos + 1..]).to_string();
        if !keyword.is_empty() {
            chunks.insert(keyword, value);
        }
    }
}

/// `keyword\0 flag method language\0 translated\0 text`. Compressed entries
/// are skipped; ComfyUI never writes them.
fn parse_itxt_chunk(data: &[u8], chunks: &mut HashMap<String, String>) {
    let Some(keyword_end) = data.iter().position(|&b| b == 0) else {
        return;
    };
    let keyword = String::from_utf8_lossy(&data[..keyword_end]).to_string();
    if keyword.is_empty() || keyword_end + 3 > data.len() {
        return;
    }
    let compression_flag = data[keyword_end + 1];
    let mut offset = keyword_end + 3;

    // Language tag, then translated keyword.
    for _ in 0..2 {
        match data[offset..].iter().position(|&b| b == 0) {
            Some(pos) => offset += pos + 1,
            None => return,
        }
    }

    if compression_flag == 0 {
        chunks.insert(keyword, String::from_utf8_lossy(&data[offset..]).to_string());
    }
}

// ---------------------------------------------------------------------------
// EXIF marker scan
// ---------------------------------------------------------------------------

/// Scan raw bytes for `prompt:` / `workflow:` markers followed by JSON.
pub fn scan_exif_markers(bytes: &[u8]) -> EmbeddedDocuments {
    EmbeddedDocuments {
        prompt: find_marked_json(bytes, b"prompt:"),
        workflow: find_marked_json(bytes, b"workflow:"),
    }
}

fn find_marked_json(bytes: &[u8], marker: &[u8]) -> Option<Value> {
    let mut search_from = 0;
    while let Some(pos) = find_ignore_case(&bytes[search_from..], marker) {
        let start = search_from + pos + marker.len();
        if let Some(value) = json_at(&bytes[start..]) {
            return Some(value);
        }
        search_from = start;
    }
    None
}

/// Decode the JSON object starting at `bytes` (after optional whitespace).
fn json_at(bytes: &[u8]) -> Option<Value> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let bytes = &bytes[start..];
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    if let Some(Ok(value)) = stream.next() {
        return Some(value);
    }

    // Strict decoding failed (e.g. NaN tokens); retry on the NUL-terminated
    // EXIF string.
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    parse_document(&String::from_utf8_lossy(&bytes[..end]))
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Documents embedded in an image file, dispatched on its extension.
pub fn read_image_documents(extension: &str, bytes: &[u8]) -> EmbeddedDocuments {
    match extension {
        "png" => match read_png_text_chunks(bytes) {
            Ok(chunks) => EmbeddedDocuments::from_text_map(&chunks),
            Err(e) => {
                tracing::debug!(error = %e, "PNG text chunks unreadable");
                EmbeddedDocuments::default()
            }
        },
        "webp" | "jpg" | "jpeg" => scan_exif_markers(bytes),
        _ => EmbeddedDocuments::default(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn chunk(kind: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        // CRC is never checked.
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    fn png_with(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        out.extend(chunk(b"IHDR", &[0; 13]));
        for c in chunks {
            out.extend_from_slice(c);
        }
        out.extend(chunk(b"IEND", &[]));
        out
    }

    // -- png ------------------------------------------------------------------

    #[test]
    fn text_and_itxt_chunks_are_read() {
        let bytes = png_with(&[
            chunk(b"tEXt", b"prompt\0{\"1\": {\"class_type\": \"KSampler\"}}"),
            chunk(b"iTXt", b"workflow\0\0\0en\0\0{\"nodes\": []}"),
        ]);
        let chunks = read_png_text_chunks(&bytes).unwrap();
        assert_eq!(chunks["prompt"], "{\"1\": {\"class_type\": \"KSampler\"}}");
        assert_eq!(chunks["workflow"], "{\"nodes\": []}");

        let docs = EmbeddedDocuments::from_text_map(&chunks);
        assert_eq!(docs.prompt, Some(json!({"1": {"class_type": "KSampler"}})));
        assert_eq!(docs.candidates().count(), 2);
    }

    #[test]
    fn compressed_itxt_is_skipped() {
        let bytes = png_with(&[chunk(b"iTXt", b"workflow\0\x01\0\0\0xx")]);
        assert!(read_png_text_chunks(&bytes).unwrap().is_empty());
    }

    #[test]
    fn non_png_is_rejected() {
        assert_matches!(read_png_text_chunks(b"GIF89a"), Err(EmbedError::NotPng));
    }

    #[test]
    fn truncated_chunk_without_text_is_error() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(b"tEXt");
        bytes.extend_from_slice(b"short");
        assert_matches!(
            read_png_text_chunks(&bytes),
            Err(EmbedError::Truncated { chunk }) if chunk == "tEXt"
        );
    }

    #[test]
    fn nan_in_chunk_is_tolerated() {
        let bytes = png_with(&[chunk(b"tEXt", b"prompt\0{\"1\": {\"class_type\": \"X\", \"inputs\": {\"v\": NaN}}}")]);
        let docs = read_image_documents("png", &bytes);
        assert_eq!(docs.prompt.unwrap()["1"]["inputs"]["v"], Value::Null);
    }

    // -- exif -----------------------------------------------------------------

    #[test]
    fn exif_markers_are_found() {
        let mut bytes = b"RIFF....WEBPVP8 ....EXIFMM\0*\0\0\0".to_vec();
        bytes.extend_from_slice(b"Workflow:{\"nodes\": [{\"id\": 1}]}\0");
        bytes.extend_from_slice(b"\0\0Prompt:{\"3\": {\"class_type\": \"KSampler\"}}\0");
        let docs = read_image_documents("webp", &bytes);
        assert_eq!(docs.workflow, Some(json!({"nodes": [{"id": 1}]})));
        assert_eq!(docs.prompt, Some(json!({"3": {"class_type": "KSampler"}})));
    }

    #[test]
    fn marker_without_json_is_ignored() {
        let docs = scan_exif_markers(b"prompt: a photo of a cat\0");
        assert!(docs.is_empty());
    }

    // -- container tags -------------------------------------------------------

    fn probe_with_tags(tags: serde_json::Value) -> FfprobeOutput {
        serde_json::from_value(json!({ "streams": [], "format": { "tags": tags } })).unwrap()
    }

    #[test]
    fn comment_wrapping_both_documents() {
        let comment = json!({
            "prompt": "{\"3\": {\"class_type\": \"KSampler\"}}",
            "workflow": {"nodes": [{"id": 3}]}
        })
        .to_string();
        let docs = EmbeddedDocuments::from_probe(&probe_with_tags(json!({ "comment": comment })));
        assert_eq!(docs.prompt, Some(json!({"3": {"class_type": "KSampler"}})));
        assert_eq!(docs.workflow, Some(json!({"nodes": [{"id": 3}]})));
    }

    #[test]
    fn bare_comment_document_is_a_candidate() {
        let comment = json!({"3": {"class_type": "KSampler"}}).to_string();
        let docs = EmbeddedDocuments::from_probe(&probe_with_tags(json!({ "comment": comment })));
        assert_eq!(docs.prompt, Some(json!({"3": {"class_type": "KSampler"}})));
    }

    #[test]
    fn explicit_tags_win_over_comment() {
        let docs = EmbeddedDocuments::from_probe(&probe_with_tags(json!({
            "workflow": "{\"nodes\": []}",
            "comment": "{\"prompt\": {}}"
        })));
        assert_eq!(docs.workflow, Some(json!({"nodes": []})));
        assert_eq!(docs.prompt, None);
    }
}
