//! # Diagram Source
//!
//! Reads a diagram file, pulls out its compressed scene payload and expands it
//! into the element list.
//!
//! The payload lives in a fenced block:
//!
//! ````text
//! ```compressed-json
//! N4KAkARALgngDgUwgLgAQQQ...
//! ```
//! ````
//!
//! It is LZ-string compressed, base64 encoded and may be wrapped over many
//! lines; all whitespace is removed before use. The fingerprint is taken over
//! this whitespace-free string.
//!
//! Before the payload is expanded, [`decompressed_units`] replays the code
//! stream counting output length only, so a small payload that would expand
//! past the decompressed ceiling is rejected without allocating its output.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::cache;
use crate::config::PipelineLimits;
use crate::error::{OcrError, OcrResult};
use crate::render::Element;

const PAYLOAD_FENCE: &str = "```compressed-json";
const PLAIN_JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// A diagram file read into memory.
#[derive(Debug, Clone)]
pub struct DiagramSource {
    pub path: PathBuf,
    /// Whitespace-free compressed payload.
    pub payload: String,
    pub fingerprint: String,
}

impl DiagramSource {
    /// Reads `path`, enforcing the file size ceiling before loading it.
    pub fn read(path: &Path, limits: &PipelineLimits) -> OcrResult<Self> {
        let size = std::fs::metadata(path)
            .map_err(|e| OcrError::io("stat diagram", path, e))?
            .len();
        if size > limits.max_file_bytes {
            return Err(OcrError::payload_invalid(format!(
                "diagram file too large: {:.2}MB (max: {:.0}MB)",
                size as f64 / 1024.0 / 1024.0,
                limits.max_file_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        tracing::info!(
            file = %path.display(),
            size_bytes = size,
            "Reading diagram"
        );
        let content =
            std::fs::read_to_string(path).map_err(|e| OcrError::io("read diagram", path, e))?;
        let payload = extract_payload(&content)?;
        let fingerprint = cache::fingerprint(payload.as_bytes());

        Ok(Self {
            path: path.to_path_buf(),
            payload,
            fingerprint,
        })
    }

    pub fn elements(&self, limits: &PipelineLimits) -> OcrResult<Vec<Element>> {
        decompress(&self.payload, limits)
    }
}

/// Extracts the whitespace-free payload of the first `compressed-json` block.
pub fn extract_payload(content: &str) -> OcrResult<String> {
    let Some(start) = content.find(PAYLOAD_FENCE) else {
        if content.contains(PLAIN_JSON_FENCE) {
            return Err(OcrError::payload_invalid(
                "found ```json block but expected ```compressed-json; is this a diagram file?",
            ));
        }
        return Err(OcrError::payload_invalid(
            "no compressed-json block found; not a diagram file?",
        ));
    };

    let body = &content[start + PAYLOAD_FENCE.len()..];
    let end = body
        .find(FENCE)
        .ok_or_else(|| OcrError::payload_invalid("compressed-json block is not closed"))?;

    let payload: String = body[..end].chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err(OcrError::payload_invalid("compressed-json block is empty"));
    }
    Ok(payload)
}

/// Decompresses a payload into its element list, enforcing the size and
/// element-count ceilings.
pub fn decompress(payload: &str, limits: &PipelineLimits) -> OcrResult<Vec<Element>> {
    // UTF-16 units never exceed UTF-8 bytes, so this bound is safe to apply first.
    decompressed_units(payload, limits.max_decompressed_bytes)?;
    let wide = lz_str::decompress_from_base64(payload)
        .filter(|wide| !wide.is_empty())
        .ok_or_else(|| OcrError::payload_invalid("decompression failed, no data returned"))?;
    let json = String::from_utf16(&wide)
        .map_err(|e| OcrError::payload_invalid(format!("decompressed data is not text: {}", e)))?;

    if json.len() > limits.max_decompressed_bytes {
        return Err(OcrError::payload_invalid(format!(
            "decompressed data too large: {:.2}MB (max: {:.0}MB)",
            json.len() as f64 / 1024.0 / 1024.0,
            limits.max_decompressed_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    let mut scene: Value = serde_json::from_str(&json)?;
    if !scene.is_object() {
        return Err(OcrError::payload_invalid("invalid scene data structure"));
    }
    let elements = match scene.get_mut("elements") {
        Some(Value::Array(elements)) => std::mem::take(elements),
        _ => return Err(OcrError::payload_invalid("scene data missing elements array")),
    };

    if elements.len() > limits.max_elements {
        return Err(OcrError::payload_invalid(format!(
            "too many elements: {} (max: {})",
            elements.len(),
            limits.max_elements
        )));
    }

    let elements = serde_json::from_value::<Vec<Element>>(Value::Array(elements))?;
    tracing::debug!(count = elements.len(), "Decompressed scene");
    Ok(elements)
}

/// UTF-16 length of the LZ-string output of `payload`, computed without
/// building it.
///
/// Fails as soon as the running length passes `limit`. A stream that ends
/// early or references an unknown entry stops the count; the decoder proper
/// rejects it afterwards.
pub fn decompressed_units(payload: &str, limit: usize) -> OcrResult<usize> {
    let mut bits = BitReader::new(payload.as_bytes())?;
    match bits.read(2)? {
        0 => bits.read(8)?,
        1 => bits.read(16)?,
        _ => return Ok(0),
    };

    // Lengths of dictionary entries; 0..3 are the literal and end codes.
    let mut entries: Vec<usize> = vec![0, 0, 0, 1];
    let mut previous = 1usize;
    let mut total = 1usize;
    let mut enlarge_in = 4u32;
    let mut num_bits = 3u32;

    loop {
        if bits.exhausted() {
            return Ok(total);
        }
        let mut code = bits.read(num_bits)? as usize;
        match code {
            0 | 1 => {
                bits.read(if code == 0 { 8 } else { 16 })?;
                entries.push(1);
                code = entries.len() - 1;
                enlarge_in -= 1;
            }
            2 => return Ok(total),
            _ => {}
        }
        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }

        let entry = match entries.get(code) {
            Some(&len) => len,
            None if code == entries.len() => previous + 1,
            None => return Ok(total),
        };
        total = total.saturating_add(entry);
        if total > limit {
            return Err(OcrError::payload_invalid(format!(
                "decompressed data too large: over {:.0}MB",
                limit as f64 / 1024.0 / 1024.0
            )));
        }

        entries.push(previous + 1);
        enlarge_in -= 1;
        previous = entry;
        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }
    }
}

/// Reads LZ-string's base64 alphabet six bits at a time, high bit first.
struct BitReader<'a> {
    data: &'a [u8],
    index: usize,
    value: u32,
    position: u32,
}

impl<'a> BitReader<'a> {
    const RESET: u32 = 32;

    fn new(data: &'a [u8]) -> OcrResult<Self> {
        Ok(Self {
            data,
            index: 1,
            value: base64_value(data, 0)?,
            position: Self::RESET,
        })
    }

    fn exhausted(&self) -> bool {
        self.index > self.data.len()
    }

    /// Reads `count` bits, least significant first. Past the end reads zeros.
    fn read(&mut self, count: u32) -> OcrResult<u32> {
        let mut bits = 0u32;
        for i in 0..count {
            let set = self.value & self.position != 0;
            self.position >>= 1;
            if self.position == 0 {
                self.position = Self::RESET;
                self.value = base64_value(self.data, self.index)?;
                self.index += 1;
            }
            if set {
                bits |= 1 << i;
            }
        }
        Ok(bits)
    }
}

fn base64_value(data: &[u8], index: usize) -> OcrResult<u32> {
    let Some(&byte) = data.get(index) else {
        return Ok(0);
    };
    let value = match byte {
        b'A'..=b'Z' => byte - b'A',
        b'a'..=b'z' => byte - b'a' + 26,
        b'0'..=b'9' => byte - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        b'=' => 64,
        _ => {
            return Err(OcrError::payload_invalid(format!(
                "payload is not base64: unexpected byte 0x{:02x}",
                byte
            )));
        }
    };
    Ok(u32::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wrap(payload: &str) -> String {
        format!(
            "---\nexcalidraw-plugin: parsed\n---\n# Drawing\n```{}\n{}\n```\n%%\n",
            "compressed-json", payload
        )
    }

    fn compress(scene: &str) -> String {
        lz_str::compress_to_base64(scene)
    }

    #[test]
    fn extracts_and_strips_whitespace() {
        let content = wrap("N4Ig\n  LgpgTg\r\n  zg=");
        assert_eq!(extract_payload(&content).unwrap(), "N4IgLgpgTgzg=");
    }

    #[test]
    fn json_block_gets_helpful_error() {
        let err = extract_payload("```json\n{\"elements\":[]}\n```").unwrap_err();
        assert!(err.to_string().contains("expected ```compressed-json"));

        let err = extract_payload("no fences here").unwrap_err();
        assert!(err.to_string().contains("no compressed-json block"));
    }

    #[test]
    fn decompresses_elements() {
        let scene = r#"{"type":"excalidraw","elements":[
            {"type":"rectangle","x":0,"y":0,"width":10,"height":10},
            {"type":"text","x":5,"y":5,"text":"hi"}
        ]}"#;
        let elements = decompress(&compress(scene), &PipelineLimits::default()).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].text(), "hi");
    }

    #[test]
    fn enforces_element_ceiling() {
        let scene = r#"{"elements":[{"type":"line"},{"type":"line"},{"type":"line"}]}"#;
        let limits = PipelineLimits {
            max_elements: 2,
            ..PipelineLimits::default()
        };
        let err = decompress(&compress(scene), &limits).unwrap_err();
        assert!(err.to_string().contains("too many elements"));
    }

    #[test]
    fn enforces_decompressed_ceiling() {
        let scene = format!(r#"{{"elements":[],"files":"{}"}}"#, "x".repeat(4096));
        let limits = PipelineLimits {
            max_decompressed_bytes: 1024,
            ..PipelineLimits::default()
        };
        let err = decompress(&compress(&scene), &limits).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn length_scan_matches_decoder() {
        let long = "xyz".repeat(5000);
        for scene in [
            r#"{"elements":[]}"#,
            "abababababababababababab",
            "日本語 ✏️ text text text 🎨",
            long.as_str(),
        ] {
            let payload = compress(scene);
            let expected = lz_str::decompress_from_base64(&payload).unwrap().len();
            assert_eq!(decompressed_units(&payload, usize::MAX).unwrap(), expected);
        }
    }

    #[test]
    fn small_payload_expanding_past_ceiling_is_rejected_early() {
        let scene = format!(r#"{{"elements":[],"files":"{}"}}"#, "a".repeat(400_000));
        let payload = compress(&scene);
        assert!(payload.len() < 20_000);

        let limits = PipelineLimits {
            max_decompressed_bytes: 100_000,
            ..PipelineLimits::default()
        };
        let err = decompressed_units(&payload, limits.max_decompressed_bytes).unwrap_err();
        assert_eq!(err.category(), "payload_invalid");
        let err = decompress(&payload, &limits).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn non_base64_payload_is_rejected() {
        let err = decompress("N4Ig*Lgpg", &PipelineLimits::default()).unwrap_err();
        assert!(err.to_string().contains("not base64"));
    }

    #[test]
    fn rejects_non_scene_documents() {
        let limits = PipelineLimits::default();
        let err = decompress(&compress(r#"{"type":"excalidraw"}"#), &limits).unwrap_err();
        assert!(err.to_string().contains("missing elements"));
        let err = decompress(&compress("[1,2,3]"), &limits).unwrap_err();
        assert_eq!(err.category(), "payload_invalid");
    }

    #[test]
    fn read_enforces_file_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.excalidraw.md");
        std::fs::write(&path, wrap(&"A".repeat(2048))).unwrap();

        let limits = PipelineLimits {
            max_file_bytes: 1024,
            ..PipelineLimits::default()
        };
        let err = DiagramSource::read(&path, &limits).unwrap_err();
        assert!(err.to_string().contains("too large"));

        let source = DiagramSource::read(&path, &PipelineLimits::default()).unwrap();
        assert_eq!(source.payload.len(), 2048);
        assert_eq!(source.fingerprint, cache::fingerprint(source.payload.as_bytes()));
    }
}
