use crate::{ItemId, KeywordIndex, UsageCounter};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const DATA_DIR: &str = "tdata";
pub const FILE_NAME: &str = "sticker_keywords.json";

pub const MARKER_V2: &str = "SATANAS2";
pub const MARKER_V3: &str = "SATANAS3";
const HEADER: &str = "// SATANAS3\n";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<working_dir>/tdata/sticker_keywords.json`
pub fn keywords_path<P: AsRef<Path>>(working_dir: P) -> PathBuf {
    working_dir.as_ref().join(DATA_DIR).join(FILE_NAME)
}

/// On-disk layout revision. All three are readable, only `V3` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    /// Unmarked: `{"kw": [{"id": "123"}]}`
    V1,
    /// `SATANAS2`: `{"kw": ["123"]}`
    V2,
    /// `SATANAS3`: `{"keywords": {"kw": ["123"]}, "count": {...}}`
    V3,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V3;

    pub fn number(self) -> u64 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
            FormatVersion::V3 => 3,
        }
    }

    pub fn is_current(self) -> bool { self == Self::CURRENT }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Result of decoding one keywords document.
#[derive(Debug)]
pub struct Decoded {
    pub version: FormatVersion,
    pub index: KeywordIndex,
    pub usage: UsageCounter,
    /// Malformed entries dropped while decoding.
    pub skipped: usize,
}

impl Decoded {
    fn skip(&mut self) { self.skipped += 1; }
}

#[derive(Serialize)]
struct Document<'a> {
    version: u64,
    keywords: BTreeMap<&'a str, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<CountSection<'a>>,
}

#[derive(Serialize)]
struct CountSection<'a> {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    query: BTreeMap<&'a str, BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    sticker: BTreeMap<String, u64>,
}

/// Read and decode the file at `path`. A missing file yields `Ok(None)`.
pub fn load_keywords(path: &Path) -> Result<Option<Decoded>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let decoded = decode(&text).with_context(|| format!("decoding {}", path.display()))?;
    Ok(Some(decoded))
}

/// Encode the state as the current format and atomically replace `path`.
pub fn save_keywords(path: &Path, index: &KeywordIndex, usage: &UsageCounter) -> Result<()> {
    let text = encode(index, usage)?;
    write_atomic(path, &text)
}

/// Decode a keywords document of any supported version.
///
/// Document-level problems (bad JSON, non-object root, a v3 body without a
/// `keywords` object) are errors. Malformed individual entries are logged
/// and skipped.
pub fn decode(text: &str) -> Result<Decoded> {
    let marked = version_from_markers(text);
    let body = strip_comments(text);
    let root: Value = serde_json::from_str(&body).context("invalid keywords JSON")?;
    let Value::Object(root) = root else {
        bail!("keywords document must be a JSON object");
    };

    let version = marked.unwrap_or_else(|| version_from_shape(&root));
    let mut out = Decoded {
        version,
        index: KeywordIndex::new(),
        usage: UsageCounter::new(),
        skipped: 0,
    };

    match version {
        FormatVersion::V1 | FormatVersion::V2 => decode_keywords(&root, version, &mut out),
        FormatVersion::V3 => {
            if let Some(v) = root.get("version") {
                match v.as_u64() {
                    Some(3) => {}
                    _ => bail!("unsupported keywords format version {v}"),
                }
            }
            let keywords = match root.get("keywords") {
                Some(Value::Object(map)) => map,
                Some(_) => bail!("\"keywords\" must be an object"),
                None => bail!("missing \"keywords\" object"),
            };
            decode_keywords(keywords, version, &mut out);
            match root.get("count") {
                Some(Value::Object(count)) => decode_counts(count, &mut out),
                Some(_) => {
                    tracing::warn!("skipping \"count\": object expected");
                    out.skip();
                }
                None => {}
            }
        }
    }
    Ok(out)
}

/// Serialize `index` and `usage` as a v3 document, marker line included.
pub fn encode(index: &KeywordIndex, usage: &UsageCounter) -> Result<String> {
    let keywords: BTreeMap<&str, Vec<String>> = index
        .iter()
        .map(|(keyword, items)| (keyword, items.iter().map(ItemId::to_string).collect()))
        .collect();

    let count = if usage.is_empty() {
        None
    } else {
        let query: BTreeMap<&str, BTreeMap<String, u64>> = usage
            .keyword_counts()
            .map(|(keyword, counts)| {
                let counts = counts.iter().map(|(id, n)| (id.to_string(), *n)).collect();
                (keyword, counts)
            })
            .collect();
        let sticker: BTreeMap<String, u64> =
            usage.item_counts().map(|(id, n)| (id.to_string(), n)).collect();
        Some(CountSection { query, sticker })
    };

    let doc = Document { version: FormatVersion::CURRENT.number(), keywords, count };
    let mut out = String::from(HEADER);
    out.push_str(&serde_json::to_string(&doc)?);
    out.push('\n');
    Ok(out)
}

/// Write `content` to a temp file next to `path`, fsync it and rename it
/// over `path`. The parent directory is created when missing.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid keywords file name: {}", path.display()))?;
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = parent.join(format!(".{file_name}.tmp.{}.{seq}", std::process::id()));

    let written = write_synced(&tmp_path, content.as_bytes());
    if let Err(err) = written.and_then(|_| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("writing {}", path.display()));
    }

    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut f = File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}

/// Remove `//` and `/* */` comments that sit outside JSON string literals.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Version named by a comment marker on one of the first two lines.
fn version_from_markers(text: &str) -> Option<FormatVersion> {
    let head: Vec<&str> = text
        .lines()
        .take(2)
        .map(str::trim_start)
        .filter(|line| line.starts_with("//") || line.starts_with("/*"))
        .collect();
    if head.iter().any(|line| line.contains(MARKER_V3)) {
        Some(FormatVersion::V3)
    } else if head.iter().any(|line| line.contains(MARKER_V2)) {
        Some(FormatVersion::V2)
    } else {
        None
    }
}

/// Fallback detection for unmarked documents.
fn version_from_shape(root: &Map<String, Value>) -> FormatVersion {
    let tagged = root.get("version").map_or(false, Value::is_number);
    let wrapped = root.get("keywords").map_or(false, Value::is_object);
    if tagged || wrapped {
        return FormatVersion::V3;
    }
    let first = root
        .values()
        .filter_map(Value::as_array)
        .find_map(|ids| ids.first());
    match first {
        Some(Value::String(_)) => FormatVersion::V2,
        _ => FormatVersion::V1,
    }
}

fn decode_keywords(map: &Map<String, Value>, version: FormatVersion, out: &mut Decoded) {
    for (keyword, value) in map {
        if keyword.is_empty() {
            tracing::warn!("skipping entry with empty keyword");
            out.skip();
            continue;
        }
        let Value::Array(ids) = value else {
            tracing::warn!(%keyword, "skipping entry: array of ids expected");
            out.skip();
            continue;
        };
        if ids.is_empty() {
            tracing::warn!(%keyword, "skipping entry: no ids");
            out.skip();
            continue;
        }

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            match decode_item(id, version) {
                Some(item) => items.push(item),
                None => {
                    tracing::warn!(%keyword, %id, %version, "skipping malformed id");
                    out.skip();
                }
            }
        }
        out.index.extend(keyword, items);
    }
}

fn decode_item(value: &Value, version: FormatVersion) -> Option<ItemId> {
    let raw = match version {
        FormatVersion::V1 => value.as_object()?.get("id")?.as_str()?,
        FormatVersion::V2 | FormatVersion::V3 => value.as_str()?,
    };
    parse_id(raw)
}

fn parse_id(raw: &str) -> Option<ItemId> { raw.trim().parse().ok() }

fn decode_counts(count: &Map<String, Value>, out: &mut Decoded) {
    match count.get("query") {
        Some(Value::Object(query)) => {
            for (keyword, counts) in query {
                let Value::Object(counts) = counts else {
                    tracing::warn!(%keyword, "skipping query count: object expected");
                    out.skip();
                    continue;
                };
                if counts.is_empty() {
                    tracing::warn!(%keyword, "skipping query count: empty");
                    out.skip();
                    continue;
                }
                for (id, n) in counts {
                    match (parse_id(id), n.as_u64()) {
                        (Some(item), Some(n)) => out.usage.set_keyword_count(keyword, item, n),
                        _ => {
                            tracing::warn!(%keyword, %id, "skipping malformed query count");
                            out.skip();
                        }
                    }
                }
            }
        }
        Some(_) => {
            tracing::warn!("skipping \"query\" counts: object expected");
            out.skip();
        }
        None => {}
    }

    match count.get("sticker") {
        Some(Value::Object(sticker)) => {
            for (id, n) in sticker {
                match (parse_id(id), n.as_u64()) {
                    (Some(item), Some(n)) => out.usage.set_item_count(item, n),
                    _ => {
                        tracing::warn!(%id, "skipping malformed sticker count");
                        out.skip();
                    }
                }
            }
        }
        Some(_) => {
            tracing::warn!("skipping \"sticker\" counts: object expected");
            out.skip();
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_versions_from_markers() {
        let v3 = decode("// SATANAS3\n{\"keywords\":{}}").unwrap();
        assert_eq!(v3.version, FormatVersion::V3);
        let v2 = decode("// keywords\n// SATANAS2\n{\"cat\":[\"1\"]}").unwrap();
        assert_eq!(v2.version, FormatVersion::V2);
        let v1 = decode("{\"cat\":[{\"id\":\"1\"}]}").unwrap();
        assert_eq!(v1.version, FormatVersion::V1);
    }

    #[test]
    fn block_comment_marker_with_crlf_is_detected() {
        let d = decode("/* sticker keywords */\r\n/* SATANAS2 */\r\n{\"cat\": [\"8\"]}\r\n").unwrap();
        assert_eq!(d.version, FormatVersion::V2);
        assert_eq!(d.index.items("cat"), Some(&[8][..]));
    }

    #[test]
    fn marker_inside_json_body_is_not_a_marker() {
        let d = decode("{\"SATANAS3\":[{\"id\":\"5\"}]}").unwrap();
        assert_eq!(d.version, FormatVersion::V1);
        assert_eq!(d.index.items("SATANAS3"), Some(&[5][..]));
    }

    #[test]
    fn unmarked_documents_fall_back_to_shape() {
        let d = decode("{\"cat\":[\"1\",\"2\"]}").unwrap();
        assert_eq!(d.version, FormatVersion::V2);
        assert_eq!(d.index.items("cat"), Some(&[1, 2][..]));

        let d = decode("{\"version\":3,\"keywords\":{\"cat\":[\"9\"]}}").unwrap();
        assert_eq!(d.version, FormatVersion::V3);
        assert_eq!(d.index.items("cat"), Some(&[9][..]));
    }

    #[test]
    fn legacy_keyword_named_keywords_is_not_v3() {
        let d = decode("{\"keywords\":[\"4\"]}").unwrap();
        assert_eq!(d.version, FormatVersion::V2);
        assert_eq!(d.index.items("keywords"), Some(&[4][..]));
    }

    #[test]
    fn rejects_future_versions() {
        assert!(decode("{\"version\":4,\"keywords\":{}}").is_err());
    }

    #[test]
    fn document_level_errors_abort() {
        assert!(decode("// SATANAS3\n{not json").is_err());
        assert!(decode("[1,2,3]").is_err());
        assert!(decode("// SATANAS3\n{\"keywords\":[]}").is_err());
        assert!(decode("// SATANAS3\n{\"count\":{}}").is_err());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let text = r#"// SATANAS3
{"keywords":{"cat":["1","oops",2],"dog":[],"eel":"3","fox":["4"]},
 "count":{"query":{"cat":{"1":2,"x":1},"dog":{}},"sticker":{"1":"many","4":3}}}"#;
        let d = decode(text).unwrap();
        assert_eq!(d.index.items("cat"), Some(&[1][..]));
        assert_eq!(d.index.items("fox"), Some(&[4][..]));
        assert!(d.index.items("dog").is_none());
        assert!(d.index.items("eel").is_none());
        assert_eq!(d.usage.keyword_count("cat", 1), 2);
        assert_eq!(d.usage.item_count(4), 3);
        assert_eq!(d.usage.item_count(1), 0);
        // "oops", 2, "dog" list, "eel", "x", empty "dog" counts, "many"
        assert_eq!(d.skipped, 7);
    }

    #[test]
    fn malformed_v1_elements_are_skipped() {
        let text = r#"{"cat":[{"id":"1"},{"id":5},"7",{"name":"x"},{"id":"nope"}],"dog":{"id":"2"},"eel":[{"id":"3"}]}"#;
        let d = decode(text).unwrap();
        assert_eq!(d.version, FormatVersion::V1);
        assert_eq!(d.index.items("cat"), Some(&[1][..]));
        assert_eq!(d.index.items("eel"), Some(&[3][..]));
        assert!(d.index.items("dog").is_none());
        // numeric id, bare string, missing id, non-decimal id, "dog" not an array
        assert_eq!(d.skipped, 5);
    }

    #[test]
    fn duplicate_ids_collapse_on_load() {
        let d = decode("// SATANAS3\n{\"keywords\":{\"cat\":[\"1\",\"1\",\"2\"]}}").unwrap();
        assert_eq!(d.index.items("cat"), Some(&[1, 2][..]));
    }

    #[test]
    fn strip_comments_keeps_strings_intact() {
        let text = "// head\n{\"a//b\": \"/*x*/\" /* gone */, \"c\": 1} // tail";
        let stripped = strip_comments(text);
        let v: Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["a//b"], "/*x*/");
        assert_eq!(v["c"], 1);
    }

    #[test]
    fn strip_comments_handles_escaped_quotes() {
        let stripped = strip_comments(r#"{"a\"//": 1}"#);
        let v: Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["a\"//"], 1);
    }

    #[test]
    fn encode_writes_marker_and_string_ids() {
        let mut index = KeywordIndex::new();
        index.add("cat", u64::MAX);
        let text = encode(&index, &UsageCounter::new()).unwrap();
        assert!(text.starts_with("// SATANAS3\n"));
        assert!(text.contains(&format!("\"{}\"", u64::MAX)));
        assert!(!text.contains("\"count\""));
    }

    #[test]
    fn encode_omits_empty_count_tables() {
        let mut index = KeywordIndex::new();
        index.add("cat", 1);
        let mut usage = UsageCounter::new();
        usage.set_item_count(1, 4);
        let text = encode(&index, &usage).unwrap();
        assert!(text.contains("\"sticker\":{\"1\":4}"));
        assert!(!text.contains("\"query\""));
    }
}
