use std::collections::BTreeMap;

use crate::observation::AttributeValue;
use crate::transport::RawResponse;

/// Markers whose occurrence counts tend to move when a payload breaks out of
/// its intended context: error text, structural html, and json punctuation.
pub const KEYWORDS: &[&str] = &[
    "\",\"",
    "true",
    "false",
    "\"\"",
    "[]",
    "</html>",
    "error",
    "exception",
    "invalid",
    "warning",
    "stack",
    "sql syntax",
    "divisor",
    "divide",
    "ora-",
    "division",
    "infinity",
    "<script",
    "<div",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContentType {
    Html,
    Image,
    JavaScript,
    Json,
    Text,
    Xml,
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "Html",
            ContentType::Image => "Image",
            ContentType::JavaScript => "JavaScript",
            ContentType::Json => "Json",
            ContentType::Text => "Text",
            ContentType::Xml => "Xml",
            ContentType::Unknown => "Unknown",
        }
    }
}

// checked in order, first hit wins
const CONTENT_TYPE_CLASSIFIERS: &[(ContentType, &[&str])] = &[
    (ContentType::Html, &["text/html", "application/xhtml"]),
    (ContentType::Image, &["image/"]),
    (
        ContentType::JavaScript,
        &["javascript", "ecmascript", "text/jscript"],
    ),
    (ContentType::Json, &["json"]),
    (ContentType::Text, &["text/plain", "text/css", "text/csv"]),
    (ContentType::Xml, &["xml"]),
];

pub fn classify_content_type(header_value: Option<&str>) -> ContentType {
    let value = match header_value {
        Some(v) => v.to_ascii_lowercase(),
        None => return ContentType::Unknown,
    };
    for (kind, needles) in CONTENT_TYPE_CLASSIFIERS {
        if needles.iter().any(|n| value.contains(n)) {
            return *kind;
        }
    }
    ContentType::Unknown
}

/// Status, headers and content classification of one response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseAttributes {
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
    pub content_type: ContentType,
}

impl ResponseAttributes {
    pub fn into_attributes(self) -> BTreeMap<String, AttributeValue> {
        let mut out = BTreeMap::new();
        out.insert("headers".to_string(), AttributeValue::Map(self.headers));
        out.insert(
            "statuscode".to_string(),
            AttributeValue::Int(self.status_code as i64),
        );
        out.insert(
            "contenttype".to_string(),
            AttributeValue::Text(self.content_type.as_str().to_string()),
        );
        out
    }
}

/// Header names are lowercased; repeated headers are joined with ", " in the
/// order they arrived.
pub fn header_map(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (k, v) in headers.iter() {
        let key = k.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        out.entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(v);
            })
            .or_insert_with(|| v.clone());
    }
    out
}

pub fn analyze_attributes(resp: &RawResponse) -> ResponseAttributes {
    let headers = header_map(&resp.headers);
    let content_type = classify_content_type(headers.get("content-type").map(|s| s.as_str()));
    ResponseAttributes {
        headers,
        status_code: resp.status,
        content_type,
    }
}

/// Case-sensitive, non-overlapping occurrence count of every keyword in the
/// body. Invalid utf-8 is replaced rather than rejected.
pub fn count_keywords(body: &[u8]) -> BTreeMap<&'static str, u32> {
    let text = String::from_utf8_lossy(body);
    KEYWORDS
        .iter()
        .map(|kw| (*kw, text.matches(kw).count() as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> RawResponse {
        RawResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
            request: Vec::new(),
        }
    }

    #[test]
    fn keyword_counts_are_case_sensitive() {
        let counts = count_keywords(b"Error error error <div><div></html>");
        assert_eq!(counts["error"], 2);
        assert_eq!(counts["<div"], 2);
        assert_eq!(counts["</html>"], 1);
        assert_eq!(counts["exception"], 0);
        assert_eq!(counts.len(), KEYWORDS.len());
    }

    #[test]
    fn keyword_counts_on_empty_body_are_zero() {
        assert!(count_keywords(b"").values().all(|c| *c == 0));
    }

    #[test]
    fn content_type_priority() {
        assert_eq!(
            classify_content_type(Some("application/xhtml+xml")),
            ContentType::Html
        );
        assert_eq!(
            classify_content_type(Some("text/javascript; charset=utf-8")),
            ContentType::JavaScript
        );
        assert_eq!(
            classify_content_type(Some("application/problem+json")),
            ContentType::Json
        );
        assert_eq!(classify_content_type(Some("text/xml")), ContentType::Xml);
        assert_eq!(classify_content_type(Some("IMAGE/PNG")), ContentType::Image);
        assert_eq!(
            classify_content_type(Some("application/octet-stream")),
            ContentType::Unknown
        );
        assert_eq!(classify_content_type(None), ContentType::Unknown);
    }

    #[test]
    fn analyze_attributes_merges_duplicate_headers() {
        let attrs = analyze_attributes(&response(
            200,
            &[
                ("Set-Cookie", "a=1"),
                ("Content-Type", "text/html"),
                ("set-cookie", "b=2"),
            ],
            "<html></html>",
        ));
        assert_eq!(attrs.status_code, 200);
        assert_eq!(attrs.content_type, ContentType::Html);
        assert_eq!(attrs.headers["set-cookie"], "a=1, b=2");
    }

    #[test]
    fn analyze_attributes_defaults_on_bare_response() {
        let attrs = analyze_attributes(&RawResponse::default());
        assert!(attrs.headers.is_empty());
        assert_eq!(attrs.content_type, ContentType::Unknown);
        let map = attrs.into_attributes();
        assert_eq!(map["statuscode"], AttributeValue::Int(0));
    }
}
