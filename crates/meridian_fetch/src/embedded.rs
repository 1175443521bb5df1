//! Extraction of JSON documents embedded in HTML pages.

use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script([^>]*)>(.*?)</script>"#).expect("Valid script regex")
});

static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<meta\s[^>]*>"#).expect("Valid meta regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Valid attribute regex")
});

fn parse_error(what: &str) -> FetchError {
    FetchError::new(FetchErrorKind::Parse(format!("{} not found in page", what)))
}

fn attributes(tag: &str) -> impl Iterator<Item = (String, String)> + '_ {
    ATTR_RE.captures_iter(tag).map(|c| {
        let value = c.get(2).or_else(|| c.get(3)).map(|m| m.as_str()).unwrap_or("");
        (c[1].to_ascii_lowercase(), unescape(value))
    })
}

/// Decode HTML character references in an attribute value.
pub fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Body of the `<script>` whose `id` attribute equals `id`.
pub fn script_by_id<'a>(html: &'a str, id: &str) -> Option<&'a str> {
    SCRIPT_RE.captures_iter(html).find_map(|c| {
        let attrs = c.get(1)?.as_str();
        attributes(attrs)
            .any(|(k, v)| k == "id" && v == id)
            .then(|| c.get(2).map(|m| m.as_str().trim()))
            .flatten()
    })
}

/// Parse the `<script id="{id}">` JSON document.
pub fn json_script(html: &str, id: &str) -> MeridianResult<Value> {
    let body = script_by_id(html, id).ok_or_else(|| parse_error(id))?;
    serde_json::from_str(body)
        .map_err(|e| FetchError::new(FetchErrorKind::Parse(format!("{}: {}", id, e))).into())
}

/// The Next.js `__NEXT_DATA__` document.
pub fn next_data(html: &str) -> MeridianResult<Value> {
    json_script(html, "__NEXT_DATA__")
}

/// TikTok's embedded state, in either its legacy or its rehydration form.
pub fn sigi_state(html: &str) -> MeridianResult<Value> {
    json_script(html, "SIGI_STATE").or_else(|_| json_script(html, "__UNIVERSAL_DATA_FOR_REHYDRATION__"))
}

/// First `application/json` script whose body mentions `needle`.
pub fn json_script_containing(html: &str, needle: &str) -> MeridianResult<Value> {
    SCRIPT_RE
        .captures_iter(html)
        .filter(|c| {
            attributes(c.get(1).map(|m| m.as_str()).unwrap_or(""))
                .any(|(k, v)| k == "type" && v.eq_ignore_ascii_case("application/json"))
        })
        .filter_map(|c| c.get(2).map(|m| m.as_str()))
        .filter(|body| body.contains(needle))
        .find_map(|body| serde_json::from_str(body.trim()).ok())
        .ok_or_else(|| parse_error(needle).into())
}

/// A JSON value assigned to a JS global, e.g. `window.__INITIAL_STATE__ = {...};`
/// or `var profile = {...};`.
pub fn js_global(html: &str, name: &str) -> MeridianResult<Value> {
    let pattern = format!(r"(?:window\.|var\s+|let\s+|const\s+)?\b{}\s*=\s*", regex::escape(name));
    let re = Regex::new(&pattern)
        .map_err(|e| FetchError::new(FetchErrorKind::Parse(e.to_string())))?;
    for m in re.find_iter(html) {
        let rest = &html[m.end()..];
        if let Some(doc) = balanced_json(rest) {
            if let Ok(value) = serde_json::from_str(doc) {
                return Ok(value);
            }
        }
    }
    Err(parse_error(name).into())
}

/// The `window.__INITIAL_STATE__` document.
pub fn initial_state(html: &str) -> MeridianResult<Value> {
    js_global(html, "__INITIAL_STATE__")
}

/// The leading balanced `{...}` or `[...]` of `text`, string-aware.
pub fn balanced_json(text: &str) -> Option<&str> {
    let start = text.find(|c: char| !c.is_whitespace())?;
    let body = &text[start..];
    let (open, close) = match body.as_bytes().first()? {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in body.as_bytes().iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// `content` of the `<meta>` tag whose `property` or `name` is `key`.
pub fn meta_content(html: &str, key: &str) -> Option<String> {
    META_RE.find_iter(html).find_map(|tag| {
        let attrs: Vec<(String, String)> = attributes(tag.as_str()).collect();
        let named = attrs
            .iter()
            .any(|(k, v)| (k == "property" || k == "name") && v.eq_ignore_ascii_case(key));
        if !named {
            return None;
        }
        attrs.into_iter().find(|(k, _)| k == "content").map(|(_, v)| v)
    })
}

/// Every value stored under `key`, anywhere in the document.
pub fn find_all<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    let mut found = Vec::new();
    let mut stack = vec![value];
    while let Some(v) = stack.pop() {
        match v {
            Value::Object(map) => {
                for (k, child) in map {
                    if k == key {
                        found.push(child);
                    }
                    stack.push(child);
                }
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
<meta property="og:title" content="Durov&#39;s Channel">
<meta content="https://cdn.example/a.jpg" property="og:image" />
<script id="__NEXT_DATA__" type="application/json">{"props":{"pageProps":{"ok":true}}}</script>
<script type="application/json" data-sjs>{"require":[["xdt_api__v1__media",{"n":1}]]}</script>
<script>window.__INITIAL_STATE__ = {"a":"}{","b":[1,2]}; var profile = {"name":"x"};</script>
</head></html>"#;

    #[test]
    fn test_next_data() {
        assert_eq!(next_data(PAGE).unwrap()["props"]["pageProps"]["ok"], true);
        assert!(next_data("<html></html>").is_err());
    }

    #[test]
    fn test_js_globals() {
        let state = initial_state(PAGE).unwrap();
        assert_eq!(state["a"], "}{");
        assert_eq!(js_global(PAGE, "profile").unwrap()["name"], "x");
    }

    #[test]
    fn test_json_script_containing() {
        let doc = json_script_containing(PAGE, "xdt_api__v1__media").unwrap();
        assert_eq!(doc["require"][0][1]["n"], 1);
    }

    #[test]
    fn test_meta_either_order() {
        assert_eq!(meta_content(PAGE, "og:title").as_deref(), Some("Durov's Channel"));
        assert_eq!(meta_content(PAGE, "og:image").as_deref(), Some("https://cdn.example/a.jpg"));
        assert!(meta_content(PAGE, "og:description").is_none());
    }

    #[test]
    fn test_unescape_named_and_numeric() {
        assert_eq!(
            unescape("Follow &#064;nasa &#x2F; caf&eacute; &#8217;s"),
            "Follow @nasa / caf\u{e9} \u{2019}s"
        );
        assert_eq!(unescape("a &amp;lt; b"), "a &lt; b");
    }

    #[test]
    fn test_find_all_nested() {
        let doc: Value = serde_json::json!({"a": [{"k": 1}, {"b": {"k": 2}}]});
        let mut values: Vec<i64> = find_all(&doc, "k").iter().filter_map(|v| v.as_i64()).collect();
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_balanced_json_unterminated() {
        assert_eq!(balanced_json(" {\"a\":[1]} tail"), Some("{\"a\":[1]}"));
        assert!(balanced_json("{\"a\":").is_none());
        assert!(balanced_json("nope").is_none());
    }
}
