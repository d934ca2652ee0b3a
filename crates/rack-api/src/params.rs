//! Request parameter collection.
//!
//! Options decode from three sources — form body, query string, and
//! headers — into a single [`Params`] the option codecs consume.

use axum::http::HeaderMap;
use rack_core::options::Params;

/// Decode a percent-encoded component (`+` means space).
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                match (
                    bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                    bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
                ) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Parse `k=v&k=v` pairs with percent decoding.
fn pairs(data: &str) -> Vec<(String, String)> {
    data.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// Collect request params from query string, headers, and form body.
pub fn collect(query: Option<&str>, headers: &HeaderMap, form: &[u8]) -> Params {
    let mut params = Params::default();
    if let Some(query) = query {
        for (k, v) in pairs(query) {
            params.query.insert(k, v);
        }
    }
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            params
                .headers
                .insert(name.as_str().to_string(), value.to_string());
        }
    }
    for (k, v) in pairs(&String::from_utf8_lossy(form)) {
        params.form.insert(k, v);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_and_plus() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("k%3Dv"), "k=v");
        assert_eq!(percent_decode("plain"), "plain");
        // Truncated escapes pass through.
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn collects_all_sources() {
        let mut headers = HeaderMap::new();
        headers.insert("height", "40".parse().unwrap());

        let params = collect(Some("limit=5"), &headers, b"description=a+build");
        assert_eq!(params.query.get("limit").map(String::as_str), Some("5"));
        assert_eq!(params.headers.get("height").map(String::as_str), Some("40"));
        assert_eq!(
            params.form.get("description").map(String::as_str),
            Some("a build")
        );
    }

    #[test]
    fn form_pairs_with_encoded_maps() {
        // A map-valued field arrives form-encoded inside the value.
        let params = collect(None, &HeaderMap::new(), b"parameters=a%3D1%26b%3D2");
        assert_eq!(
            params.form.get("parameters").map(String::as_str),
            Some("a=1&b=2")
        );
    }
}
