use http::HeaderMap;

/// Header set by Google front ends on inbound requests.
pub const TRACE_CONTEXT_HEADER: &str = "x-cloud-trace-context";

/// Parsed `X-Cloud-Trace-Context` value: `TRACE_ID/SPAN_ID;o=OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: Option<String>,
    pub sampled: Option<bool>,
}

impl TraceContext {
    /// Parse a header value. Returns `None` when there is no `/` or the
    /// part before it is empty.
    pub fn parse(header: &str) -> Option<Self> {
        let (trace_id, rest) = header.trim().split_once('/')?;
        if trace_id.is_empty() {
            return None;
        }

        let (span, options) = match rest.split_once(';') {
            Some((span, options)) => (span, Some(options)),
            None => (rest, None),
        };
        let span_id = Some(span.trim()).filter(|s| !s.is_empty()).map(str::to_string);
        let sampled = options
            .and_then(|o| o.trim().strip_prefix("o="))
            .and_then(|flag| match flag.trim() {
                "1" => Some(true),
                "0" => Some(false),
                _ => None,
            });

        Some(TraceContext {
            trace_id: trace_id.to_string(),
            span_id,
            sampled,
        })
    }

    /// Cloud Logging trace resource name.
    pub fn resource_name(&self, project_id: &str) -> String {
        format!("projects/{}/traces/{}", project_id, self.trace_id)
    }
}

/// Raw trace header value from a request's headers, if present and valid UTF-8.
pub fn trace_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TRACE_CONTEXT_HEADER)
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue};

    #[test]
    fn parses_full_header() {
        let ctx = TraceContext::parse("105445aa7843bc8bf206b12000100000/1;o=1").unwrap();
        assert_eq!(ctx.trace_id, "105445aa7843bc8bf206b12000100000");
        assert_eq!(ctx.span_id.as_deref(), Some("1"));
        assert_eq!(ctx.sampled, Some(true));
    }

    #[test]
    fn options_are_optional() {
        let ctx = TraceContext::parse("abc/42").unwrap();
        assert_eq!(ctx.span_id.as_deref(), Some("42"));
        assert_eq!(ctx.sampled, None);

        let ctx = TraceContext::parse("abc/").unwrap();
        assert_eq!(ctx.span_id, None);
    }

    #[test]
    fn rejects_values_without_trace_prefix() {
        assert_eq!(TraceContext::parse("abc123"), None);
        assert_eq!(TraceContext::parse("/456;o=1"), None);
        assert_eq!(TraceContext::parse(""), None);
    }

    #[test]
    fn resource_name_format() {
        let ctx = TraceContext::parse("abc123/456;o=1").unwrap();
        assert_eq!(ctx.resource_name("my-proj"), "projects/my-proj/traces/abc123");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        let name = HeaderName::from_bytes(b"X-Cloud-Trace-Context").unwrap();
        headers.insert(name, HeaderValue::from_static("abc/1"));
        assert_eq!(trace_header(&headers), Some("abc/1"));
        assert_eq!(trace_header(&HeaderMap::new()), None);
    }
}
