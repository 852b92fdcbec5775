use prefork::http::parser::{ParseError, parse_http_request, percent_decode_path, strip_query};

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, "GET");
    assert_eq!(parsed.target, "/");
    assert_eq!(parsed.path, "/");
    assert_eq!(parsed.version, "HTTP/1.1");
}

#[test]
fn test_parse_scenario_request() {
    let req = b"GET /httptest/index.html HTTP/1.0\r\nHost: localhost\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, "GET");
    assert_eq!(parsed.path, "/httptest/index.html");
    assert_eq!(parsed.version, "HTTP/1.0");
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let req = b"GET /search.html?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.target, "/search.html?q=rust&page=2");
    assert_eq!(parsed.path, "/search.html");
}

#[test]
fn test_parse_percent_encoded_path() {
    let req = b"GET /in%20name.txt HTTP/1.0\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.path, "/in name.txt");
}

#[test]
fn test_query_is_stripped_before_decoding() {
    let req = b"GET /a%3Fb.txt?c=d HTTP/1.0\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.path, "/a?b.txt");
}

#[test]
fn test_parse_keeps_unknown_tokens() {
    let req = b"BREW /pot FOO/9.9\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, "BREW");
    assert_eq!(parsed.version, "FOO/9.9");
    assert_eq!(parsed.method(), None);
    assert_eq!(parsed.version(), None);
}

#[test]
fn test_parse_missing_tokens() {
    assert_eq!(parse_http_request(b"\r\n\r\n"), Err(ParseError::MissingMethod));
    assert_eq!(parse_http_request(b"GET\r\n\r\n"), Err(ParseError::MissingTarget));
    assert_eq!(parse_http_request(b"GET /\r\n\r\n"), Err(ParseError::MissingVersion));
}

#[test]
fn test_parse_non_utf8_request_line() {
    let req = b"GET /\xff\xfe HTTP/1.0\r\n\r\n";

    assert_eq!(parse_http_request(req), Err(ParseError::InvalidRequest));
}

#[test]
fn test_parse_only_looks_at_first_line() {
    let req = b"GET /a.txt HTTP/1.0\r\nBrokenHeader\r\n\xff\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.path, "/a.txt");
}

#[test]
fn test_parse_extra_whitespace() {
    let req = b"GET    /a.txt   HTTP/1.0\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, "GET");
    assert_eq!(parsed.path, "/a.txt");
    assert_eq!(parsed.version, "HTTP/1.0");
}

#[test]
fn test_traversal_survives_decoding() {
    let req = b"GET /%2e%2e/etc/passwd HTTP/1.0\r\n\r\n";
    let parsed = parse_http_request(req).unwrap();

    assert_eq!(parsed.path, "/../etc/passwd");
    assert!(parsed.is_traversal());
}

#[test]
fn test_strip_query() {
    assert_eq!(strip_query("/a?b?c"), "/a");
    assert_eq!(strip_query("/plain"), "/plain");
    assert_eq!(strip_query("?only"), "");
}

#[test]
fn test_percent_decode_borrows_when_unescaped() {
    assert!(matches!(
        percent_decode_path("/plain/path"),
        std::borrow::Cow::Borrowed(_)
    ));
}
