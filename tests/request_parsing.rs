//! Host-level tests for the request line, query string, header and line-reader parsing.

mod common;

use ambient_node::Error;
use ambient_node::http::{
    CHUNK_SIZE, Headers, Method, READ_TIMEOUT, RequestReader, normalize_route, parse_query,
    parse_request_line, query_value,
};
use common::{MockConnection, block_on};

#[test]
fn request_line_with_query_splits_route_and_pairs() {
    let request = parse_request_line("GET /data?x=1&y=two HTTP/1.1").expect("well-formed line");
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.route.as_str(), "/data");
    assert_eq!(request.protocol.as_str(), "HTTP/1.1");
    let query = request.query_params.expect("query present");
    assert_eq!(query_value(&query, "x"), Some("1"));
    assert_eq!(query_value(&query, "y"), Some("two"));
    assert_eq!(query_value(&query, "z"), None);
}

#[test]
fn request_line_without_query_has_no_params() {
    let request = parse_request_line("POST /settings HTTP/1.0").expect("well-formed line");
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.route.as_str(), "/settings");
    assert!(request.query_params.is_none());
}

#[test]
fn request_line_with_empty_query_has_empty_params() {
    let request = parse_request_line("GET /find? HTTP/1.0").expect("well-formed line");
    assert_eq!(request.query_params.map(|query| query.len()), Some(0));
}

#[test]
fn query_pair_without_equals_has_empty_value() {
    let query = parse_query("flag&key=value&&");
    assert_eq!(query.len(), 2);
    assert_eq!(query_value(&query, "flag"), Some(""));
    assert_eq!(query_value(&query, "key"), Some("value"));
}

#[test]
fn query_values_are_not_percent_decoded() {
    let query = parse_query("name=a%20b");
    assert_eq!(query_value(&query, "name"), Some("a%20b"));
}

#[test]
fn malformed_request_lines_are_rejected() {
    for line in ["", "GET", "GET /", "GET  / HTTP/1.0", "GET / HTTP/1.0 extra"] {
        assert!(
            matches!(parse_request_line(line), Err(Error::MalformedRequest(_))),
            "{line:?} should be malformed"
        );
    }
}

#[test]
fn unknown_methods_are_kept_as_other() {
    let request = parse_request_line("BREW /pot HTTP/1.0").expect("three tokens");
    assert_eq!(request.method, Method::Other);
}

#[test]
fn routes_are_normalized() {
    assert_eq!(normalize_route("").as_str(), "/");
    assert_eq!(normalize_route("/").as_str(), "/");
    assert_eq!(normalize_route("data").as_str(), "/data");
    assert_eq!(normalize_route("/data/").as_str(), "/data");
    assert_eq!(normalize_route("/hard-reset").as_str(), "/hard-reset");
}

#[test]
fn headers_are_matched_case_insensitively() {
    let mut headers = Headers::default();
    headers.absorb("content-TYPE: multipart/form-data; boundary=xyz");
    headers.absorb("Content-Length: 42");
    headers.absorb("X-Ignored: yes");
    assert_eq!(
        headers.content_type(),
        Some("multipart/form-data; boundary=xyz")
    );
    assert_eq!(headers.content_length(), Some(42));
    assert!(headers.is_multipart());
}

#[test]
fn reader_splits_lines_across_tiny_reads() {
    let mut conn =
        MockConnection::new("GET / HTTP/1.0\r\nHost: node\r\n\r\n").with_read_chunk(3);
    let mut reader = RequestReader::new(READ_TIMEOUT);
    block_on(async {
        assert_eq!(
            reader.read_line(&mut conn).await.expect("read"),
            Some("GET / HTTP/1.0")
        );
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), Some("Host: node"));
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), Some(""));
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), None);
    });
    assert!(reader.is_eof());
}

#[test]
fn reader_returns_unterminated_tail_at_end_of_stream() {
    let mut conn = MockConnection::new("first\nlast");
    let mut reader = RequestReader::new(READ_TIMEOUT);
    block_on(async {
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), Some("first"));
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), Some("last"));
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), None);
    });
}

#[test]
fn reader_hands_out_overlong_lines_in_pieces() {
    let long = "a".repeat(CHUNK_SIZE + 10);
    let mut conn = MockConnection::new(&format!("{long}\r\nnext\r\n"));
    let mut reader = RequestReader::new(READ_TIMEOUT);
    block_on(async {
        let first = reader
            .read_line(&mut conn)
            .await
            .expect("read")
            .map(str::len);
        assert_eq!(first, Some(CHUNK_SIZE));
        let second = reader
            .read_line(&mut conn)
            .await
            .expect("read")
            .map(str::len);
        assert_eq!(second, Some(10));
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), Some("next"));
    });
}

#[test]
fn reader_stops_at_content_length() {
    let mut conn = MockConnection::new("body line\r\nnot part of the body\r\n");
    let mut reader = RequestReader::new(READ_TIMEOUT);
    reader.limit_body("body line\r\n".len());
    block_on(async {
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), Some("body line"));
        assert_eq!(reader.read_line(&mut conn).await.expect("read"), None);
    });
}

#[test]
fn reader_rejects_invalid_utf8() {
    let mut conn = MockConnection::from_bytes(b"GET /\xff HTTP/1.0\r\n");
    let mut reader = RequestReader::new(READ_TIMEOUT);
    let result = block_on(async { reader.read_line(&mut conn).await.map(|line| line.is_some()) });
    assert!(matches!(result, Err(Error::MalformedRequest(_))));
}
