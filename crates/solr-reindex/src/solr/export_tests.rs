//! Tests for `export` module

use super::*;

const EXPORT_BODY: &str = r#"{
  "responseHeader": {"status": 0},
  "response": {
    "numFound": 3,
    "docs": [
      {"id": "1", "title": "Dune", "tags": ["scifi", "classic"]},
      {"id": "2", "title": "Brace } and \"quote\" ]", "nested": {"docs": [1, 2]}},
      {"id": "3", "title": "Café"}
    ]
  }
}"#;

fn scan_in_chunks(body: &[u8], chunk_size: usize) -> Result<Vec<Document>> {
    let mut scanner = DocsArrayScanner::new();
    let mut docs = Vec::new();
    for chunk in body.chunks(chunk_size) {
        scanner.push(chunk, &mut docs)?;
    }
    scanner.finish()?;
    Ok(docs)
}

#[test]
fn test_scanner_extracts_nested_docs() {
    // Act
    let docs = scan_in_chunks(EXPORT_BODY.as_bytes(), 4096).unwrap();

    // Assert
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0]["id"], "1");
    assert_eq!(docs[0]["tags"][1], "classic");
    assert_eq!(docs[1]["title"], "Brace } and \"quote\" ]");
    assert_eq!(docs[2]["title"], "Café");
}

#[test]
fn test_scanner_is_chunk_boundary_independent() {
    // Arrange
    let whole = scan_in_chunks(EXPORT_BODY.as_bytes(), 4096).unwrap();

    // Act & Assert
    for chunk_size in [1, 2, 3, 7, 64] {
        let chunked = scan_in_chunks(EXPORT_BODY.as_bytes(), chunk_size).unwrap();
        assert_eq!(chunked, whole, "chunk size {chunk_size}");
    }
}

#[test]
fn test_scanner_emits_docs_before_body_completes() {
    // Arrange
    let mut scanner = DocsArrayScanner::new();
    let mut docs = Vec::new();

    // Act
    scanner
        .push(br#"{"response":{"docs":[{"id":"a"},{"id":"#, &mut docs)
        .unwrap();

    // Assert
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["id"], "a");
    assert!(scanner.finish().is_err());
}

#[test]
fn test_scanner_ignores_docs_string_values() {
    let body = br#"{"note":"docs","response":{"docs":[{"id":"x"}]}}"#;

    let docs = scan_in_chunks(body, 5).unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["id"], "x");
}

#[test]
fn test_scanner_skips_non_array_docs_value() {
    let body = br#"{"meta":{"docs":null},"response":{"docs":[{"id":"y"}]}}"#;

    let docs = scan_in_chunks(body, 3).unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["id"], "y");
}

#[test]
fn test_scanner_empty_and_missing_docs() {
    assert!(scan_in_chunks(br#"{"response":{"docs":[]}}"#, 8).unwrap().is_empty());
    assert!(scan_in_chunks(br#"{"responseHeader":{"status":0}}"#, 8).unwrap().is_empty());
}

#[test]
fn test_scanner_exception_document_fails() {
    // Arrange
    let body = br#"{"response":{"docs":[{"id":"1"},{"EXCEPTION":"java.io.IOException: boom"}]}}"#;

    // Act
    let result = scan_in_chunks(body, 16);

    // Assert
    match result {
        Err(Error::Export(message)) => assert!(message.contains("boom")),
        other => panic!("expected export error, got {other:?}"),
    }
}

#[test]
fn test_scanner_non_object_element_fails() {
    let result = scan_in_chunks(br#"{"response":{"docs":[1]}}"#, 4);

    assert!(matches!(result, Err(Error::Export(_))));
}

#[test]
fn test_scanner_stops_after_docs_array() {
    // Arrange
    let mut scanner = DocsArrayScanner::new();
    let mut docs = Vec::new();

    // Act
    scanner
        .push(br#"{"response":{"docs":[{"id":"1"}]},"more":{"docs":[{"id":"2"}]}}"#, &mut docs)
        .unwrap();

    // Assert
    assert!(scanner.is_done());
    assert_eq!(docs.len(), 1);
}
