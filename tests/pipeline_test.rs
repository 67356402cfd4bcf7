//! End-to-end checks of the ingestion and retrieval building blocks that
//! run without external services: chunking determinism, token and
//! signature handling, prompt assembly, and refresh eligibility.

use minirag_server::kb::chunking::Chunker;
use minirag_server::kb::extract::html_to_text;
use minirag_server::orchestrator::{build_messages, RetrievedChunk};
use minirag_server::security::{
    generate_api_token, hash_api_token, hmac_sign, verify_password, FieldCipher,
};
use minirag_server::shared::models::RefreshSchedule;
use minirag_server::workers::refresh::is_due;
use uuid::Uuid;

#[test]
fn ingest_chunking_is_idempotent_on_content() {
    let content = "MiniRAG is a RAG platform. It supports multi-tenancy.\n\n".repeat(20);
    let chunker = Chunker::default();

    let first = chunker.chunk_text(&content);
    let second = chunker.chunk_text(&content);

    assert!(!first.is_empty());
    assert_eq!(first, second);
    let ordinals: Vec<i32> = first.iter().map(|c| c.ordinal).collect();
    let expected: Vec<i32> = (0..first.len() as i32).collect();
    assert_eq!(ordinals, expected);
}

#[test]
fn url_extraction_feeds_clean_text_into_chunker() {
    let html = "<html><head><style>.x{}</style></head><body>\
        <h1>Docs</h1><p>MiniRAG   is a RAG platform.</p>\
        <script>tracking();</script>\
        <p>It supports multi-tenancy.</p></body></html>";
    let text = html_to_text(html);
    assert!(text.contains("MiniRAG is a RAG platform."));
    assert!(text.contains("multi-tenancy"));
    assert!(!text.contains("tracking"));

    let chunks = Chunker::default().chunk_text(&text);
    assert_eq!(chunks.len(), 1);
}

#[test]
fn retrieved_context_is_numbered_in_prompt_order() {
    let retrieved = vec![
        RetrievedChunk {
            chunk_id: Uuid::new_v4(),
            content: "MiniRAG is a RAG platform.".into(),
            score: 0.91,
            source_id: None,
        },
        RetrievedChunk {
            chunk_id: Uuid::new_v4(),
            content: "It supports multi-tenancy.".into(),
            score: 0.88,
            source_id: None,
        },
    ];
    let messages = build_messages(
        "You are a helpful assistant.",
        &retrieved,
        &[],
        "What does it support?",
    );

    let system = &messages[0].content;
    let first = system.find("[1] MiniRAG").expect("first chunk missing");
    let second = system.find("[2] It supports").expect("second chunk missing");
    assert!(first < second);
    assert_eq!(messages.last().unwrap().content, "What does it support?");
}

#[test]
fn opaque_token_digests_are_stable_and_distinct() {
    let token = generate_api_token();
    let digest = hash_api_token(&token);
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, hash_api_token(&token));
    assert_ne!(digest, hash_api_token(&generate_api_token()));
}

#[test]
fn credentials_survive_an_encryption_round_trip() {
    let cipher = FieldCipher::new(&[42u8; 32]);
    let creds = r#"{"api_key":"sk-proj-abcdef"}"#;
    let stored = cipher.encrypt_value(creds).unwrap();
    assert!(!stored.contains("sk-proj"));
    assert_eq!(cipher.decrypt_value(&stored).unwrap(), creds);
}

#[test]
fn password_digest_rejects_wrong_password() {
    let digest = minirag_server::security::hash_password("pw12345678").unwrap();
    assert!(verify_password("pw12345678", &digest));
    assert!(!verify_password("pw12345679", &digest));
}

#[test]
fn webhook_signature_matches_receiver_computation() {
    let secret = "s";
    let body = br#"{"source_id":"x","chunk_count":2}"#;
    let signature = hmac_sign(secret, body);
    // A receiver recomputing over the same bytes gets the same hex digest.
    assert_eq!(signature, hmac_sign(secret, body));
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn hourly_source_refreshed_seventy_minutes_ago_is_due() {
    let now = chrono::Utc::now().naive_utc();
    let last = now - chrono::Duration::minutes(70);
    assert!(is_due(RefreshSchedule::Hourly, Some(last), now));
    assert!(!is_due(
        RefreshSchedule::Daily,
        Some(now - chrono::Duration::hours(23)),
        now
    ));
}
