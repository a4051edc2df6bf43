//! Multipart upload lifecycle through the AWS SDK: assembly order,
//! session isolation, abort, and failure modes.

mod common;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use common::TestServer;

async fn start_upload(client: &Client, key: &str) -> String {
    client
        .create_multipart_upload()
        .bucket("itest")
        .key(key)
        .send()
        .await
        .expect("initiate should succeed")
        .upload_id()
        .expect("initiate must return an upload id")
        .to_string()
}

async fn put_part(client: &Client, key: &str, upload_id: &str, number: i32, data: &[u8]) -> String {
    client
        .upload_part()
        .bucket("itest")
        .key(key)
        .upload_id(upload_id)
        .part_number(number)
        .body(ByteStream::from(data.to_vec()))
        .send()
        .await
        .expect("upload_part should succeed")
        .e_tag()
        .expect("upload_part must return an ETag")
        .to_string()
}

async fn complete(client: &Client, key: &str, upload_id: &str, parts: &[(i32, String)]) {
    let mut completed = CompletedMultipartUpload::builder();
    for (number, etag) in parts {
        completed = completed.parts(
            CompletedPart::builder()
                .part_number(*number)
                .e_tag(etag)
                .build(),
        );
    }
    client
        .complete_multipart_upload()
        .bucket("itest")
        .key(key)
        .upload_id(upload_id)
        .multipart_upload(completed.build())
        .send()
        .await
        .expect("complete should succeed");
}

async fn object_body(client: &Client, key: &str) -> Vec<u8> {
    client
        .get_object()
        .bucket("itest")
        .key(key)
        .send()
        .await
        .expect("GET should succeed")
        .body
        .collect()
        .await
        .unwrap()
        .into_bytes()
        .to_vec()
}

#[tokio::test]
async fn test_multipart_equivalence() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    let upload_id = start_upload(&client, "multi.bin").await;

    // Upload out of order; assembly follows part numbers
    let etag2 = put_part(&client, "multi.bin", &upload_id, 2, b"part-two").await;
    let etag1 = put_part(&client, "multi.bin", &upload_id, 1, b"part-one-").await;

    complete(
        &client,
        "multi.bin",
        &upload_id,
        &[(1, etag1), (2, etag2)],
    )
    .await;

    assert_eq!(object_body(&client, "multi.bin").await, b"part-one-part-two");
}

#[tokio::test]
async fn test_upload_part_etag_is_md5() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    let upload_id = start_upload(&client, "etag.bin").await;
    let etag = put_part(&client, "etag.bin", &upload_id, 1, b"hello").await;
    // Bare hex MD5, no quotes
    assert_eq!(etag.trim_matches('"'), "5d41402abc4b2a76b9719d911017c592");
}

#[tokio::test]
async fn test_part_overwrite_replaces_content() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    let upload_id = start_upload(&client, "redo.bin").await;
    put_part(&client, "redo.bin", &upload_id, 1, b"first attempt").await;
    let etag = put_part(&client, "redo.bin", &upload_id, 1, b"second attempt").await;

    complete(&client, "redo.bin", &upload_id, &[(1, etag)]).await;
    assert_eq!(object_body(&client, "redo.bin").await, b"second attempt");
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    // Scenario: two sessions on the same key; completing A must leave B
    // fully usable.
    let session_a = start_upload(&client, "concurrent.bin").await;
    let session_b = start_upload(&client, "concurrent.bin").await;
    assert_ne!(session_a, session_b);

    let a1 = put_part(&client, "concurrent.bin", &session_a, 1, b"A1").await;
    let b1 = put_part(&client, "concurrent.bin", &session_b, 1, b"B1").await;

    complete(&client, "concurrent.bin", &session_a, &[(1, a1)]).await;
    assert_eq!(object_body(&client, "concurrent.bin").await, b"A1");

    // B still accepts parts and completes after A is gone
    let b2 = put_part(&client, "concurrent.bin", &session_b, 2, b"B2").await;
    complete(&client, "concurrent.bin", &session_b, &[(1, b1), (2, b2)]).await;
    assert_eq!(object_body(&client, "concurrent.bin").await, b"B1B2");
}

#[tokio::test]
async fn test_abort_leaves_sibling_session() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    let doomed = start_upload(&client, "aborted.bin").await;
    let survivor = start_upload(&client, "aborted.bin").await;
    put_part(&client, "aborted.bin", &doomed, 1, b"doomed").await;
    let s1 = put_part(&client, "aborted.bin", &survivor, 1, b"survivor").await;

    client
        .abort_multipart_upload()
        .bucket("itest")
        .key("aborted.bin")
        .upload_id(&doomed)
        .send()
        .await
        .expect("abort should succeed");

    // The aborted session is gone
    let dead = client
        .upload_part()
        .bucket("itest")
        .key("aborted.bin")
        .upload_id(&doomed)
        .part_number(2)
        .body(ByteStream::from(b"late".to_vec()))
        .send()
        .await;
    assert!(dead.is_err(), "uploading to an aborted session should fail");

    // Its sibling is untouched
    complete(&client, "aborted.bin", &survivor, &[(1, s1)]).await;
    assert_eq!(object_body(&client, "aborted.bin").await, b"survivor");
}

#[tokio::test]
async fn test_complete_unknown_upload_is_no_such_upload() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    let result = client
        .complete_multipart_upload()
        .bucket("itest")
        .key("nothing.bin")
        .upload_id("00000000000000000000000000000000")
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .parts(CompletedPart::builder().part_number(1).build())
                .build(),
        )
        .send()
        .await;

    let err = result.expect_err("completing an unknown upload should fail");
    let raw = err.raw_response().map(|r| r.status().as_u16());
    assert_eq!(raw, Some(404));
}

#[tokio::test]
async fn test_complete_with_missing_part_is_retryable() {
    let server = TestServer::spawn().await;
    let client = server.s3_client().await;

    let upload_id = start_upload(&client, "gappy.bin").await;
    let e1 = put_part(&client, "gappy.bin", &upload_id, 1, b"one").await;

    // Reference a part that was never uploaded
    let result = client
        .complete_multipart_upload()
        .bucket("itest")
        .key("gappy.bin")
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .parts(CompletedPart::builder().part_number(1).e_tag(&e1).build())
                .parts(CompletedPart::builder().part_number(2).e_tag("missing").build())
                .build(),
        )
        .send()
        .await;
    let err = result.expect_err("completing with a missing part should fail");
    let raw = err.raw_response().map(|r| r.status().as_u16());
    assert_eq!(raw, Some(400));

    // The failed completion consumed nothing: finish the session properly
    let e2 = put_part(&client, "gappy.bin", &upload_id, 2, b"two").await;
    complete(&client, "gappy.bin", &upload_id, &[(1, e1), (2, e2)]).await;
    assert_eq!(object_body(&client, "gappy.bin").await, b"onetwo");
}

#[tokio::test]
async fn test_upload_part_invalid_part_number() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // The SDK clamps part numbers client-side, so drive this one raw.
    let response = common::signed_request(
        &client,
        reqwest::Method::PUT,
        &server,
        "/itest/bad.bin?partNumber=0&uploadId=00000000000000000000000000000000",
        b"data".to_vec(),
    )
    .send()
    .await
    .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body = response.text().await.unwrap();
    assert!(body.contains("<Code>InvalidPart</Code>"), "body: {body}");
}
