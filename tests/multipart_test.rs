/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */


use bytes::Bytes;
use s3_object_transport::error::ErrorKind;
use s3_object_transport::metrics::MetricName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use test_utils::{
    test_transport, test_transport_with, wait_until, CapturedRequest, CapturingMetrics,
    StubResponse, StubServer,
};

fn upload_id_body(upload_id: &str) -> String {
    format!(
        "<InitiateMultipartUploadResult><Bucket>test-bucket</Bucket>\
         <UploadId>{upload_id}</UploadId></InitiateMultipartUploadResult>"
    )
}

fn part_number_of(req: &CapturedRequest) -> Option<u32> {
    let query = req.path_and_query.split_once('?')?.1;
    query
        .split('&')
        .find_map(|kv| kv.strip_prefix("partNumber="))
        .and_then(|n| n.parse().ok())
}

#[tokio::test]
async fn test_create_multipart_upload_parses_upload_id() {
    let server = StubServer::spawn(|_req| {
        StubResponse::new(200).with_body("<foo><UploadId>U-42</UploadId></foo>")
    })
    .await;
    let transport = test_transport(&server);

    let upload_id = transport.create_multipart_upload("my-key").await.unwrap();
    assert_eq!(upload_id, "U-42");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path_and_query, "/my-key?uploads");
    assert_eq!(requests[0].header("content-type"), Some("text/plain"));
}

#[tokio::test]
async fn test_create_multipart_upload_missing_upload_id() {
    let server = StubServer::spawn(|_req| StubResponse::new(200).with_body("<foo></foo>")).await;
    let transport = test_transport(&server);

    let err = transport.create_multipart_upload("my-key").await.unwrap_err();
    assert_eq!(*err.kind(), ErrorKind::ResponseParseFailed);
}

#[tokio::test]
async fn test_three_part_upload_happy_path() {
    let server = StubServer::spawn(|req| match (req.method.as_str(), part_number_of(req)) {
        ("POST", _) if req.path_and_query.ends_with("?uploads") => {
            StubResponse::new(200).with_body(upload_id_body("U-1"))
        }
        ("PUT", Some(n)) => StubResponse::new(200).with_header("ETag", format!("e{n}")),
        ("POST", _) => StubResponse::new(200),
        _ => StubResponse::new(404),
    })
    .await;

    let metrics = Arc::new(CapturingMetrics::default());
    let transport = test_transport_with(&server, {
        let metrics = Arc::clone(&metrics);
        move |builder| builder.metrics_publisher(metrics)
    });

    let num_parts = transport
        .put_object_multipart("my-key", 30, 3, |transfer| {
            Bytes::from(format!("part-{}-data", transfer.part_number()))
        })
        .await
        .unwrap();
    assert_eq!(num_parts, 3);

    // parts carried the upload id and part number in the signed path
    let part_puts = server.requests_matching("PUT", "/my-key?partNumber=");
    assert_eq!(part_puts.len(), 3);
    for put in &part_puts {
        assert!(put.path_and_query.ends_with("&uploadId=U-1"));
    }

    let completes = server.requests_matching("POST", "/my-key?uploadId=U-1");
    assert_eq!(completes.len(), 1);
    let expected_body = "<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n\
        <CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\n   \
        <Part>\n       <ETag>e1</ETag>\n       <PartNumber>1</PartNumber>\n   </Part>\n   \
        <Part>\n       <ETag>e2</ETag>\n       <PartNumber>2</PartNumber>\n   </Part>\n   \
        <Part>\n       <ETag>e3</ETag>\n       <PartNumber>3</PartNumber>\n   </Part>\n\
        </CompleteMultipartUpload>";
    assert_eq!(completes[0].body, Bytes::from_static(expected_body.as_bytes()));

    // no abort was issued
    assert!(server.requests_matching("DELETE", "/").is_empty());

    // every part recorded a success status
    wait_until(|| metrics.statuses.lock().unwrap().len() == 3).await;
    assert_eq!(*metrics.statuses.lock().unwrap(), vec![true, true, true]);

    wait_until(|| transport.open_connection_count() == 0).await;
}

#[tokio::test]
async fn test_single_part_upload_still_uses_multipart_protocol() {
    let server = StubServer::spawn(|req| match (req.method.as_str(), part_number_of(req)) {
        ("POST", _) if req.path_and_query.ends_with("?uploads") => {
            StubResponse::new(200).with_body(upload_id_body("U-7"))
        }
        ("PUT", Some(_)) => StubResponse::new(200).with_header("ETag", "only"),
        ("POST", _) => StubResponse::new(200),
        _ => StubResponse::new(404),
    })
    .await;
    let transport = test_transport(&server);

    let num_parts = transport
        .put_object_multipart("solo", 5, 1, |_| Bytes::from_static(b"tiny!"))
        .await
        .unwrap();
    assert_eq!(num_parts, 1);

    let methods: Vec<String> = server.requests().iter().map(|r| r.method.clone()).collect();
    assert_eq!(methods, vec!["POST", "PUT", "POST"]);
}

#[tokio::test]
async fn test_part_retries_then_succeeds() {
    let failed_once = Arc::new(AtomicBool::new(false));
    let failures = Arc::clone(&failed_once);

    let server = StubServer::spawn(move |req| match (req.method.as_str(), part_number_of(req)) {
        ("POST", _) if req.path_and_query.ends_with("?uploads") => {
            StubResponse::new(200).with_body(upload_id_body("U-1"))
        }
        ("PUT", Some(2)) if !failures.swap(true, Ordering::SeqCst) => StubResponse::new(500),
        ("PUT", Some(n)) => StubResponse::new(200).with_header("ETag", format!("e{n}")),
        ("POST", _) => StubResponse::new(200),
        _ => StubResponse::new(404),
    })
    .await;

    let metrics = Arc::new(CapturingMetrics::default());
    let transport = test_transport_with(&server, {
        let metrics = Arc::clone(&metrics);
        move |builder| builder.metrics_publisher(metrics)
    });

    let num_parts = transport
        .put_object_multipart("my-key", 30, 3, |transfer| {
            Bytes::from(format!("part-{}-data", transfer.part_number()))
        })
        .await
        .unwrap();
    assert_eq!(num_parts, 3);

    // part 2 was attempted twice
    let part2_puts: Vec<CapturedRequest> = server
        .requests_matching("PUT", "/my-key?partNumber=2")
        .into_iter()
        .collect();
    assert_eq!(part2_puts.len(), 2);

    // exactly one complete, carrying the retried part's etag
    let completes = server.requests_matching("POST", "/my-key?uploadId=U-1");
    assert_eq!(completes.len(), 1);
    let body = String::from_utf8(completes[0].body.to_vec()).unwrap();
    assert!(body.contains("<ETag>e2</ETag>"));

    // one failure status and three successes, in some order
    wait_until(|| metrics.statuses.lock().unwrap().len() == 4).await;
    let statuses = metrics.statuses.lock().unwrap();
    assert_eq!(statuses.iter().filter(|s| !**s).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s).count(), 3);
}

#[tokio::test]
async fn test_part_permanently_fails_aborts_upload() {
    let server = StubServer::spawn(|req| match (req.method.as_str(), part_number_of(req)) {
        ("POST", _) if req.path_and_query.ends_with("?uploads") => {
            StubResponse::new(200).with_body(upload_id_body("U-9"))
        }
        ("PUT", Some(1)) => StubResponse::new(500),
        ("PUT", Some(n)) => StubResponse::new(200).with_header("ETag", format!("e{n}")),
        ("POST", _) => StubResponse::new(200),
        ("DELETE", _) => StubResponse::new(204),
        _ => StubResponse::new(404),
    })
    .await;

    let transport = test_transport_with(&server, |builder| builder.max_part_retries(2));

    let err = transport
        .put_object_multipart("the-key", 20, 2, |transfer| {
            Bytes::from(format!("part-{}-data", transfer.part_number()))
        })
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), ErrorKind::PartFailed);

    // failing part was attempted once plus two re-enqueues
    assert_eq!(
        server.requests_matching("PUT", "/the-key?partNumber=1").len(),
        3
    );

    // abort went out for the upload id, and no complete was issued
    let aborts = server.requests_matching("DELETE", "/the-key?uploadId=U-9");
    assert_eq!(aborts.len(), 1);
    assert!(server.requests_matching("POST", "/the-key?uploadId=").is_empty());
}

#[tokio::test]
async fn test_create_failure_reports_without_abort() {
    let server = StubServer::spawn(|_req| StubResponse::new(403)).await;
    let transport = test_transport(&server);

    let err = transport
        .put_object_multipart("my-key", 10, 2, |_| Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), ErrorKind::BadStatus(403));

    // no upload id was obtained, so nothing to abort
    assert!(server.requests_matching("DELETE", "/").is_empty());
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_three_part_download() {
    let server = StubServer::spawn(|req| {
        let n = part_number_of(req).unwrap_or(0);
        StubResponse::new(206).with_body(format!("part-{n}"))
    })
    .await;

    let metrics = Arc::new(CapturingMetrics::default());
    let transport = test_transport_with(&server, {
        let metrics = Arc::clone(&metrics);
        move |builder| builder.metrics_publisher(metrics)
    });

    let received: Arc<Mutex<Vec<(u32, Bytes)>>> = Arc::default();
    let sink = Arc::clone(&received);
    transport
        .get_object_multipart("my-key", 3, move |transfer, data| {
            sink.lock().unwrap().push((transfer.part_number(), data.clone()));
        })
        .await
        .unwrap();

    let mut received = received.lock().unwrap().clone();
    received.sort_by_key(|(n, _)| *n);
    assert_eq!(
        received,
        vec![
            (1, Bytes::from_static(b"part-1")),
            (2, Bytes::from_static(b"part-2")),
            (3, Bytes::from_static(b"part-3")),
        ]
    );

    // downlink bytes were flushed per part
    let flushed_down = |metrics: &CapturingMetrics| -> Vec<f64> {
        metrics
            .data_points
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.name == MetricName::BytesDown)
            .map(|m| m.value)
            .collect()
    };
    wait_until(|| flushed_down(&metrics).len() == 3).await;
    assert!(flushed_down(&metrics).iter().all(|v| *v == 6.0));

    wait_until(|| transport.open_connection_count() == 0).await;
}

#[tokio::test]
async fn test_download_part_retries_then_succeeds() {
    let failed_once = Arc::new(AtomicBool::new(false));
    let failures = Arc::clone(&failed_once);

    let server = StubServer::spawn(move |req| match part_number_of(req) {
        Some(2) if !failures.swap(true, Ordering::SeqCst) => StubResponse::new(500),
        Some(n) => StubResponse::new(206).with_body(format!("part-{n}")),
        None => StubResponse::new(404),
    })
    .await;
    let transport = test_transport(&server);

    transport
        .get_object_multipart("my-key", 2, |_, _| {})
        .await
        .unwrap();

    assert_eq!(
        server.requests_matching("GET", "/my-key?partNumber=2").len(),
        2
    );
}

#[tokio::test]
async fn test_download_part_exhausts_retries() {
    let server = StubServer::spawn(|req| match part_number_of(req) {
        Some(1) => StubResponse::new(500),
        Some(n) => StubResponse::new(206).with_body(format!("part-{n}")),
        None => StubResponse::new(404),
    })
    .await;
    let transport = test_transport_with(&server, |builder| builder.max_part_retries(1));

    let err = transport
        .get_object_multipart("my-key", 2, |_, _| {})
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), ErrorKind::PartFailed);
}
