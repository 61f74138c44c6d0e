/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// The resolved endpoint a transport issues requests against.
///
/// Derived once at construction and immutable afterwards. Requests dial a
/// resolved IP address directly, but carry `logical_host` in the `Host` header
/// and use it as the TLS server name.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) bucket: String,
    pub(crate) region: String,
    pub(crate) logical_host: String,
    pub(crate) scheme: &'static str,
    pub(crate) port: u16,
}

impl Endpoint {
    pub(crate) fn new(
        bucket: &str,
        region: &str,
        send_encrypted: bool,
        port_override: Option<u16>,
    ) -> Endpoint {
        let scheme = if send_encrypted { "https" } else { "http" };
        let default_port = if send_encrypted { 443 } else { 80 };
        Endpoint {
            bucket: bucket.to_owned(),
            region: region.to_owned(),
            logical_host: format!("{bucket}.s3.{region}.amazonaws.com"),
            scheme,
            port: port_override.unwrap_or(default_port),
        }
    }

    /// The bucket this endpoint addresses
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The configured region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The virtual-hosted bucket host name
    pub fn logical_host(&self) -> &str {
        &self.logical_host
    }

    /// `https` when transfers are encrypted, `http` otherwise
    pub fn scheme(&self) -> &str {
        self.scheme
    }

    /// The port connections dial
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Flags controlling a [`put_object`](crate::ObjectTransport::put_object) request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutObjectFlags {
    /// Capture the `ETag` response header and return it on success.
    pub retrieve_etag: bool,
}

impl PutObjectFlags {
    /// No flags set
    pub const NONE: PutObjectFlags = PutObjectFlags {
        retrieve_etag: false,
    };

    /// Capture the `ETag` response header
    pub const RETRIEVE_ETAG: PutObjectFlags = PutObjectFlags {
        retrieve_etag: true,
    };
}

/// Outcome a per-part handler reports back to the part processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartFinishResponse {
    /// The part is accounted for; do not schedule it again.
    Done,
    /// The part failed; re-enqueue it for another attempt.
    Retry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_host_and_port() {
        let ep = Endpoint::new("canary-bucket", "us-west-2", true, None);
        assert_eq!(ep.logical_host(), "canary-bucket.s3.us-west-2.amazonaws.com");
        assert_eq!(ep.scheme(), "https");
        assert_eq!(ep.port(), 443);

        let ep = Endpoint::new("canary-bucket", "us-west-2", false, None);
        assert_eq!(ep.scheme(), "http");
        assert_eq!(ep.port(), 80);

        let ep = Endpoint::new("canary-bucket", "us-west-2", false, Some(8080));
        assert_eq!(ep.port(), 8080);
    }

    #[test]
    fn test_put_object_flags() {
        assert!(!PutObjectFlags::NONE.retrieve_etag);
        assert!(PutObjectFlags::RETRIEVE_ETAG.retrieve_etag);
        assert_eq!(PutObjectFlags::default(), PutObjectFlags::NONE);
    }
}
