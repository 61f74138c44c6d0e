/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: the source chain carries the underlying transport/signing error;
/// display the full chain for diagnostics.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of transport errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation input validation issues
    InputInvalid,

    /// The signer reported an error; the request was never sent
    SigningFailed,

    /// A connection could not be acquired from the fabric, or the acquired
    /// connection was not open
    AcquireFailed,

    /// Transport-level error from the HTTP stream
    StreamFailed,

    /// Transport succeeded but the response status did not match the
    /// expected status for the operation
    BadStatus(u16),

    /// A response body could not be parsed (e.g. missing `UploadId`)
    ResponseParseFailed,

    /// A part exhausted its retry budget
    PartFailed,

    /// Host resolution failed
    DnsFailed,

    /// Some kind of internal runtime issue (e.g. task failure, poisoned mutex)
    RuntimeError,
}

impl Error {
    /// Creates a new transport [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InputInvalid => write!(f, "invalid input"),
            ErrorKind::SigningFailed => write!(f, "request signing failed"),
            ErrorKind::AcquireFailed => write!(f, "connection acquisition failed"),
            ErrorKind::StreamFailed => write!(f, "HTTP stream failed"),
            ErrorKind::BadStatus(status) => {
                write!(f, "unexpected response status {status}")
            }
            ErrorKind::ResponseParseFailed => write!(f, "failed to parse response"),
            ErrorKind::PartFailed => write!(f, "part transfer failed"),
            ErrorKind::DnsFailed => write!(f, "host resolution failed"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error
where
    T: Send + Sync + 'static,
{
    fn from(value: std::sync::PoisonError<T>) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

pub(crate) fn invalid_input<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InputInvalid, err)
}

pub(crate) fn sign_failed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::SigningFailed, err)
}

pub(crate) fn acquire_failed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::AcquireFailed, err)
}

pub(crate) fn stream_failed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::StreamFailed, err)
}

pub(crate) fn bad_status(status: u16) -> Error {
    Error::new(
        ErrorKind::BadStatus(status),
        format!("response status {status} did not match the expected status"),
    )
}

pub(crate) fn parse_failed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::ResponseParseFailed, err)
}

pub(crate) fn part_failed(part_number: u32) -> Error {
    Error::new(
        ErrorKind::PartFailed,
        format!("part #{part_number} exhausted its retry budget"),
    )
}

pub(crate) fn dns_failed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::DnsFailed, err)
}
