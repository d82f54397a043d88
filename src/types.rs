//! Core types shared across the dispatcher, worker, and scheduler.

use std::collections::HashMap;

use serde::Serialize;

/// Metadata captured from the outgoing HTTP request, kept alongside the
/// response for diagnostics. Mirrors the `request` subset selected by
/// `original_source/downloader.py::_get_response_details`.
#[derive(Clone, Debug, Serialize)]
pub struct RequestDetails {
    /// HTTP method used (always `GET` for channel document fetches).
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Request headers sent, flattened to strings.
    pub headers: HashMap<String, String>,
}

/// Response metadata captured from the upstream origin. A subset of
/// `requests.Response.__dict__` in the original, translated into a
/// plain struct rather than a dynamic dict.
#[derive(Clone, Debug, Serialize)]
pub struct ResponseDetails {
    /// HTTP status code returned by the origin.
    pub status_code: u16,
    /// Response headers, flattened to strings.
    pub headers: HashMap<String, String>,
    /// Final URL after any redirects were followed.
    pub url: String,
    /// HTTP reason phrase (e.g. "OK", "Not Found").
    pub reason: String,
    /// Wall-clock time the origin took to return headers.
    pub elapsed: std::time::Duration,
    /// Declared content encoding, if any (e.g. `gzip`).
    pub encoding: Option<String>,
    /// The request that produced this response.
    pub request: RequestDetails,
}

/// A single worker attempt's accumulated record. Fields are optional
/// except `scheduled_start`, matching the source's incrementally-built
/// dict (see spec.md §3 `DownloadResult`).
#[derive(Clone, Debug, Default, Serialize)]
pub struct DownloadResult {
    /// When the worker began acquiring the concurrency gate.
    pub scheduled_start: Option<i64>,
    /// When the gate admitted the worker.
    pub download_lock_acquired: Option<i64>,
    /// Origin response metadata, present once the fetch completes.
    pub download: Option<ResponseDetails>,
    /// When decompression began, present only if it ran.
    pub inflate_start: Option<i64>,
    /// When decompression finished, present only if it ran.
    pub inflate_complete: Option<i64>,
    /// When the channel document was atomically replaced; present iff
    /// content actually changed.
    pub updated: Option<i64>,
    /// Absolute path of the installed channel document; present iff `updated` is set.
    pub filename: Option<String>,
    /// When the worker released the gate normally.
    pub completed: Option<i64>,
    /// Present iff the worker failed.
    pub exception: Option<String>,
    /// Channel name, stamped by the scheduler after receipt.
    pub channel: Option<String>,
    /// Monotonically increasing per-channel attempt counter, stamped by the scheduler.
    pub download_id: Option<String>,
}

impl DownloadResult {
    /// A freshly started attempt record, with only `scheduled_start` set.
    pub fn started(now: i64) -> Self {
        Self {
            scheduled_start: Some(now),
            ..Default::default()
        }
    }

    /// True iff the origin returned HTTP 200 for this attempt.
    pub fn is_success(&self) -> bool {
        matches!(self.download.as_ref(), Some(d) if d.status_code == 200)
    }

    /// True iff this attempt both succeeded and ran the inflate step
    /// (i.e. the upstream content had actually changed).
    pub fn is_update(&self) -> bool {
        self.is_success() && self.inflate_complete.is_some()
    }
}
