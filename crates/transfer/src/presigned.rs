//! Expiry inspection of pre-signed object-storage URLs.
//!
//! Signed URLs embed their issuance time and lifetime in the query string.
//! Two layouts are understood:
//!
//! - SigV4 style: `X-Amz-Date=20240101T000000Z&X-Amz-Expires=900`
//!   (and the `X-Goog-*` equivalents)
//! - Epoch style: `Expires=1704067200`
//!
//! URLs carrying neither are treated as non-expiring.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use url::Url;

/// Safety margin, in seconds, subtracted from the embedded expiry.
pub const EXPIRY_BUFFER_SECS: i64 = 5;

const SIGNED_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Returns the instant after which `url` is no longer valid, if it embeds one.
pub fn expires_at(url: &str) -> Option<DateTime<Utc>> {
    let parsed = Url::parse(url).ok()?;

    let mut signed_at = None;
    let mut lifetime = None;
    let mut epoch = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "X-Amz-Date" | "X-Goog-Date" => signed_at = Some(value.into_owned()),
            "X-Amz-Expires" | "X-Goog-Expires" => lifetime = value.parse::<i64>().ok(),
            "Expires" => epoch = value.parse::<i64>().ok(),
            _ => {}
        }
    }

    if let (Some(signed_at), Some(lifetime)) = (signed_at, lifetime) {
        let issued = NaiveDateTime::parse_from_str(&signed_at, SIGNED_DATE_FORMAT)
            .ok()?
            .and_utc();
        return issued.checked_add_signed(TimeDelta::try_seconds(lifetime)?);
    }

    epoch.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Returns `true` when `url` expires within [`EXPIRY_BUFFER_SECS`] of `now`.
pub fn is_expired(url: &str, now: DateTime<Utc>) -> bool {
    match expires_at(url) {
        Some(expiry) => now + TimeDelta::seconds(EXPIRY_BUFFER_SECS) >= expiry,
        None => false,
    }
}
