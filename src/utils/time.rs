//! Wall-clock helpers for wire envelopes.

use chrono::{SecondsFormat, Utc};

/// Current UTC time as an ISO-8601 string with millisecond precision.
///
/// Every outgoing envelope carries this as `client_start_time`; the server
/// echoes its own `server_start_time`/`server_end_time` in the same format.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
