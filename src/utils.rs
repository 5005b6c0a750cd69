use chrono::{DateTime, SecondsFormat, Utc};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::{Json, Value};
use serde::Serializer;
use std::collections::HashSet;

pub fn try_respond<'r, 'o: 'r>(req: &'r Request<'_>, json: &Value, status: Status) -> response::Result<'o> {
    Json(json.clone())
        .respond_to(req)
        .and_then(|resp| Response::build_from(resp).status(status).ok())
}

pub fn serialize_date<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = date.to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}

/// First of `base`, `base{sep}1`, `base{sep}2`, ... that is not in `taken`.
pub fn unique_candidate(base: &str, sep: char, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}{}", base, sep, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// `limit`/`offset` query parameters, clamped.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(10).clamp(1, 100);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn taken(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unique_candidate_prefers_base() {
        assert_eq!(unique_candidate("foo", '-', &taken(&["bar"])), "foo");
    }

    #[test]
    fn unique_candidate_suffixes_on_collision() {
        assert_eq!(unique_candidate("foo", '-', &taken(&["foo"])), "foo-1");
        assert_eq!(unique_candidate("foo", '-', &taken(&["foo", "foo-1", "foo-2"])), "foo-3");
        assert_eq!(unique_candidate("foo", '-', &taken(&["foo", "foo-2"])), "foo-1");
        assert_eq!(unique_candidate("ada", '_', &taken(&["ada"])), "ada_1");
    }

    #[test]
    fn page_clamps_bounds() {
        assert_eq!(page(None, None), (10, 0));
        assert_eq!(page(Some(1000), Some(-4)), (100, 0));
        assert_eq!(page(Some(0), Some(20)), (1, 20));
    }

    #[test]
    fn dates_serialize_with_millis() {
        let date = Utc.with_ymd_and_hms(2019, 4, 2, 7, 55, 0).unwrap();
        let mut out = Vec::new();
        let mut ser = serde_json::Serializer::new(&mut out);
        serialize_date(&date, &mut ser).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\"2019-04-02T07:55:00.000Z\"");
    }
}
