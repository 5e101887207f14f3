use std::time::{Duration, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex_automata::meta::Regex;
use regex_automata::util::captures::Captures;

use crate::adapter::SubscribeData;

/// The User-Agent most subscription servers key their feature detection on.
/// User-configured headers override it.
pub(crate) static DEFAULT_USER_AGENT: Lazy<String> = Lazy::new(|| {
    let version = env!("CARGO_PKG_VERSION");
    format!(
        "clash; clash-meta; meta; sing/{version}; sing-box/{version}; SFA/{version}; SFI/{version}; SFT/{version}; SFM/{version}"
    )
});

static TRAFFIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"upload=(\d+); download=(\d+); total=(\d+)").unwrap());
static EXPIRE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"expire=(\d+)").unwrap());

/// Applies the `subscription-userinfo` response header onto the subscription
/// metadata. The header is matched case-insensitively; numbers that fail to
/// parse leave their field untouched.
pub(crate) fn apply_subscription_userinfo(data: &mut SubscribeData, header: &str) {
    let header = header.to_ascii_lowercase();

    let mut captures = TRAFFIC_RE.create_captures();
    TRAFFIC_RE.captures(&header, &mut captures);
    if captures.is_match() {
        if let Some(upload) = group_u64(&header, &captures, 1) {
            data.upload = upload;
        }
        if let Some(download) = group_u64(&header, &captures, 2) {
            data.download = download;
        }
        if let Some(total) = group_u64(&header, &captures, 3) {
            data.total = total;
        }
    }

    let mut captures = EXPIRE_RE.create_captures();
    EXPIRE_RE.captures(&header, &mut captures);
    if captures.is_match() {
        if let Some(expire) = group_u64(&header, &captures, 1) {
            data.expire = Some(UNIX_EPOCH + Duration::from_secs(expire));
        }
    }
}

fn group_u64(header: &str, captures: &Captures, index: usize) -> Option<u64> {
    let span = captures.get_group(index)?;
    header[span.range()].parse::<u64>().ok()
}
