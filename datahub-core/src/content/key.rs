use crate::error::{HubError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use ulid::Ulid;

/// Length of the random discriminator assigned to new keys.
pub const HASH_LENGTH: usize = 6;

const HASH_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Number of `/` separated segments in the URL form, discriminator included.
const URL_SEGMENTS: usize = 8;

const MINUTE_MILLIS: i64 = 60_000;

/// Identity of one stored item: a millisecond UTC timestamp plus a short
/// discriminator. Keys order by time first and discriminator second.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey {
    time: DateTime<Utc>,
    hash: String,
}

impl ContentKey {
    /// Key for the current instant with a fresh random discriminator.
    pub fn new() -> Self {
        Self::with_time(Utc::now(), random_hash())
    }

    /// Key at `time` with the given discriminator. A `/` cannot appear in
    /// the URL form, so each one is replaced with `_`.
    pub fn with_time(time: DateTime<Utc>, hash: impl Into<String>) -> Self {
        let mut hash = hash.into();
        if hash.contains('/') {
            hash = hash.replace('/', "_");
        }
        Self {
            time: truncate_to_millis(time),
            hash,
        }
    }

    /// Lowest possible position of a channel, sorts before every real key.
    pub fn sentinel_start() -> Self {
        Self {
            time: DateTime::<Utc>::default(),
            hash: String::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::sentinel_start()
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn millis(&self) -> i64 {
        self.time.timestamp_millis()
    }

    /// Parses the URL path form `yyyy/MM/dd/HH/mm/ss/SSS/hash`.
    pub fn from_url(value: &str) -> Option<Self> {
        match parse_url(value) {
            Ok(key) => Some(key),
            Err(error) => {
                tracing::debug!("unable to parse key {}: {}", value, error);
                None
            }
        }
    }

    /// Same as [`ContentKey::from_url`], for callers that want an error.
    pub fn parse_url(value: &str) -> Result<Self> {
        parse_url(value)
    }

    /// Parses a key from the tail of a full item URL such as
    /// `http://hub/channel/name/2015/01/23/21/11/19/407/L7QtaY`.
    pub fn from_full_url(url: &str) -> Option<Self> {
        let trimmed = url.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.rsplitn(URL_SEGMENTS + 1, '/').collect();
        if segments.len() < URL_SEGMENTS {
            tracing::debug!("unable to parse full url {}", url);
            return None;
        }
        let mut tail: Vec<&str> = segments.into_iter().take(URL_SEGMENTS).collect();
        tail.reverse();
        Self::from_url(&tail.join("/"))
    }

    pub fn to_url(&self) -> String {
        format!("{}{}", self.time.format("%Y/%m/%d/%H/%M/%S/%3f/"), self.hash)
    }

    /// Compact form used for position bookkeeping: `{millis}:{hash}`.
    pub fn to_zk(&self) -> String {
        format!("{}:{}", self.millis(), self.hash)
    }

    pub fn from_zk(value: &str) -> Option<Self> {
        let (millis, hash) = value.split_once(':')?;
        let millis: i64 = millis.parse().ok()?;
        let time = DateTime::<Utc>::from_timestamp_millis(millis)?;
        Some(Self::with_time(time, hash))
    }

    /// Compares this key against a minute period, see [`MinutePath`].
    pub fn compare_to_minute(&self, minute: &MinutePath) -> Ordering {
        if self.time < minute.end() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

impl Default for ContentKey {
    fn default() -> Self {
        Self::new()
    }
}

impl Ord for ContentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for ContentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl TryFrom<String> for ContentKey {
    type Error = HubError;

    fn try_from(value: String) -> Result<Self> {
        parse_url(&value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.to_url()
    }
}

/// A minute-aligned period of a channel.
///
/// The period covers `[minute, minute + 60s)` and orders at its exclusive
/// end: every key inside the minute sorts before it, and a key at exactly the
/// next minute boundary sorts after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinutePath {
    time: DateTime<Utc>,
}

impl MinutePath {
    pub fn new() -> Self {
        Self::from_time(Utc::now())
    }

    pub fn from_time(time: DateTime<Utc>) -> Self {
        let millis = time.timestamp_millis();
        let aligned = millis - millis.rem_euclid(MINUTE_MILLIS);
        Self {
            time: DateTime::<Utc>::from_timestamp_millis(aligned).unwrap_or(time),
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// First instant after this period.
    pub fn end(&self) -> DateTime<Utc> {
        self.time + chrono::Duration::milliseconds(MINUTE_MILLIS)
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        key.time >= self.time && key.time < self.end()
    }

    pub fn next(&self) -> Self {
        Self { time: self.end() }
    }

    pub fn to_url(&self) -> String {
        self.time.format("%Y/%m/%d/%H/%M").to_string()
    }
}

impl Default for MinutePath {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq<MinutePath> for ContentKey {
    fn eq(&self, _other: &MinutePath) -> bool {
        false
    }
}

impl PartialOrd<MinutePath> for ContentKey {
    fn partial_cmp(&self, other: &MinutePath) -> Option<Ordering> {
        Some(self.compare_to_minute(other))
    }
}

impl PartialEq<ContentKey> for MinutePath {
    fn eq(&self, _other: &ContentKey) -> bool {
        false
    }
}

impl PartialOrd<ContentKey> for MinutePath {
    fn partial_cmp(&self, other: &ContentKey) -> Option<Ordering> {
        Some(other.compare_to_minute(self).reverse())
    }
}

fn random_hash() -> String {
    let mut bits = Ulid::new().random();
    let base = HASH_ALPHABET.len() as u128;
    let mut hash = String::with_capacity(HASH_LENGTH);
    for _ in 0..HASH_LENGTH {
        hash.push(HASH_ALPHABET[(bits % base) as usize] as char);
        bits /= base;
    }
    hash
}

fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

fn parse_url(value: &str) -> Result<ContentKey> {
    let malformed = |reason: &str| HubError::MalformedKey(format!("{}: {}", value, reason));

    let segments: Vec<&str> = value.split('/').collect();
    if segments.len() != URL_SEGMENTS {
        return Err(malformed("expected 8 path segments"));
    }

    let mut numbers = [0u32; URL_SEGMENTS - 1];
    for (slot, segment) in numbers.iter_mut().zip(&segments) {
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("time segment is not numeric"));
        }
        *slot = segment.parse().map_err(|_| malformed("time segment out of range"))?;
    }

    let [year, month, day, hour, minute, second, millis] = numbers;
    if millis > 999 {
        return Err(malformed("millisecond segment out of range"));
    }

    let time = Utc
        .with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| malformed("invalid date"))?
        + chrono::Duration::milliseconds(millis as i64);

    Ok(ContentKey {
        time,
        hash: segments[URL_SEGMENTS - 1].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_url_round_trip() {
        let key = ContentKey::new();
        let cycled = ContentKey::from_url(&key.to_url()).unwrap();
        assert_eq!(key, cycled);
    }

    #[test]
    fn test_zk_round_trip() {
        let key = ContentKey::new();
        assert_eq!(ContentKey::from_zk(&key.to_zk()).unwrap(), key);
    }

    #[test]
    fn test_sentinel_round_trip() {
        let sentinel = ContentKey::sentinel_start();
        assert_eq!(ContentKey::from_url(&sentinel.to_url()).unwrap(), sentinel);
        assert_eq!(ContentKey::from_zk(&sentinel.to_zk()).unwrap(), sentinel);
        assert!(sentinel < ContentKey::new());
    }

    #[test]
    fn test_slash_in_hash_keeps_url_round_trip() {
        let key = ContentKey::with_time(Utc::now(), "a/b/c");
        assert_eq!(key.hash(), "a_b_c");
        assert_eq!(ContentKey::from_url(&key.to_url()), Some(key.clone()));
        assert_eq!(ContentKey::from_zk("1000:x/y").unwrap().hash(), "x_y");
    }

    #[test]
    fn test_new_key_shape() {
        let key = ContentKey::new();
        assert_eq!(key.hash().len(), HASH_LENGTH);
        assert!(key.hash().bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_eq!(key.time().timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_url_format() {
        let time = Utc.with_ymd_and_hms(2015, 1, 23, 21, 11, 19).unwrap()
            + chrono::Duration::milliseconds(407);
        let key = ContentKey::with_time(time, "L7QtaY");
        assert_eq!(key.to_url(), "2015/01/23/21/11/19/407/L7QtaY");
        assert_eq!(key.to_string(), "2015/01/23/21/11/19/407/L7QtaY");
        assert_eq!(key.to_zk(), format!("{}:L7QtaY", time.timestamp_millis()));
    }

    #[test]
    fn test_full_url() {
        let key = ContentKey::from_full_url(
            "http://hub/channel/load_test_2/2015/01/23/21/11/19/407/L7QtaY",
        )
        .unwrap();
        assert_eq!(key.to_string(), "2015/01/23/21/11/19/407/L7QtaY");
    }

    #[test]
    fn test_malformed_keys() {
        assert!(ContentKey::from_url("").is_none());
        assert!(ContentKey::from_url("2015/01/23/L7QtaY").is_none());
        assert!(ContentKey::from_url("2015/13/23/21/11/19/407/L7QtaY").is_none());
        assert!(ContentKey::from_url("2015/01/23/21/11/19/1407/L7QtaY").is_none());
        assert!(ContentKey::from_url("2015/01/xx/21/11/19/407/L7QtaY").is_none());
        assert!(ContentKey::from_zk("abc:L7QtaY").is_none());
        assert!(ContentKey::from_zk("12345").is_none());
        assert!(matches!(
            ContentKey::parse_url("nope"),
            Err(HubError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_compare_time() {
        let now = Utc::now();
        let keys: BTreeSet<ContentKey> = (0..10)
            .map(|i| ContentKey::with_time(now + chrono::Duration::minutes(i), "A"))
            .collect();
        assert_eq!(keys.len(), 10);
        let millis: Vec<i64> = keys.iter().map(ContentKey::millis).collect();
        assert!(millis.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_compare_hash() {
        let now = Utc::now();
        let keys: BTreeSet<ContentKey> = (0..10)
            .map(|i| ContentKey::with_time(now, format!("A{}", i)))
            .collect();
        assert_eq!(keys.len(), 10);
        let urls: Vec<String> = keys.iter().map(ContentKey::to_url).collect();
        assert!(urls.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_time_dominates_hash() {
        let now = Utc::now();
        let early = ContentKey::with_time(now, "zzzzzz");
        let late = ContentKey::with_time(now + chrono::Duration::milliseconds(1), "000000");
        assert!(early < late);
    }

    #[test]
    fn test_compare_minute_path() {
        let minute = MinutePath::new();
        let at_start = ContentKey::with_time(minute.time(), "0");
        assert!(at_start < minute);
        assert!(minute > at_start);
        assert!(minute.contains(&at_start));

        let later_in_minute =
            ContentKey::with_time(minute.time() + chrono::Duration::seconds(59), "0");
        assert!(later_in_minute < minute);

        let next_minute = ContentKey::with_time(minute.next().time(), "0");
        assert!(next_minute > minute);
        assert!(!minute.contains(&next_minute));
    }

    #[test]
    fn test_minute_path_url() {
        let time = Utc.with_ymd_and_hms(2015, 1, 23, 21, 11, 19).unwrap();
        assert_eq!(MinutePath::from_time(time).to_url(), "2015/01/23/21/11");
    }

    #[test]
    fn test_serde_uses_url_form() {
        let key = ContentKey::new();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_url()));
        let back: ContentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
