use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// One tag as reported by the registry's tag-listing API. Produced by the
/// tag fetcher and never mutated afterwards.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,

    /// The API reports this as an RFC 1123 date string.
    #[serde(deserialize_with = "rfc2822_date")]
    pub last_modified: DateTime<Utc>,

    /// Total size in bytes of the artifact behind the tag.
    #[serde(default)]
    pub size: i64,
}

/// Wire shape of one page of the tag-listing API.
#[derive(Debug, Default, Deserialize)]
pub struct TagPage {
    #[serde(default)]
    pub tags: Vec<TagInfo>,
}

fn rfc2822_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc2822(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}
