//! V2 entities built from raw legacy documents.
//!
//! Building an entity is the validation step of the migration: the entities
//! themselves are never written back, only the marker is.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use suzumina_firestore::{FieldValue, RawRecord};

/// Maximum length of an audio button title, in characters.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum number of tags on an audio button.
pub const MAX_TAGS: usize = 10;

/// Maximum length of a single tag, in characters.
pub const MAX_TAG_LENGTH: usize = 30;

/// Title used when an audio button does not name its source video.
pub const UNKNOWN_VIDEO_TITLE: &str = "Unknown Video";

/// Why a raw document cannot become a V2 entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent or empty.
    MissingField(&'static str),
    /// A field is present but its value is unacceptable.
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "missing required field: {}", field),
            ValidationError::Invalid { field, reason } => {
                write!(f, "{} failed validation: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A validated V2 video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoV2 {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub last_fetched_at: DateTime<Utc>,
}

impl VideoV2 {
    /// Build a video from a legacy document, filling defaults the way the
    /// legacy reader did.
    pub fn from_record(id: &str, data: &RawRecord, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let video_id = truthy_str(data, "videoId").unwrap_or(id).trim().to_string();
        if video_id.is_empty() {
            return Err(ValidationError::MissingField("videoId"));
        }

        let title = truthy_str(data, "title").unwrap_or_default();
        if title.trim().is_empty() {
            return Err(ValidationError::invalid("title", "must not be empty"));
        }

        let thumbnail_url = truthy_str(data, "thumbnailUrl")
            .map(str::to_string)
            .unwrap_or_else(|| default_thumbnail_url(&video_id));

        Ok(Self {
            title: title.to_string(),
            description: string_or_default(data, "description"),
            channel_id: string_or_default(data, "channelId"),
            channel_title: string_or_default(data, "channelTitle"),
            published_at: timestamp_or(data, "publishedAt", now)?,
            last_fetched_at: timestamp_or(data, "lastFetchedAt", now)?,
            thumbnail_url,
            video_id,
        })
    }
}

/// Default YouTube thumbnail for a video.
pub fn default_thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{}/hqdefault.jpg", video_id)
}

/// A validated V2 audio button.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioButtonV2 {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub source_video_id: String,
    pub source_video_title: String,
    pub start_time: u64,
    pub end_time: u64,
    pub created_by: String,
    pub created_by_name: String,
    pub is_public: bool,
    pub play_count: u64,
    pub like_count: u64,
    pub dislike_count: u64,
    pub favorite_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AudioButtonV2 {
    /// Build an audio button from a legacy document.
    ///
    /// Older documents use `text`/`buttonText`, `videoId`, `videoTitle`,
    /// `creatorId` and `creatorName`; the current names win when both exist.
    pub fn from_record(id: &str, data: &RawRecord, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let title = first_truthy_str(data, &["title", "buttonText", "text"])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ValidationError::MissingField("title"))?;
        let title_len = title.chars().count();
        if title_len > MAX_TITLE_LENGTH {
            return Err(ValidationError::invalid(
                "title",
                format!("must be at most {} characters (got {})", MAX_TITLE_LENGTH, title_len),
            ));
        }

        let source_video_id = first_truthy_str(data, &["sourceVideoId", "videoId"])
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ValidationError::MissingField("sourceVideoId"))?;

        let start_time = non_negative(data.get("startTime"));
        let end_time = data
            .get("endTime")
            .filter(|v| v.is_truthy())
            .map_or(start_time, |v| non_negative(Some(v)));

        Ok(Self {
            id: id.to_string(),
            title: title.to_string(),
            description: string_or_default(data, "description"),
            tags: normalize_tags(data.get("tags")),
            source_video_id: source_video_id.to_string(),
            source_video_title: first_truthy_str(data, &["sourceVideoTitle", "videoTitle"])
                .unwrap_or(UNKNOWN_VIDEO_TITLE)
                .to_string(),
            start_time,
            end_time,
            created_by: first_truthy_str(data, &["createdBy", "creatorId"])
                .unwrap_or("system")
                .to_string(),
            created_by_name: first_truthy_str(data, &["createdByName", "creatorName"])
                .unwrap_or("System")
                .to_string(),
            is_public: data.get("isPublic").and_then(FieldValue::as_bool) != Some(false),
            play_count: non_negative(data.get("playCount")),
            like_count: non_negative(data.get("likeCount")),
            dislike_count: non_negative(data.get("dislikeCount")),
            favorite_count: non_negative(data.get("favoriteCount")),
            created_at: timestamp_or(data, "createdAt", now)?,
            updated_at: timestamp_or(data, "updatedAt", now)?,
        })
    }
}

/// Trim, lower-case, drop out-of-range and duplicate tags, keep the first ten.
pub fn normalize_tags(value: Option<&FieldValue>) -> Vec<String> {
    let Some(values) = value.and_then(FieldValue::as_array) else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    values
        .iter()
        .filter_map(FieldValue::as_str)
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| (1..=MAX_TAG_LENGTH).contains(&tag.chars().count()))
        .filter(|tag| seen.insert(tag.clone()))
        .take(MAX_TAGS)
        .collect()
}

fn truthy_str<'a>(data: &'a RawRecord, field: &str) -> Option<&'a str> {
    data.get(field)
        .filter(|v| v.is_truthy())
        .and_then(FieldValue::as_str)
}

fn first_truthy_str<'a>(data: &'a RawRecord, fields: &[&str]) -> Option<&'a str> {
    fields.iter().find_map(|field| truthy_str(data, field))
}

fn string_or_default(data: &RawRecord, field: &str) -> String {
    truthy_str(data, field).unwrap_or_default().to_string()
}

/// Floor a numeric field and clamp it at zero. Non-numbers count as zero.
fn non_negative(value: Option<&FieldValue>) -> u64 {
    value
        .and_then(FieldValue::as_f64)
        .filter(|n| n.is_finite())
        .map_or(0, |n| n.floor().max(0.0) as u64)
}

/// Read a timestamp or RFC 3339 string, falling back to `default` when the
/// field is absent or falsy.
fn timestamp_or(
    data: &RawRecord,
    field: &'static str,
    default: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    match data.get(field) {
        None => Ok(default),
        Some(value) if !value.is_truthy() => Ok(default),
        Some(FieldValue::Timestamp(ts)) => Ok(*ts),
        Some(FieldValue::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ValidationError::invalid(field, format!("invalid date '{}'", s))),
        Some(_) => Err(ValidationError::invalid(field, "expected a timestamp")),
    }
}
