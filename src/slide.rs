//! Slides as delivered by the content channel, plus the schedule filter that
//! decides whether a slide may be shown right now.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, IgnoredAny};
use serde::Deserialize;

/// Media family of a slide.
///
/// The channel only distinguishes `"video"`; every other value (or a missing
/// field) is treated as a timed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            Some("video") => Self::Video,
            _ => Self::Image,
        })
    }
}

/// One asset reference attached to a slide.
///
/// Assets arrive either as a bare URL string or as a descriptor object; only
/// the source location and an optional MIME type are retained.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaAsset {
    pub url: Option<String>,
    pub mime: Option<String>,
}

impl MediaAsset {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            mime: None,
        }
    }
}

impl<'de> Deserialize<'de> for MediaAsset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawAsset {
            Url(String),
            Descriptor {
                #[serde(default, alias = "src", alias = "path")]
                url: Option<String>,
                #[serde(default, rename = "type", alias = "mime")]
                mime: Option<String>,
            },
            Other(IgnoredAny),
        }

        Ok(match RawAsset::deserialize(deserializer)? {
            RawAsset::Url(url) => Self::from_url(url),
            RawAsset::Descriptor { url, mime } => Self { url, mime },
            RawAsset::Other(_) => Self::default(),
        })
    }
}

/// A single playable unit with an optional visibility window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Slide {
    #[serde(rename = "uniqueId", deserialize_with = "id_string")]
    pub unique_id: String,
    #[serde(default)]
    pub media_type: MediaKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub media: Vec<MediaAsset>,
    /// Display time in seconds; only consulted for images.
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: f64,
    /// Window start, epoch seconds.
    #[serde(default)]
    pub schedule_from: Option<f64>,
    /// Window end (exclusive), epoch seconds.
    #[serde(default)]
    pub schedule_to: Option<f64>,
}

impl Slide {
    pub fn image(unique_id: impl Into<String>, duration: f64) -> Self {
        Self {
            unique_id: unique_id.into(),
            media_type: MediaKind::Image,
            media: Vec::new(),
            duration,
            schedule_from: None,
            schedule_to: None,
        }
    }

    pub fn video(unique_id: impl Into<String>, media: Vec<MediaAsset>) -> Self {
        Self {
            unique_id: unique_id.into(),
            media_type: MediaKind::Video,
            media,
            duration: 0.0,
            schedule_from: None,
            schedule_to: None,
        }
    }

    pub fn with_window(mut self, from: Option<f64>, to: Option<f64>) -> Self {
        self.schedule_from = from;
        self.schedule_to = to;
        self
    }

    /// Whether the slide may be shown at `now` (epoch seconds).
    ///
    /// A slide with no window is always eligible, and a `0` bound counts as
    /// unset for that check. A slide with both bounds is eligible inside
    /// `[from, to)`. A slide with only one bound is never eligible.
    pub fn is_scheduled(&self, now: f64) -> bool {
        let unset = |bound: Option<f64>| bound.is_none_or(|v| v == 0.0);
        if unset(self.schedule_from) && unset(self.schedule_to) {
            return true;
        }
        match (self.schedule_from, self.schedule_to) {
            (Some(from), Some(to)) => now >= from && now < to,
            _ => false,
        }
    }

    /// Seconds from `duration` as a [`Duration`]; negative values collapse to zero.
    pub fn dwell(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration.max(0.0)).unwrap_or_default()
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

/// Number of slides in `slides` eligible at `now`.
pub fn count_scheduled<'a, I>(slides: I, now: f64) -> usize
where
    I: IntoIterator<Item = &'a Slide>,
{
    slides.into_iter().filter(|s| s.is_scheduled(now)).count()
}

/// Current wall-clock time as fractional epoch seconds.
pub fn epoch_now() -> f64 {
    epoch_seconds(Utc::now())
}

pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    match RawId::deserialize(deserializer) {
        Ok(RawId::Text(text)) => Ok(text),
        Ok(RawId::Number(number)) => Ok(number.to_string()),
        Err(_) => Err(de::Error::custom("uniqueId must be a string or number")),
    }
}
