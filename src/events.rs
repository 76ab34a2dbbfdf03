use std::fmt;

use serde::Deserialize;

use crate::error::ContentError;
use crate::slide::{MediaKind, Slide};

/// Notification delivered by the content channel.
///
/// Wire form is one JSON object per message, e.g.
/// `{"event":"showContent","data":{"slides":[...]}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ContentEvent {
    #[serde(rename = "awaitingContent")]
    AwaitingContent,
    /// A `null` payload is accepted and ignored by the player.
    #[serde(rename = "showContent")]
    ShowContent(Option<ContentPayload>),
    #[serde(rename = "activationNotComplete")]
    ActivationNotComplete,
}

impl ContentEvent {
    pub fn from_json(text: &str) -> Result<Self, ContentError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ContentPayload {
    #[serde(default)]
    pub slides: Vec<Slide>,
}

impl ContentPayload {
    pub fn from_json(text: &str) -> Result<Self, ContentError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Which screen the surrounding surface should present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenStep {
    #[default]
    Init,
    AwaitingContent,
    ShowContent,
    NotActivated,
}

impl ScreenStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AwaitingContent => "awaiting-content",
            Self::ShowContent => "show-content",
            Self::NotActivated => "not-activated",
        }
    }
}

impl fmt::Display for ScreenStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted by the player each time a slide goes on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Displayed {
    pub unique_id: String,
    pub media_type: MediaKind,
    /// Index in the active playlist slot.
    pub index: usize,
    /// 1-based position among this cycle's scheduled slides.
    pub position: usize,
    pub total: usize,
}
