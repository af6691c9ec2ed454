//! The shared collections two partners keep in sync.

use crate::record::{Record, RecordMeta};
use crate::Timestamp;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

macro_rules! impl_record {
    ($ty:ty) => {
        impl Record for $ty {
            fn meta(&self) -> &RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut RecordMeta {
                &mut self.meta
            }
        }
    };
    ($ty:ty, |$a:ident, $b:ident| $cmp:expr) => {
        impl Record for $ty {
            fn meta(&self) -> &RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut RecordMeta {
                &mut self.meta
            }

            fn sort_cmp(&self, other: &Self) -> Ordering {
                let ($a, $b) = (self, other);
                $cmp.then_with(|| $a.meta.id.cmp(&$b.meta.id))
            }
        }
    };
}

/// A short note left for the partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoveNote {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub read: bool,
}

impl LoveNote {
    pub const COLLECTION: &'static str = "love_notes";

    pub fn new(author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            author_id: author_id.into(),
            content: content.into(),
            read: false,
        }
    }
}

impl_record!(LoveNote);

/// A shared memory, optionally tied to a day and a place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub happened_on: Option<NaiveDate>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
}

impl Memory {
    pub const COLLECTION: &'static str = "memories";

    pub fn new(title: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            title: title.into(),
            description: None,
            happened_on: None,
            photo_url: None,
            location_name: None,
        }
    }
}

impl_record!(Memory);

/// A countdown to an upcoming moment. Soonest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub target_at: Timestamp,
    #[serde(default)]
    pub emoji: Option<String>,
}

impl Countdown {
    pub const COLLECTION: &'static str = "countdowns";

    pub fn new(title: impl Into<String>, target_at: Timestamp) -> Self {
        Self {
            meta: RecordMeta::new(),
            title: title.into(),
            target_at,
            emoji: None,
        }
    }
}

impl_record!(Countdown, |a, b| a.target_at.cmp(&b.target_at));

/// A relationship milestone, ordered by when it happened rather than when
/// it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub event_date: NaiveDate,
    #[serde(default)]
    pub category: Option<String>,
}

impl Milestone {
    pub const COLLECTION: &'static str = "milestones";

    pub fn new(title: impl Into<String>, event_date: NaiveDate) -> Self {
        Self {
            meta: RecordMeta::new(),
            title: title.into(),
            event_date,
            category: None,
        }
    }
}

impl_record!(Milestone, |a, b| a.event_date.cmp(&b.event_date));

/// How a partner is feeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Loved,
    Calm,
    Tired,
    Sad,
    Anxious,
    Angry,
}

/// A mood check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodEntry {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub author_id: String,
    pub mood: Mood,
    #[serde(default)]
    pub note: Option<String>,
}

impl MoodEntry {
    pub const COLLECTION: &'static str = "mood_entries";

    pub fn new(author_id: impl Into<String>, mood: Mood) -> Self {
        Self {
            meta: RecordMeta::new(),
            author_id: author_id.into(),
            mood,
            note: None,
        }
    }
}

impl_record!(MoodEntry);

/// A partner's last shared position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLocation {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub author_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub label: Option<String>,
}

impl SharedLocation {
    pub const COLLECTION: &'static str = "locations";

    pub fn new(author_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            meta: RecordMeta::new(),
            author_id: author_id.into(),
            latitude,
            longitude,
            label: None,
        }
    }
}

impl_record!(SharedLocation);
