use chrono::{DateTime, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix shared by every locally generated identity.
const PROVISIONAL_ID_PREFIX: &str = "local-";

/// Length of the random suffix on provisional identities.
const PROVISIONAL_SUFFIX_LEN: usize = 9;

/// Whether a record's identity has been assigned by the remote history.
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Identity was generated locally and is not known to the remote yet.
    #[default]
    Pending,
    /// Identity was assigned by the remote history.
    Confirmed,
}

/// One imported repository.
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Last-touched time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl HistoryRecord {
    /// Create a record with a fresh provisional identity.
    pub fn provisional(fields: NewRecord, timestamp: i64) -> Self {
        Self {
            id: provisional_id(timestamp),
            url: fields.url,
            name: fields.name,
            description: fields.description,
            timestamp,
            branch: fields.branch,
            commit_hash: fields.commit_hash,
            sync_state: SyncState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state == SyncState::Pending
    }

    /// Merge a repeated import into this record.
    ///
    /// Provided optional values win; absent ones leave the current value alone.
    /// The timestamp only ever moves forward.
    pub fn touch(&mut self, fields: NewRecord, timestamp: i64) {
        if !fields.name.is_empty() {
            self.name = fields.name;
        }
        if fields.description.is_some() {
            self.description = fields.description;
        }
        if fields.branch.is_some() {
            self.branch = fields.branch;
        }
        if fields.commit_hash.is_some() {
            self.commit_hash = fields.commit_hash;
        }
        self.timestamp = self.timestamp.max(timestamp);
    }

    /// Fields to send when asking the remote to create this record.
    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            url: self.url.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            branch: self.branch.clone(),
            commit_hash: self.commit_hash.clone(),
        }
    }

    pub fn touched_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Human-readable age of the last touch, e.g. "5m ago".
    pub fn age_display(&self) -> String {
        let Some(touched) = self.touched_at() else {
            return "unknown".to_string();
        };
        let minutes = (Utc::now() - touched).num_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// The caller-supplied part of a record: everything except identity and time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

impl NewRecord {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit_hash(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = Some(commit_hash.into());
        self
    }
}

/// Generate a provisional identity: `local-<millis>-<random suffix>`.
pub fn provisional_id(timestamp: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PROVISIONAL_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}{}-{}", PROVISIONAL_ID_PREFIX, timestamp, suffix)
}
