//! # Device State - the shared coordination record
//!
//! [`DeviceState`] is the one record every postbox process reads and mutates. It is
//! persisted as a flat keyed JSON object (see [`crate::storage`]) so external tools and
//! older scripts can read it, but nothing in this crate interprets the booleans
//! directly: the message lifecycle is decoded into [`Lifecycle`] and the connectivity
//! fields into [`Connectivity`], and lifecycle changes go through [`Transition`].
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle ──Arm──▶ Pending ──BeginPlayback──▶ Playing ──FinishPlayback──▶ Listened
//!    ▲                ▲                         │                          │
//!    │                └──────AbortPlayback──────┘                          │
//!    └──────────────────────────────Retire─────────────────────────────────┘
//! ```
//!
//! ## Field ownership
//!
//! | Field | Writer |
//! |---|---|
//! | `message_pending`, `payload_ref`, `message_id` | ingestion (Idle/Pending), playback (Pending→Listened) |
//! | `playing` | playback |
//! | `message_listened` | playback sets, ingestion clears |
//! | `connectivity_lost`, `recovery_active` | connectivity monitor |
//! | `nightlight_mode` | operator |
//! | `user_input_ack` | credential submission sets, presenter clears |

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The persisted coordination record.
///
/// Field names are the on-disk keys. Unknown keys written by other tools are kept in
/// `extra` and written back untouched. An empty `message_id` reads as no id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredState")]
pub struct DeviceState {
    pub message_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub playing: bool,
    pub message_listened: bool,
    pub connectivity_lost: bool,
    pub recovery_active: bool,
    pub nightlight_mode: bool,
    pub user_input_ack: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const LEGACY_PAYLOAD_KEY: &str = "mp3_path";
const LEGACY_LOST_KEY: &str = "wifi_not_connected";

/// On-disk form as read. Legacy keys land in `extra` and are folded in by
/// `From<StoredState>`, so a record carrying both spellings still parses.
#[derive(Deserialize)]
struct StoredState {
    #[serde(default)]
    message_pending: bool,
    #[serde(default)]
    payload_ref: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_message_id")]
    message_id: Option<String>,
    #[serde(default)]
    playing: bool,
    #[serde(default)]
    message_listened: bool,
    #[serde(default)]
    connectivity_lost: Option<bool>,
    #[serde(default)]
    recovery_active: bool,
    #[serde(default)]
    nightlight_mode: bool,
    #[serde(default)]
    user_input_ack: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<StoredState> for DeviceState {
    fn from(stored: StoredState) -> Self {
        let mut extra = stored.extra;
        // Current keys win; the legacy spelling is dropped on the next write.
        let legacy_payload = extra.remove(LEGACY_PAYLOAD_KEY);
        let legacy_lost = extra.remove(LEGACY_LOST_KEY);
        let payload_ref = stored.payload_ref.or_else(|| {
            legacy_payload
                .as_ref()
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        });
        let connectivity_lost = stored
            .connectivity_lost
            .or_else(|| legacy_lost.as_ref().and_then(Value::as_bool))
            .unwrap_or(false);
        DeviceState {
            message_pending: stored.message_pending,
            payload_ref,
            message_id: stored.message_id,
            playing: stored.playing,
            message_listened: stored.message_listened,
            connectivity_lost,
            recovery_active: stored.recovery_active,
            nightlight_mode: stored.nightlight_mode,
            user_input_ack: stored.user_input_ack,
            extra,
        }
    }
}

/// Where the current message is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Pending { id: String, payload: PathBuf },
    Playing { id: String, payload: PathBuf },
    Listened { id: Option<String> },
}

impl Lifecycle {
    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Pending { .. } => "pending",
            Lifecycle::Playing { .. } => "playing",
            Lifecycle::Listened { .. } => "listened",
        }
    }

    /// Apply a transition, returning the next phase. Only one source phase is legal
    /// for each transition.
    pub fn apply(&self, transition: Transition) -> Result<Lifecycle, TransitionError> {
        if let Transition::Arm { id, .. } = &transition {
            if id.trim().is_empty() {
                return Err(TransitionError::EmptyId);
            }
        }
        let next = match (self, transition) {
            (Lifecycle::Idle, Transition::Arm { id, payload }) => Lifecycle::Pending { id, payload },
            (Lifecycle::Pending { id, payload }, Transition::BeginPlayback) => Lifecycle::Playing {
                id: id.clone(),
                payload: payload.clone(),
            },
            (Lifecycle::Playing { id, .. }, Transition::FinishPlayback) => {
                Lifecycle::Listened { id: Some(id.clone()) }
            }
            (Lifecycle::Playing { id, payload }, Transition::AbortPlayback) => Lifecycle::Pending {
                id: id.clone(),
                payload: payload.clone(),
            },
            (Lifecycle::Listened { .. }, Transition::Retire) => Lifecycle::Idle,
            (from, transition) => {
                return Err(TransitionError::Illegal {
                    from: from.name(),
                    transition: transition.name(),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Idle => write!(f, "idle"),
            Lifecycle::Pending { id, payload } => write!(f, "pending(id={}, payload={})", id, payload.display()),
            Lifecycle::Playing { id, .. } => write!(f, "playing(id={})", id),
            Lifecycle::Listened { id: Some(id) } => write!(f, "listened(id={})", id),
            Lifecycle::Listened { id: None } => write!(f, "listened(no id)"),
        }
    }
}

/// Legal lifecycle moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Arm { id: String, payload: PathBuf },
    BeginPlayback,
    FinishPlayback,
    AbortPlayback,
    Retire,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Arm { .. } => "arm",
            Transition::BeginPlayback => "begin-playback",
            Transition::FinishPlayback => "finish-playback",
            Transition::AbortPlayback => "abort-playback",
            Transition::Retire => "retire",
        }
    }
}

/// Network reachability as recorded by the connectivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    /// Sustained loss confirmed, portal not (yet) engaged.
    Lost,
    /// Captive-portal recovery engaged.
    Recovering,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Connectivity::Online => "online",
            Connectivity::Lost => "lost",
            Connectivity::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

/// A flag combination outside the legal lifecycle set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("playing is set without message_pending")]
    PlayingWithoutPending,
    #[error("message_listened and playing are both set")]
    ListenedWhilePlaying,
    #[error("message_listened and message_pending are both set")]
    ListenedWhilePending,
    #[error("message_pending is set without a payload_ref")]
    PendingWithoutPayload,
    #[error("message_pending is set without a message_id")]
    PendingWithoutId,
    #[error("payload_ref is set while no message is pending")]
    StrayPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {transition} from {from}")]
    Illegal {
        from: &'static str,
        transition: &'static str,
    },
    /// An empty id would not survive a write and read back.
    #[error("cannot arm a message with an empty id")]
    EmptyId,
    #[error("state is inconsistent: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl DeviceState {
    /// Decode the lifecycle fields. Never normalizes: any illegal combination is
    /// reported so the owner of the offending field can repair it.
    pub fn lifecycle(&self) -> Result<Lifecycle, InvariantViolation> {
        if self.playing && !self.message_pending {
            return Err(InvariantViolation::PlayingWithoutPending);
        }
        if self.message_listened && self.playing {
            return Err(InvariantViolation::ListenedWhilePlaying);
        }
        if self.message_listened && self.message_pending {
            return Err(InvariantViolation::ListenedWhilePending);
        }
        if self.message_pending {
            let payload = self
                .payload_ref
                .clone()
                .ok_or(InvariantViolation::PendingWithoutPayload)?;
            let id = self
                .message_id
                .clone()
                .ok_or(InvariantViolation::PendingWithoutId)?;
            return Ok(if self.playing {
                Lifecycle::Playing { id, payload }
            } else {
                Lifecycle::Pending { id, payload }
            });
        }
        if self.payload_ref.is_some() {
            return Err(InvariantViolation::StrayPayload);
        }
        if self.message_listened {
            return Ok(Lifecycle::Listened {
                id: self.message_id.clone(),
            });
        }
        Ok(Lifecycle::Idle)
    }

    /// Write every lifecycle field from a decoded phase in one go.
    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        match lifecycle {
            Lifecycle::Idle => {
                self.message_pending = false;
                self.playing = false;
                self.message_listened = false;
                self.payload_ref = None;
                self.message_id = None;
            }
            Lifecycle::Pending { id, payload } => {
                self.message_pending = true;
                self.playing = false;
                self.message_listened = false;
                self.payload_ref = Some(payload);
                self.message_id = Some(id);
            }
            Lifecycle::Playing { id, payload } => {
                self.message_pending = true;
                self.playing = true;
                self.message_listened = false;
                self.payload_ref = Some(payload);
                self.message_id = Some(id);
            }
            Lifecycle::Listened { id } => {
                self.message_pending = false;
                self.playing = false;
                self.message_listened = true;
                self.payload_ref = None;
                self.message_id = id;
            }
        }
    }

    /// Apply a lifecycle transition. On error the record is left untouched.
    pub fn transition(&mut self, transition: Transition) -> Result<Lifecycle, TransitionError> {
        let current = self.lifecycle()?;
        let next = current.apply(transition)?;
        self.set_lifecycle(next.clone());
        Ok(next)
    }

    pub fn connectivity(&self) -> Connectivity {
        if self.recovery_active {
            Connectivity::Recovering
        } else if self.connectivity_lost {
            Connectivity::Lost
        } else {
            Connectivity::Online
        }
    }

    pub fn set_connectivity(&mut self, connectivity: Connectivity) {
        let (lost, recovery) = match connectivity {
            Connectivity::Online => (false, false),
            Connectivity::Lost => (true, false),
            Connectivity::Recovering => (true, true),
        };
        self.connectivity_lost = lost;
        self.recovery_active = recovery;
    }

    /// The payload path when one is referenced, for cleanup and display.
    pub fn payload(&self) -> Option<&Path> {
        self.payload_ref.as_deref()
    }
}
