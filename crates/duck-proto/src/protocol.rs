use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtoError;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The bridge receives it in `Hello` and can refuse to talk to
/// an incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for a single frame body.  Anything larger is a framing error,
/// not a real message.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Browser-assigned tab identifier.
pub type TabId = i64;

/// Tracked video sites whose playback can trigger ducking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[serde(rename = "youtube")]
    YouTube,
    Instagram,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::YouTube, SourceKind::Instagram];

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Instagram => "instagram",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which in-tab script the bridge should (re)install for recovery injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "script", content = "source", rename_all = "snake_case")]
pub enum TabScript {
    /// State reporter for a tracked video site.
    Reporter(SourceKind),
    /// Volume/playback actuator for the audio-player site.
    Actuator,
}

/// Playback state as observed inside a tracked tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub on_target_page: bool,
    pub url: String,
}

// ── tab messages ──────────────────────────────────────────────────────────────

/// Requests the coordinator sends into a tab (request/response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabRequest {
    GetState { source: SourceKind },
    SetVolume { value: f64 },
    PauseSource,
    ResumeSource,
}

/// Replies produced by in-tab handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabResponse {
    State(PlaybackSnapshot),
    Ack { success: bool },
}

impl TabResponse {
    pub fn ack(success: bool) -> Self {
        TabResponse::Ack { success }
    }
}

/// Fire-and-forget messages a tab sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabEvent {
    PushState {
        source: SourceKind,
        #[serde(default)]
        is_playing: bool,
        #[serde(default)]
        on_target_page: bool,
        /// Missing when the page could not report its own location; the
        /// sender tab's URL is used instead.
        #[serde(default)]
        url: Option<String>,
    },
}

/// Reads a `{ success: true }` acknowledgement out of a raw tab reply.
/// Anything else, including a malformed reply, counts as not applied.
pub fn reply_succeeded(reply: &Value) -> bool {
    reply.get("success").and_then(Value::as_bool) == Some(true)
}

/// Extracts a playback snapshot from a raw `GetState` reply.  Both booleans
/// must be present; a missing URL becomes empty.
pub fn reply_snapshot(reply: &Value) -> Option<PlaybackSnapshot> {
    let is_playing = reply.get("is_playing")?.as_bool()?;
    let on_target_page = reply.get("on_target_page")?.as_bool()?;
    let url = reply
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(PlaybackSnapshot {
        is_playing,
        on_target_page,
        url,
    })
}

// ── bridge frames ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub active: bool,
}

/// Operations the daemon asks the bridge to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeOp {
    QueryTabs { patterns: Vec<String> },
    ActiveTab,
    SendToTab { tab_id: TabId, message: TabRequest },
    Inject { tab_id: TabId, script: TabScript },
    ReadMode,
}

/// Outcome of a `BridgeOp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BridgeResult {
    Tabs {
        tabs: Vec<TabInfo>,
    },
    ActiveTab {
        tab: Option<TabInfo>,
    },
    TabReply {
        reply: Value,
    },
    Injected,
    Mode {
        value: Option<String>,
    },
    Failed {
        error: String,
        /// Set when the browser reported that no listener exists in the tab.
        #[serde(default)]
        no_receiver: bool,
    },
}

/// Browser-side happenings forwarded by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrowserEvent {
    Startup,
    TabActivated {
        tab_id: TabId,
    },
    TabUpdated {
        tab_id: TabId,
        /// Present only when the URL itself changed.
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        status: Option<TabStatus>,
        /// The tab's current URL after the update.
        #[serde(default)]
        tab_url: Option<String>,
    },
    TabRemoved {
        tab_id: TabId,
    },
    WindowFocusChanged,
    RuntimeMessage {
        #[serde(default)]
        tab_id: Option<TabId>,
        #[serde(default)]
        tab_url: Option<String>,
        message: TabEvent,
    },
    ModeChanged {
        #[serde(default)]
        value: Option<String>,
    },
}

/// Length-prefixed frame exchanged over the bridge socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Hello { protocol_version: u32 },
    Request { request_id: u64, op: BridgeOp },
    Reply { request_id: u64, result: BridgeResult },
    Event { event: BrowserEvent },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            return Err(ProtoError::FrameTooLarge(json.len()));
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decodes one frame from the front of `data`, returning it with the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), ProtoError> {
        if data.len() < 4 {
            return Err(ProtoError::ShortHeader);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtoError::FrameTooLarge(len));
        }
        if data.len() < 4 + len {
            return Err(ProtoError::ShortFrame {
                needed: 4 + len,
                available: data.len(),
            });
        }
        let frame: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((frame, 4 + len))
    }
}
