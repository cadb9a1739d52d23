use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Token accounting carried by the terminal frame
#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: Option<u64>,
    pub completion: Option<u64>,
}

impl Usage {
    /// `prompt + completion`, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.prompt.unwrap_or(0).saturating_add(self.completion.unwrap_or(0))
    }
}

/// Stream start marker with the producer's clock reference (ms since epoch)
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEvent {
    pub t0: i64,
    pub mock: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub content: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalEvent {
    pub usage: Option<Usage>,
}

/// One frame of the chat stream.
///
/// A well-formed stream is exactly one `Meta`, any number of `Delta`s and one
/// `Final`, in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Meta(MetaEvent),
    Delta(DeltaEvent),
    Final(FinalEvent),
}

impl StreamEvent {
    pub fn meta(t0: i64, mock: bool) -> Self {
        StreamEvent::Meta(MetaEvent { t0, mock: Some(mock) })
    }

    pub fn delta(content: impl Into<String>) -> Self {
        StreamEvent::Delta(DeltaEvent { content: content.into() })
    }

    pub fn final_with(usage: Option<Usage>) -> Self {
        StreamEvent::Final(FinalEvent { usage })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Meta(_) => "meta",
            StreamEvent::Delta(_) => "delta",
            StreamEvent::Final(_) => "final",
        }
    }

    /// Shape checks serde cannot express. Deltas must carry content.
    pub fn validate(&self) -> bool {
        match self {
            StreamEvent::Delta(delta) => !delta.content.is_empty(),
            _ => true,
        }
    }
}
