use crate::models::{StreamEvent, Usage};

/// Content fragments of the canned reply, in emission order
pub const MOCK_DELTAS: [&str; 5] = [
    "Hi",
    ", this is",
    " a mock. ",
    "Add an API key",
    " to access full features.",
];

pub const MOCK_USAGE: Usage = Usage {
    prompt: Some(5),
    completion: Some(6),
};

/// Everything the mock producer emits after `meta`: the deltas, then `final`.
pub fn mock_script() -> impl Iterator<Item = StreamEvent> {
    MOCK_DELTAS
        .into_iter()
        .map(StreamEvent::delta)
        .chain(std::iter::once(StreamEvent::final_with(Some(MOCK_USAGE))))
}
