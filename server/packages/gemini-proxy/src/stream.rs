//! Slices completion text into incremental stream events.

use futures::stream::{self, Stream};

/// Characters per streamed delta.
pub const STREAM_CHUNK_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One slice of the text. `position` counts deltas from zero.
    Delta { position: usize, content: String },
    /// Terminal sentinel; nothing follows it.
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Delta { content, .. } => Some(content),
            Self::Done => None,
        }
    }
}

struct SegmentState {
    text: String,
    offset: usize,
    position: usize,
    chunk_chars: usize,
    finished: bool,
}

impl SegmentState {
    fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        if self.offset >= self.text.len() {
            self.finished = true;
            return Some(StreamEvent::Done);
        }
        let rest = &self.text[self.offset..];
        let end = rest
            .char_indices()
            .nth(self.chunk_chars)
            .map(|(index, _)| index)
            .unwrap_or(rest.len());
        let content = rest[..end].to_string();
        self.offset += end;
        let position = self.position;
        self.position += 1;
        Some(StreamEvent::Delta { position, content })
    }
}

/// Lazily splits `text` into deltas of `chunk_chars` characters followed by
/// [`StreamEvent::Done`]. Yields to the scheduler between events. A chunk size
/// of zero is treated as one.
pub fn segment(text: String, chunk_chars: usize) -> impl Stream<Item = StreamEvent> + Send {
    let state = SegmentState {
        text,
        offset: 0,
        position: 0,
        chunk_chars: chunk_chars.max(1),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.position > 0 || state.finished {
            tokio::task::yield_now().await;
        }
        let event = state.next_event()?;
        Some((event, state))
    })
}
