//! Lazy, pull-based delivery of results.
//!
//! A [`ResultSequence`] owns a [`SequenceSource`] and a small buffer. The
//! source is asked for its next step (one chunk, one page) only when the
//! buffer is empty and the consumer asks for more, so a consumer that stops
//! early never causes further wire traffic.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{Error, PerCommandError, Result};
use crate::pagination::PageCursor;

/// One delivered element: a value, or a failure scoped to a single command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Value(T),
    Failed(PerCommandError),
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> std::result::Result<T, PerCommandError> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Failed(e) => Err(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Value(v) => Outcome::Value(f(v)),
            Self::Failed(e) => Outcome::Failed(e),
        }
    }
}

/// Produces a sequence's elements one wire step at a time.
#[async_trait]
pub trait SequenceSource: Send {
    type Item: Send;

    /// Perform the next step. `None` once exhausted; an `Err` ends the sequence.
    async fn next_step(&mut self) -> Option<Result<Vec<Outcome<Self::Item>>>>;

    /// Pagination progress after the latest step, for paged sources.
    fn cursor(&self) -> Option<PageCursor> {
        None
    }

    /// A fatal error found while producing the latest step. It is delivered
    /// after that step's items, without another step being performed.
    fn take_failure(&mut self) -> Option<Error> {
        None
    }
}

/// Finite, non-restartable sequence of [`Outcome`]s.
///
/// After a fatal `Err` element the sequence is over and yields `None`.
pub struct ResultSequence<T> {
    source: Option<Box<dyn SequenceSource<Item = T>>>,
    buffer: VecDeque<Outcome<T>>,
    requests: u64,
    cursor: Option<PageCursor>,
}

impl<T: Send + 'static> ResultSequence<T> {
    pub fn new(source: impl SequenceSource<Item = T> + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            buffer: VecDeque::new(),
            requests: 0,
            cursor: None,
        }
    }

    /// A sequence with nothing to deliver.
    pub fn empty() -> Self {
        Self {
            source: None,
            buffer: VecDeque::new(),
            requests: 0,
            cursor: None,
        }
    }

    /// Pull the next element, performing a wire step if the buffer is empty.
    pub async fn next(&mut self) -> Option<Result<Outcome<T>>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            let source = self.source.as_mut()?;
            if let Some(e) = source.take_failure() {
                self.source = None;
                return Some(Err(e));
            }
            match source.next_step().await {
                None => {
                    self.cursor = source.cursor().or(self.cursor);
                    self.source = None;
                    return None;
                }
                Some(Ok(items)) => {
                    self.requests += 1;
                    self.cursor = source.cursor().or(self.cursor);
                    self.buffer.extend(items);
                }
                Some(Err(e)) => {
                    self.requests += 1;
                    self.source = None;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Steps performed so far (chunks sent or pages fetched).
    pub fn requests_issued(&self) -> u64 {
        self.requests
    }

    /// Latest pagination cursor, for paged sequences.
    pub fn cursor(&self) -> Option<PageCursor> {
        self.cursor
    }

    /// Whether the sequence can still produce elements.
    pub fn is_finished(&self) -> bool {
        self.source.is_none() && self.buffer.is_empty()
    }

    /// Drain everything, stopping at the first fatal error.
    pub async fn collect_all(mut self) -> (Vec<Outcome<T>>, Option<Error>) {
        let mut outcomes = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => return (outcomes, Some(e)),
            }
        }
        (outcomes, None)
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Outcome<T>>> + Send {
        futures::stream::unfold(self, |mut seq| async move {
            let item = seq.next().await?;
            Some((item, seq))
        })
    }
}

impl<T> std::fmt::Debug for ResultSequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSequence")
            .field("buffered", &self.buffer.len())
            .field("requests", &self.requests)
            .field("finished", &self.source.is_none())
            .finish()
    }
}
