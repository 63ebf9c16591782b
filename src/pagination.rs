//! Offset/limit pagination over JSON-RPC list methods.
//!
//! A page answer has the shape `{"items": [...], "total": <int|null>, "offset": <int>}`.
//! `offset` defaults to the requested offset; a missing or null `total` means
//! the service does not know it, and the end is detected from a short page.
//!
//! Totals can shrink between pages when the dataset changes underneath. The
//! driver never trusts a total over the data it actually received: it stops
//! as soon as a page does not move the offset forward.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::batch::BatchDispatcher;
use crate::command::{Command, CommandKey};
use crate::config::PaginationConfig;
use crate::error::{Error, Result};
use crate::net::TransportClient;
use crate::sequence::{Outcome, ResultSequence, SequenceSource};

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Position within a paged listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCursor {
    /// Offset of the next page to request.
    pub offset: u64,
    /// Total reported by the latest page, if known.
    pub total: Option<u64>,
}

/// Names of the paging parameters and the page size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationSettings {
    pub page_size: u64,
    pub offset_param: String,
    pub limit_param: String,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
        }
    }
}

impl PaginationSettings {
    pub fn from_config(config: &PaginationConfig) -> Self {
        Self {
            page_size: config.page_size,
            offset_param: config.offset_param.clone(),
            limit_param: config.limit_param.clone(),
        }
    }
}

/// An item from [`PaginationDriver::paginate_many`], tagged with its list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub list: CommandKey,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Page decoding and progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Page {
    items: Vec<Value>,
    total: Option<u64>,
    offset: u64,
}

fn decode_page(value: Value, requested_offset: u64) -> Result<Page> {
    let Value::Object(mut obj) = value else {
        return Err(Error::Protocol("page result must be a JSON object".into()));
    };
    let items = match obj.remove("items") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(Error::Protocol("page 'items' must be an array".into())),
        None => return Err(Error::Protocol("page result has no 'items'".into())),
    };
    let total = match obj.remove("total") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(raw.as_u64().ok_or_else(|| {
            Error::Protocol(format!("page 'total' must be a non-negative integer, got {raw}"))
        })?),
    };
    let offset = match obj.remove("offset") {
        None | Some(Value::Null) => requested_offset,
        Some(raw) => raw.as_u64().ok_or_else(|| {
            Error::Protocol(format!("page 'offset' must be a non-negative integer, got {raw}"))
        })?,
    };
    Ok(Page { items, total, offset })
}

/// Progress of one listing.
#[derive(Debug, Clone, Copy)]
struct PageState {
    cursor: PageCursor,
    done: bool,
}

impl PageState {
    fn new() -> Self {
        Self {
            cursor: PageCursor::default(),
            done: false,
        }
    }

    /// Record a received page and decide whether another one is needed.
    fn advance(&mut self, page: &Page, page_size: u64) {
        let requested = self.cursor.offset;
        let received = page.items.len() as u64;
        let next = page.offset.saturating_add(received);

        self.cursor.total = page.total;
        self.done = received == 0
            || received < page_size
            || page.total.is_some_and(|total| next >= total)
            || next <= requested;
        if next > requested {
            self.cursor.offset = next;
        }
    }
}

// ---------------------------------------------------------------------------
// PaginationDriver
// ---------------------------------------------------------------------------

/// Turns list methods into lazy item sequences.
#[derive(Debug, Clone)]
pub struct PaginationDriver {
    transport: Arc<TransportClient>,
    dispatcher: BatchDispatcher,
    settings: PaginationSettings,
}

impl PaginationDriver {
    pub fn new(dispatcher: BatchDispatcher, settings: PaginationSettings) -> Result<Self> {
        if settings.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".into()));
        }
        if settings.offset_param.is_empty() || settings.limit_param.is_empty() {
            return Err(Error::Config("pagination parameter names must not be empty".into()));
        }
        if settings.offset_param == settings.limit_param {
            return Err(Error::Config(format!(
                "offset and limit parameters must differ, both are '{}'",
                settings.offset_param
            )));
        }
        Ok(Self {
            transport: Arc::clone(dispatcher.transport()),
            dispatcher,
            settings,
        })
    }

    pub fn settings(&self) -> &PaginationSettings {
        &self.settings
    }

    /// Lazily yield every item of a listing, page by page.
    ///
    /// Argument errors are reported here, before any request is made.
    pub fn paginate(&self, method: &str, params: Value) -> Result<ResultSequence<Value>> {
        let base = Command::new(0, method, params)?;
        Ok(ResultSequence::new(PageSource {
            transport: Arc::clone(&self.transport),
            settings: self.settings.clone(),
            base,
            state: PageState::new(),
        }))
    }

    /// Paginate several listings at once, folding each round's page requests
    /// into batches.
    ///
    /// Each command's key names its list. A per-command failure for one list
    /// ends that list only; the others continue.
    pub fn paginate_many(&self, lists: Vec<Command>) -> Result<ResultSequence<ListItem>> {
        let mut seen = HashSet::with_capacity(lists.len());
        for list in &lists {
            if !seen.insert(list.key().clone()) {
                return Err(Error::Argument(format!("duplicate list key '{}'", list.key())));
            }
        }
        if lists.is_empty() {
            return Ok(ResultSequence::empty());
        }
        let index = lists
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key().clone(), i))
            .collect();
        Ok(ResultSequence::new(ManySource {
            dispatcher: self.dispatcher.clone(),
            settings: self.settings.clone(),
            lists: lists
                .into_iter()
                .map(|base| ListState {
                    base,
                    state: PageState::new(),
                })
                .collect(),
            index,
            pending: VecDeque::new(),
            round: 0,
            failure: None,
        }))
    }

    /// Total reported by the first page, without consuming items.
    pub async fn total(&self, method: &str, params: Value) -> Result<Option<u64>> {
        let base = Command::new(0, method, params)?;
        let params = page_params(&base, &self.settings, 0);
        let result = self.transport.call(base.method(), params).await?;
        Ok(decode_page(result, 0)?.total)
    }
}

fn page_params(base: &Command, settings: &PaginationSettings, offset: u64) -> Value {
    let mut params: Map<String, Value> = base.params().clone();
    params.insert(settings.offset_param.clone(), offset.into());
    params.insert(settings.limit_param.clone(), settings.page_size.into());
    Value::Object(params)
}

struct PageSource {
    transport: Arc<TransportClient>,
    settings: PaginationSettings,
    base: Command,
    state: PageState,
}

#[async_trait]
impl SequenceSource for PageSource {
    type Item = Value;

    async fn next_step(&mut self) -> Option<Result<Vec<Outcome<Value>>>> {
        if self.state.done {
            return None;
        }
        let offset = self.state.cursor.offset;
        debug!(method = self.base.method(), offset, limit = self.settings.page_size, "Fetching page");

        let params = page_params(&self.base, &self.settings, offset);
        let page = match self.transport.call(self.base.method(), params).await {
            Ok(result) => decode_page(result, offset),
            Err(e) => Err(e),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                self.state.done = true;
                return Some(Err(e));
            }
        };

        self.state.advance(&page, self.settings.page_size);
        Some(Ok(page.items.into_iter().map(Outcome::Value).collect()))
    }

    fn cursor(&self) -> Option<PageCursor> {
        Some(self.state.cursor)
    }
}

struct ListState {
    base: Command,
    state: PageState,
}

struct ManySource {
    dispatcher: BatchDispatcher,
    settings: PaginationSettings,
    lists: Vec<ListState>,
    index: HashMap<CommandKey, usize>,
    /// Chunks of the current round not yet sent.
    pending: VecDeque<Vec<Command>>,
    round: u32,
    failure: Option<Error>,
}

impl ManySource {
    fn plan_round(&mut self) -> Result<()> {
        let mut commands = Vec::new();
        for list in self.lists.iter().filter(|l| !l.state.done) {
            let params = page_params(&list.base, &self.settings, list.state.cursor.offset);
            commands.push(Command::new(list.base.key().clone(), list.base.method(), params)?);
        }
        if !commands.is_empty() {
            self.round += 1;
            debug!(round = self.round, lists = commands.len(), "Planned pagination round");
        }
        self.pending = self.dispatcher.plan(commands).into();
        Ok(())
    }
}

#[async_trait]
impl SequenceSource for ManySource {
    type Item = ListItem;

    async fn next_step(&mut self) -> Option<Result<Vec<Outcome<ListItem>>>> {
        if self.pending.is_empty() {
            if let Err(e) = self.plan_round() {
                return Some(Err(e));
            }
        }
        let chunk = self.pending.pop_front()?;

        let result = match self.dispatcher.dispatch_chunk(&chunk).await {
            Ok(result) => result,
            Err(e) => {
                self.pending.clear();
                self.lists.iter_mut().for_each(|l| l.state.done = true);
                return Some(Err(e));
            }
        };

        let mut outcomes = Vec::new();
        for (key, reply) in result {
            let Some(&i) = self.index.get(&key) else {
                continue;
            };
            let list = &mut self.lists[i];
            match reply {
                Ok(value) => {
                    let page = match decode_page(value, list.state.cursor.offset) {
                        Ok(page) => page,
                        Err(e) => {
                            // Pages already decoded from this chunk are still delivered.
                            warn!(list = %key, error = %e, "Malformed page, ending pagination");
                            self.pending.clear();
                            self.lists.iter_mut().for_each(|l| l.state.done = true);
                            self.failure.get_or_insert(e);
                            continue;
                        }
                    };
                    list.state.advance(&page, self.settings.page_size);
                    outcomes.extend(page.items.into_iter().map(|value| {
                        Outcome::Value(ListItem {
                            list: key.clone(),
                            value,
                        })
                    }));
                }
                Err(e) => {
                    debug!(list = %key, error = %e, "List failed, dropping it");
                    list.state.done = true;
                    outcomes.push(Outcome::Failed(e));
                }
            }
        }
        Some(Ok(outcomes))
    }

    fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }
}
