//! Index query and result types.

use std::time::Instant;

/// Direction of a tag lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// First entry with seqnum `>= seqnum_bound`.
    ReadNext,
    /// Last entry with seqnum `<= seqnum_bound`.
    ReadPrev,
}

/// One tag-lookup request against the index.
///
/// `metalog_progress_required` names the metalog position (within
/// `view_id`) the index must have reached before the query may run;
/// queries ahead of the frontier are parked. `client_data` and
/// `origin_node_id` travel through untouched so the owner can route
/// the result back.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub query_type: QueryType,
    pub user_logspace: u32,
    pub tag: u64,
    pub seqnum_bound: u32,
    pub metalog_progress_required: u32,
    pub view_id: u16,
    pub blocking: bool,
    pub client_data: u64,
    pub origin_node_id: u16,
    pub start_timestamp: Instant,
}

impl IndexQuery {
    pub fn read_next(user_logspace: u32, tag: u64, min_seqnum: u32) -> Self {
        Self::new(QueryType::ReadNext, user_logspace, tag, min_seqnum)
    }

    pub fn read_prev(user_logspace: u32, tag: u64, max_seqnum: u32) -> Self {
        Self::new(QueryType::ReadPrev, user_logspace, tag, max_seqnum)
    }

    fn new(query_type: QueryType, user_logspace: u32, tag: u64, seqnum_bound: u32) -> Self {
        Self {
            query_type,
            user_logspace,
            tag,
            seqnum_bound,
            metalog_progress_required: 0,
            view_id: 0,
            blocking: false,
            client_data: 0,
            origin_node_id: 0,
            start_timestamp: Instant::now(),
        }
    }

    pub fn with_progress_required(mut self, view_id: u16, position: u32) -> Self {
        self.view_id = view_id;
        self.metalog_progress_required = position;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn with_client_data(mut self, client_data: u64) -> Self {
        self.client_data = client_data;
        self
    }

    pub fn with_origin(mut self, origin_node_id: u16) -> Self {
        self.origin_node_id = origin_node_id;
        self
    }
}

/// Outcome of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Found,
    NotFound,
    /// This view cannot answer; retry against `view_id` in the result.
    ContinueToNextView,
    /// The query was malformed for this index (e.g. future view).
    Invalid,
}

#[derive(Debug, Clone)]
pub struct IndexQueryResult {
    pub state: QueryState,
    pub seqnum: u32,
    pub engine_id: u16,
    pub view_id: u16,
    pub query: IndexQuery,
}

impl IndexQueryResult {
    pub fn is_found(&self) -> bool {
        self.state == QueryState::Found
    }
}
