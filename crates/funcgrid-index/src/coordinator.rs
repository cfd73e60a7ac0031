//! Index coordinator: shard aggregation, frontier advance, queries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::metalog::{LogSpaceBase, MetaLogEntry};
use crate::per_space::PerSpaceIndex;
use crate::query::{IndexQuery, IndexQueryResult, QueryState, QueryType};

/// Parked blocking queries resolve `NotFound` after this long.
pub const BLOCKING_QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// One committed seqnum as described by a storage replica.
#[derive(Debug, Clone)]
pub struct IndexDataEntry {
    pub seqnum: u32,
    pub engine_id: u16,
    pub user_logspace: u32,
    pub user_tags: Vec<u64>,
    /// Committed but not indexable; still advances the data frontier.
    pub skip: bool,
}

/// One shard's contribution to a metalog position.
#[derive(Debug, Clone)]
pub struct IndexData {
    pub metalog_position: u32,
    pub storage_shard_id: u16,
    pub end_seqnum: u32,
    pub entries: Vec<IndexDataEntry>,
}

/// Aggregate counters, exposed for observability logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub num_seqnums: usize,
    pub num_tags: usize,
    pub num_seqnums_of_tags: usize,
    pub approx_bytes: usize,
}

#[derive(Debug, Clone)]
struct ReceivedEntry {
    engine_id: u16,
    user_logspace: u32,
    user_tags: Vec<u64>,
    skip: bool,
}

/// Aggregates index data for one sequencer's log space and answers
/// tag-lookup queries against it.
///
/// Single-owner: all mutation happens on one task. In local mode a
/// single producer feeds `provide_index_data` and cut boundaries come
/// from the applied metalog. In sharded mode `num_shards` storage
/// replicas each deliver their subset of seqnums per cut, and a cut
/// only completes once all shard ids have reported for its metalog
/// position. The indexed frontier never moves backwards.
pub struct IndexCoordinator {
    log_space: LogSpaceBase,
    num_shards: usize,

    index: HashMap<u32, PerSpaceIndex>,
    received_data: BTreeMap<u32, ReceivedEntry>,
    data_received_seqnum_position: u32,
    indexed_seqnum_position: u32,
    indexed_metalog_position: u32,

    // Sharded-tier bookkeeping, keyed by metalog position.
    storage_shards_index_updates: BTreeMap<u32, HashSet<u16>>,
    end_seqnum_positions: HashMap<u32, u32>,

    // Parked queries keyed by required metalog position, plus a
    // parallel time-stamped list enforcing the blocking timeout.
    pending_queries: BTreeMap<u32, Vec<(u64, IndexQuery)>>,
    blocking_deadlines: Vec<(u64, u32, Instant)>,
    next_park_id: u64,

    pending_results: Vec<IndexQueryResult>,
}

impl IndexCoordinator {
    /// Local (single-producer) mode.
    pub fn new(view_id: u16, sequencer_id: u16) -> Self {
        Self::with_shards(view_id, sequencer_id, 1)
    }

    /// Index-tier mode with `num_shards` storage replicas per cut.
    pub fn new_sharded(view_id: u16, sequencer_id: u16, num_shards: usize) -> Self {
        Self::with_shards(view_id, sequencer_id, num_shards)
    }

    fn with_shards(view_id: u16, sequencer_id: u16, num_shards: usize) -> Self {
        Self {
            log_space: LogSpaceBase::new(view_id, sequencer_id),
            num_shards,
            index: HashMap::new(),
            received_data: BTreeMap::new(),
            data_received_seqnum_position: 0,
            indexed_seqnum_position: 0,
            indexed_metalog_position: 0,
            storage_shards_index_updates: BTreeMap::new(),
            end_seqnum_positions: HashMap::new(),
            pending_queries: BTreeMap::new(),
            blocking_deadlines: Vec::new(),
            next_park_id: 0,
            pending_results: Vec::new(),
        }
    }

    pub fn view_id(&self) -> u16 {
        self.log_space.view_id()
    }

    pub fn sequencer_id(&self) -> u16 {
        self.log_space.sequencer_id()
    }

    pub fn indexed_metalog_position(&self) -> u32 {
        self.indexed_metalog_position
    }

    pub fn indexed_seqnum_position(&self) -> u32 {
        self.indexed_seqnum_position
    }

    pub fn num_pending_queries(&self) -> usize {
        self.pending_queries.values().map(Vec::len).sum()
    }

    // ── Metalog feed (local mode) ───────────────────────────────────

    /// Apply the next metalog entry, then index any cuts whose data
    /// has fully arrived.
    pub fn on_metalog_applied(&mut self, entry: MetaLogEntry) -> IndexResult<()> {
        self.log_space.on_metalog_applied(entry)?;
        self.advance_index_progress();
        Ok(())
    }

    /// Seal the view at `position`. Parked queries that require
    /// progress beyond the seal can never be satisfied here and
    /// resolve `ContinueToNextView`.
    pub fn on_finalized(&mut self, position: u32) {
        self.log_space.on_finalized(position);
        let unreachable = self.pending_queries.split_off(&(position + 1));
        for (_, parked) in unreachable {
            for (_, query) in parked {
                let result = self.build_continue_result(query);
                self.pending_results.push(result);
            }
        }
    }

    // ── Index data ingestion ────────────────────────────────────────

    /// Local mode: merge entries from the single producer and advance
    /// the contiguous data frontier.
    pub fn provide_index_data(&mut self, entries: Vec<IndexDataEntry>) {
        self.merge_entries(entries);
        self.advance_index_progress();
    }

    /// Sharded mode: ingest one shard's contribution to one cut.
    /// Duplicate deliveries are idempotent.
    pub fn provide_index_data_shard(&mut self, data: IndexData) -> IndexResult<()> {
        if usize::from(data.storage_shard_id) >= self.num_shards {
            return Err(IndexError::ShardOutOfRange {
                shard: data.storage_shard_id,
                num_shards: self.num_shards,
            });
        }
        if data.metalog_position < self.indexed_metalog_position {
            debug!(
                metalog_position = data.metalog_position,
                indexed = self.indexed_metalog_position,
                "dropping stale shard data"
            );
            return Ok(());
        }
        if let Some(&cached) = self.end_seqnum_positions.get(&data.metalog_position) {
            if cached != data.end_seqnum {
                return Err(IndexError::EndSeqnumMismatch {
                    position: data.metalog_position,
                    cached,
                    got: data.end_seqnum,
                });
            }
        } else {
            self.end_seqnum_positions
                .insert(data.metalog_position, data.end_seqnum);
        }
        self.storage_shards_index_updates
            .entry(data.metalog_position)
            .or_default()
            .insert(data.storage_shard_id);
        self.merge_entries(data.entries);
        self.try_complete_index_updates();
        Ok(())
    }

    /// Ingest one sharded payload and report whether any cut
    /// completed as a consequence.
    pub fn advance_index_progress_with_data(&mut self, data: IndexData) -> IndexResult<bool> {
        let before = self.indexed_metalog_position;
        self.provide_index_data_shard(data)?;
        Ok(self.indexed_metalog_position > before)
    }

    fn merge_entries(&mut self, entries: Vec<IndexDataEntry>) {
        for entry in entries {
            // First writer wins when replicas overlap.
            self.received_data.entry(entry.seqnum).or_insert(ReceivedEntry {
                engine_id: entry.engine_id,
                user_logspace: entry.user_logspace,
                user_tags: entry.user_tags,
                skip: entry.skip,
            });
        }
        while self
            .received_data
            .contains_key(&self.data_received_seqnum_position)
        {
            self.data_received_seqnum_position += 1;
        }
    }

    // ── Frontier advance ────────────────────────────────────────────

    /// Local mode: consume applied cuts whose seqnum range has fully
    /// arrived from the producer.
    pub fn advance_index_progress(&mut self) {
        let mut advanced = false;
        while let Some((metalog_seqnum, end_seqnum)) = self.log_space.front_cut() {
            if self.data_received_seqnum_position < end_seqnum {
                break;
            }
            self.apply_entries_below(end_seqnum);
            self.indexed_metalog_position = metalog_seqnum + 1;
            self.log_space.pop_front_cut();
            advanced = true;
        }
        if advanced {
            self.release_parked_queries();
        }
    }

    /// Sharded mode: complete cuts in metalog order. A cut completes
    /// once all shard ids have reported; an incomplete cut at the
    /// front holds the frontier even when later cuts are complete.
    pub fn try_complete_index_updates(&mut self) {
        let mut advanced = false;
        loop {
            let Some((&position, shards)) = self.storage_shards_index_updates.iter().next() else {
                break;
            };
            if shards.len() < self.num_shards {
                break;
            }
            let end_seqnum = self
                .end_seqnum_positions
                .remove(&position)
                .unwrap_or(self.indexed_seqnum_position);
            self.apply_entries_below(end_seqnum);
            self.storage_shards_index_updates.remove(&position);
            self.indexed_metalog_position = position + 1;
            advanced = true;
            debug!(
                metalog_position = position,
                end_seqnum, "index cut complete"
            );
        }
        if advanced {
            self.release_parked_queries();
        }
    }

    fn apply_entries_below(&mut self, end_seqnum: u32) {
        let keep = self.received_data.split_off(&end_seqnum);
        let apply = std::mem::replace(&mut self.received_data, keep);
        for (seqnum, entry) in apply {
            if entry.skip {
                continue;
            }
            self.index
                .entry(entry.user_logspace)
                .or_insert_with(|| PerSpaceIndex::new(entry.user_logspace))
                .add(seqnum, entry.engine_id, &entry.user_tags);
        }
        self.indexed_seqnum_position = self.indexed_seqnum_position.max(end_seqnum);
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Submit a query. Results surface through `poll_query_results`;
    /// a query whose progress requirement outruns the frontier parks
    /// until the frontier catches up, the view seals, or (for
    /// blocking queries) the timeout fires.
    pub fn make_query(&mut self, query: IndexQuery) {
        if query.view_id > self.view_id() {
            warn!(
                query_view = query.view_id,
                our_view = self.view_id(),
                "query targets a future view"
            );
            let result = self.build_invalid_result(query);
            self.pending_results.push(result);
            return;
        }
        let progress_met = query.view_id < self.view_id()
            || query.metalog_progress_required <= self.indexed_metalog_position;
        if progress_met {
            let result = self.process_query(query);
            self.pending_results.push(result);
            return;
        }
        if let Some(sealed) = self.log_space.sealed_position() {
            if query.metalog_progress_required > sealed {
                let result = self.build_continue_result(query);
                self.pending_results.push(result);
                return;
            }
        }
        self.park_query(query);
    }

    fn park_query(&mut self, query: IndexQuery) {
        let park_id = self.next_park_id;
        self.next_park_id += 1;
        let position = query.metalog_progress_required;
        if query.blocking {
            self.blocking_deadlines
                .push((park_id, position, query.start_timestamp));
        }
        self.pending_queries
            .entry(position)
            .or_default()
            .push((park_id, query));
    }

    /// Resolve every parked query whose requirement the frontier now
    /// meets. One pass; called after each advance.
    fn release_parked_queries(&mut self) {
        let still_parked = self
            .pending_queries
            .split_off(&(self.indexed_metalog_position + 1));
        let ready = std::mem::replace(&mut self.pending_queries, still_parked);
        for (_, parked) in ready {
            for (_, query) in parked {
                let result = self.process_query(query);
                self.pending_results.push(result);
            }
        }
    }

    /// Expire blocking queries older than [`BLOCKING_QUERY_TIMEOUT`].
    /// Driven by the owner's timer tick.
    pub fn drain_blocking_timeouts(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.blocking_deadlines.retain(|&(park_id, position, start)| {
            if now.duration_since(start) < BLOCKING_QUERY_TIMEOUT {
                return true;
            }
            expired.push((park_id, position));
            false
        });
        for (park_id, position) in expired {
            let Some(parked) = self.pending_queries.get_mut(&position) else {
                continue; // already resolved by an advance
            };
            let Some(at) = parked.iter().position(|&(id, _)| id == park_id) else {
                continue;
            };
            let (_, query) = parked.remove(at);
            if parked.is_empty() {
                self.pending_queries.remove(&position);
            }
            debug!(tag = query.tag, "blocking query timed out");
            let result = self.build_not_found_result(query);
            self.pending_results.push(result);
        }
    }

    /// Resolve `Invalid` every parked query submitted by
    /// `origin_node_id`; used when the origin's connection drops.
    pub fn cancel_queries_from(&mut self, origin_node_id: u16) {
        let mut cancelled = Vec::new();
        for parked in self.pending_queries.values_mut() {
            parked.retain(|(_, query)| {
                if query.origin_node_id == origin_node_id {
                    cancelled.push(query.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.pending_queries.retain(|_, parked| !parked.is_empty());
        for query in cancelled {
            let result = self.build_invalid_result(query);
            self.pending_results.push(result);
        }
    }

    /// Drain accumulated results into `out`.
    pub fn poll_query_results(&mut self, out: &mut Vec<IndexQueryResult>) {
        out.append(&mut self.pending_results);
    }

    fn process_query(&mut self, query: IndexQuery) -> IndexQueryResult {
        let hit = self.index.get(&query.user_logspace).and_then(|space| {
            match query.query_type {
                QueryType::ReadNext => space.find_next(query.tag, query.seqnum_bound),
                QueryType::ReadPrev => space.find_prev(query.tag, query.seqnum_bound),
            }
        });
        match hit {
            Some((seqnum, engine_id)) => self.build_found_result(query, seqnum, engine_id),
            None => {
                // A ReadNext bound beyond everything this view has
                // indexed may still land in a successor view.
                let beyond_view = query.query_type == QueryType::ReadNext
                    && query.seqnum_bound > self.indexed_seqnum_position;
                if beyond_view && self.log_space.is_sealed() {
                    self.build_continue_result(query)
                } else {
                    self.build_not_found_result(query)
                }
            }
        }
    }

    fn build_found_result(
        &self,
        query: IndexQuery,
        seqnum: u32,
        engine_id: u16,
    ) -> IndexQueryResult {
        IndexQueryResult {
            state: QueryState::Found,
            seqnum,
            engine_id,
            view_id: self.view_id(),
            query,
        }
    }

    fn build_not_found_result(&self, query: IndexQuery) -> IndexQueryResult {
        IndexQueryResult {
            state: QueryState::NotFound,
            seqnum: 0,
            engine_id: 0,
            view_id: self.view_id(),
            query,
        }
    }

    fn build_continue_result(&self, query: IndexQuery) -> IndexQueryResult {
        IndexQueryResult {
            state: QueryState::ContinueToNextView,
            seqnum: 0,
            engine_id: 0,
            view_id: self.view_id() + 1,
            query,
        }
    }

    fn build_invalid_result(&self, query: IndexQuery) -> IndexQueryResult {
        IndexQueryResult {
            state: QueryState::Invalid,
            seqnum: 0,
            engine_id: 0,
            view_id: self.view_id(),
            query,
        }
    }

    /// Aggregate counters across all per-space indexes.
    pub fn aggregate(&self) -> IndexStats {
        let mut stats = IndexStats::default();
        for space in self.index.values() {
            stats.num_seqnums += space.num_seqnums();
            stats.num_tags += space.num_tags();
            stats.num_seqnums_of_tags += space.num_seqnums_of_tags();
            stats.approx_bytes += space.approx_bytes();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metalog::MetaLogKind;

    fn entry(seqnum: u32, engine_id: u16, tags: &[u64]) -> IndexDataEntry {
        IndexDataEntry {
            seqnum,
            engine_id,
            user_logspace: 1,
            user_tags: tags.to_vec(),
            skip: false,
        }
    }

    fn cut(metalog_seqnum: u32, end_seqnum: u32) -> MetaLogEntry {
        MetaLogEntry {
            metalog_seqnum,
            kind: MetaLogKind::Cut {
                prev_end_seqnum: 0,
                end_seqnum,
            },
        }
    }

    fn drain(coordinator: &mut IndexCoordinator) -> Vec<IndexQueryResult> {
        let mut out = Vec::new();
        coordinator.poll_query_results(&mut out);
        out
    }

    #[test]
    fn local_mode_indexes_after_cut_and_data() {
        let mut c = IndexCoordinator::new(1, 0);
        c.provide_index_data(vec![entry(0, 3, &[42]), entry(1, 3, &[43])]);
        assert_eq!(c.indexed_metalog_position(), 0);

        c.on_metalog_applied(cut(0, 2)).unwrap();
        assert_eq!(c.indexed_metalog_position(), 1);
        assert_eq!(c.indexed_seqnum_position(), 2);

        c.make_query(IndexQuery::read_next(1, 42, 0));
        let results = drain(&mut c);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, QueryState::Found);
        assert_eq!(results[0].seqnum, 0);
        assert_eq!(results[0].engine_id, 3);
    }

    #[test]
    fn local_mode_cut_waits_for_data() {
        let mut c = IndexCoordinator::new(1, 0);
        c.on_metalog_applied(cut(0, 2)).unwrap();
        assert_eq!(c.indexed_metalog_position(), 0);

        c.provide_index_data(vec![entry(0, 3, &[])]);
        assert_eq!(c.indexed_metalog_position(), 0);

        c.provide_index_data(vec![entry(1, 3, &[])]);
        assert_eq!(c.indexed_metalog_position(), 1);
    }

    #[test]
    fn sharded_cut_completes_only_with_all_shards() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 2);
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![entry(0, 3, &[42])],
        })
        .unwrap();
        assert_eq!(c.indexed_metalog_position(), 0);

        // Duplicate delivery is idempotent.
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![entry(0, 3, &[42])],
        })
        .unwrap();
        assert_eq!(c.indexed_metalog_position(), 0);

        let advanced = c
            .advance_index_progress_with_data(IndexData {
                metalog_position: 0,
                storage_shard_id: 1,
                end_seqnum: 2,
                entries: vec![entry(1, 4, &[42])],
            })
            .unwrap();
        assert!(advanced);
        assert_eq!(c.indexed_metalog_position(), 1);
        assert_eq!(c.indexed_seqnum_position(), 2);
    }

    #[test]
    fn incomplete_front_cut_holds_the_frontier() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 2);
        // Position 1 fully delivered, position 0 only half.
        for shard in 0..2u16 {
            c.provide_index_data_shard(IndexData {
                metalog_position: 1,
                storage_shard_id: shard,
                end_seqnum: 4,
                entries: vec![],
            })
            .unwrap();
        }
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![],
        })
        .unwrap();
        assert_eq!(c.indexed_metalog_position(), 0);

        // Completing position 0 releases both.
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 1,
            end_seqnum: 2,
            entries: vec![],
        })
        .unwrap();
        assert_eq!(c.indexed_metalog_position(), 2);
    }

    #[test]
    fn shard_out_of_range_is_rejected() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 2);
        let err = c
            .provide_index_data_shard(IndexData {
                metalog_position: 0,
                storage_shard_id: 2,
                end_seqnum: 1,
                entries: vec![],
            })
            .unwrap_err();
        assert_eq!(
            err,
            IndexError::ShardOutOfRange {
                shard: 2,
                num_shards: 2
            }
        );
    }

    #[test]
    fn end_seqnum_disagreement_is_rejected() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 2);
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![],
        })
        .unwrap();
        let err = c
            .provide_index_data_shard(IndexData {
                metalog_position: 0,
                storage_shard_id: 1,
                end_seqnum: 3,
                entries: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, IndexError::EndSeqnumMismatch { .. }));
    }

    #[test]
    fn parked_query_released_on_advance() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 1);
        c.make_query(
            IndexQuery::read_next(1, 42, 0).with_progress_required(1, 1),
        );
        assert!(drain(&mut c).is_empty());
        assert_eq!(c.num_pending_queries(), 1);

        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 1,
            entries: vec![entry(0, 3, &[42])],
        })
        .unwrap();

        let results = drain(&mut c);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, QueryState::Found);
        assert_eq!(c.num_pending_queries(), 0);
    }

    #[test]
    fn skip_entries_advance_without_indexing() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 1);
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![
                IndexDataEntry {
                    seqnum: 0,
                    engine_id: 3,
                    user_logspace: 1,
                    user_tags: vec![42],
                    skip: true,
                },
                entry(1, 4, &[42]),
            ],
        })
        .unwrap();

        c.make_query(IndexQuery::read_next(1, 42, 0));
        let results = drain(&mut c);
        assert_eq!(results[0].state, QueryState::Found);
        assert_eq!(results[0].seqnum, 1);
    }

    #[test]
    fn finalized_view_continues_unreachable_queries() {
        let mut c = IndexCoordinator::new_sharded(2, 0, 1);
        c.make_query(
            IndexQuery::read_next(1, 42, 0).with_progress_required(2, 10),
        );
        assert_eq!(c.num_pending_queries(), 1);

        c.on_finalized(5);
        let results = drain(&mut c);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, QueryState::ContinueToNextView);
        assert_eq!(results[0].view_id, 3);
    }

    #[test]
    fn sealed_view_continues_new_unreachable_queries_immediately() {
        let mut c = IndexCoordinator::new_sharded(2, 0, 1);
        c.on_finalized(5);
        c.make_query(
            IndexQuery::read_next(1, 42, 0).with_progress_required(2, 10),
        );
        let results = drain(&mut c);
        assert_eq!(results[0].state, QueryState::ContinueToNextView);
    }

    #[test]
    fn future_view_query_is_invalid() {
        let mut c = IndexCoordinator::new(1, 0);
        c.make_query(IndexQuery::read_next(1, 42, 0).with_progress_required(9, 0));
        let results = drain(&mut c);
        assert_eq!(results[0].state, QueryState::Invalid);
    }

    #[test]
    fn blocking_query_times_out_not_found() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 2);
        c.make_query(
            IndexQuery::read_next(1, 42, 0)
                .with_progress_required(1, 5)
                .blocking(),
        );
        assert_eq!(c.num_pending_queries(), 1);

        let start = Instant::now();
        c.drain_blocking_timeouts(start);
        assert!(drain(&mut c).is_empty());

        c.drain_blocking_timeouts(start + BLOCKING_QUERY_TIMEOUT + Duration::from_millis(10));
        let results = drain(&mut c);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, QueryState::NotFound);
        assert_eq!(c.num_pending_queries(), 0);
    }

    #[test]
    fn cancel_queries_from_origin_resolves_invalid() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 2);
        c.make_query(
            IndexQuery::read_next(1, 42, 0)
                .with_progress_required(1, 5)
                .with_origin(9),
        );
        c.make_query(
            IndexQuery::read_next(1, 43, 0)
                .with_progress_required(1, 5)
                .with_origin(8),
        );
        c.cancel_queries_from(9);

        let results = drain(&mut c);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, QueryState::Invalid);
        assert_eq!(results[0].query.origin_node_id, 9);
        assert_eq!(c.num_pending_queries(), 1);
    }

    #[test]
    fn frontier_is_monotonic() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 1);
        for position in 0..5u32 {
            let before = c.indexed_metalog_position();
            c.provide_index_data_shard(IndexData {
                metalog_position: position,
                storage_shard_id: 0,
                end_seqnum: position + 1,
                entries: vec![entry(position, 1, &[])],
            })
            .unwrap();
            assert!(c.indexed_metalog_position() >= before);
        }
        assert_eq!(c.indexed_metalog_position(), 5);

        // Stale redelivery cannot move the frontier backwards.
        c.provide_index_data_shard(IndexData {
            metalog_position: 1,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![],
        })
        .unwrap();
        assert_eq!(c.indexed_metalog_position(), 5);
    }

    #[test]
    fn aggregate_counts_across_spaces() {
        let mut c = IndexCoordinator::new_sharded(1, 0, 1);
        c.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 2,
            entries: vec![
                entry(0, 3, &[42]),
                IndexDataEntry {
                    seqnum: 1,
                    engine_id: 4,
                    user_logspace: 2,
                    user_tags: vec![7],
                    skip: false,
                },
            ],
        })
        .unwrap();

        let stats = c.aggregate();
        assert_eq!(stats.num_seqnums, 2);
        assert!(stats.num_tags >= 2);
        assert!(stats.approx_bytes > 0);
    }
}
