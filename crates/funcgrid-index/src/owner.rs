//! Single-owner task for an [`IndexCoordinator`].
//!
//! The coordinator itself is not thread-safe; every mutation happens
//! on one owner. This wrapper runs that owner as a tokio task:
//! submitters post commands over a channel, results stream back on a
//! second channel, and an internal tick drives blocking-query
//! timeouts.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::coordinator::{IndexCoordinator, IndexData, IndexDataEntry, BLOCKING_QUERY_TIMEOUT};
use crate::metalog::MetaLogEntry;
use crate::query::{IndexQuery, IndexQueryResult};

enum Command {
    MetalogApplied(MetaLogEntry),
    Finalized(u32),
    ProvideData(Vec<IndexDataEntry>),
    ProvideShard(IndexData),
    Query(IndexQuery),
    CancelOrigin(u16),
}

/// Handle for posting work to a running index owner. Cloneable;
/// dropping every handle stops the owner.
#[derive(Clone)]
pub struct IndexOwnerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl IndexOwnerHandle {
    pub fn on_metalog_applied(&self, entry: MetaLogEntry) {
        let _ = self.tx.send(Command::MetalogApplied(entry));
    }

    pub fn on_finalized(&self, position: u32) {
        let _ = self.tx.send(Command::Finalized(position));
    }

    pub fn provide_index_data(&self, entries: Vec<IndexDataEntry>) {
        let _ = self.tx.send(Command::ProvideData(entries));
    }

    pub fn provide_index_data_shard(&self, data: IndexData) {
        let _ = self.tx.send(Command::ProvideShard(data));
    }

    pub fn make_query(&self, query: IndexQuery) {
        let _ = self.tx.send(Command::Query(query));
    }

    pub fn cancel_queries_from(&self, origin_node_id: u16) {
        let _ = self.tx.send(Command::CancelOrigin(origin_node_id));
    }
}

/// Spawn the owner task for `coordinator`. Query results arrive on
/// the returned receiver in submission-completion order.
pub fn spawn_owner(
    mut coordinator: IndexCoordinator,
) -> (IndexOwnerHandle, mpsc::UnboundedReceiver<IndexQueryResult>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(BLOCKING_QUERY_TIMEOUT / 4);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut results = Vec::new();
        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    apply(&mut coordinator, command);
                }
                _ = tick.tick() => {
                    coordinator.drain_blocking_timeouts(Instant::now());
                }
            }
            coordinator.poll_query_results(&mut results);
            for result in results.drain(..) {
                if result_tx.send(result).is_err() {
                    info!("index result receiver dropped, stopping owner");
                    return;
                }
            }
        }
        info!(
            sequencer_id = coordinator.sequencer_id(),
            "index owner stopped"
        );
    });

    (IndexOwnerHandle { tx }, result_rx)
}

fn apply(coordinator: &mut IndexCoordinator, command: Command) {
    match command {
        Command::MetalogApplied(entry) => {
            if let Err(e) = coordinator.on_metalog_applied(entry) {
                // Ordering violations poison the view.
                error!(error = %e, "metalog invariant violated");
            }
        }
        Command::Finalized(position) => coordinator.on_finalized(position),
        Command::ProvideData(entries) => coordinator.provide_index_data(entries),
        Command::ProvideShard(data) => {
            if let Err(e) = coordinator.provide_index_data_shard(data) {
                error!(error = %e, "index shard rejected");
            }
        }
        Command::Query(query) => coordinator.make_query(query),
        Command::CancelOrigin(origin) => coordinator.cancel_queries_from(origin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryState;

    #[tokio::test]
    async fn owner_processes_shard_and_query() {
        let (handle, mut results) = spawn_owner(IndexCoordinator::new_sharded(1, 0, 1));
        handle.provide_index_data_shard(IndexData {
            metalog_position: 0,
            storage_shard_id: 0,
            end_seqnum: 1,
            entries: vec![IndexDataEntry {
                seqnum: 0,
                engine_id: 3,
                user_logspace: 1,
                user_tags: vec![42],
                skip: false,
            }],
        });
        handle.make_query(IndexQuery::read_next(1, 42, 0));

        let result = results.recv().await.unwrap();
        assert_eq!(result.state, QueryState::Found);
        assert_eq!(result.engine_id, 3);
    }

    #[tokio::test]
    async fn owner_expires_blocking_queries() {
        let (handle, mut results) = spawn_owner(IndexCoordinator::new_sharded(1, 0, 2));
        // Backdate the query so the next timeout tick expires it.
        let mut query = IndexQuery::read_next(1, 42, 0)
            .with_progress_required(1, 5)
            .blocking();
        query.start_timestamp = Instant::now()
            .checked_sub(BLOCKING_QUERY_TIMEOUT * 2)
            .unwrap_or_else(Instant::now);
        handle.make_query(query);

        let result = tokio::time::timeout(BLOCKING_QUERY_TIMEOUT * 3, results.recv())
            .await
            .expect("owner tick should expire the query")
            .unwrap();
        assert_eq!(result.state, QueryState::NotFound);
    }
}
