//! Token-keyed session admission table, block-observation tracking, and
//! idle reclamation.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::debounce::AsyncDebounce;
use crate::protocol_constants::DEFAULT_BLOCK_SIZE;
use crate::session::manager::SessionManager;
use crate::token::LocalToken;

/// Opaque handle for a live connection draining the block pump, so the
/// idle reclaimer can tell an in-flight download from a truly idle one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(pub u64);

/// Per-token entry: the admitted session plus the block/transport
/// observations the idle reclaimer needs.
struct Entry {
    downloaded_blocks: DashSet<u64>,
    transports: DashSet<TransportId>,
    debounce: Arc<AsyncDebounce<(LocalToken, u64)>>,
}

/// Admission table: a token is streamable iff it has an entry here
/// (invariant 1 — "a session is admitted for streaming iff its token is in
/// the SessionTable"). Modeled on the teacher's indexed
/// `PlaybackSessionStore`, generalized from a (stream, speaker) composite
/// key with a speaker-ip secondary index to a single token key with
/// per-token auxiliary collections (this crate never needs to look a
/// session up by anything but its token).
pub struct SessionTable {
    entries: DashMap<LocalToken, Entry>,
    manager: Arc<SessionManager>,
    idle_timeout: Duration,
    block_size: u64,
}

impl SessionTable {
    pub fn new(manager: Arc<SessionManager>, idle_timeout: Duration, block_size: u64) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            manager,
            idle_timeout,
            block_size,
        })
    }

    /// Admits `token` for streaming, arming its idle debounce. No-op if
    /// already admitted.
    pub fn admit(self: &Arc<Self>, token: LocalToken, size: u64) {
        if self.entries.contains_key(&token) {
            return;
        }
        let table = self.clone();
        let debounce = AsyncDebounce::new(self.idle_timeout, move |(token, size)| {
            let table = table.clone();
            async move {
                table.on_idle_fire(token, size).await;
            }
        });
        self.entries.insert(
            token,
            Entry {
                downloaded_blocks: DashSet::new(),
                transports: DashSet::new(),
                debounce: Arc::new(debounce),
            },
        );
    }

    pub fn is_admitted(&self, token: &LocalToken) -> bool {
        self.entries.contains_key(token)
    }

    /// Refreshes the idle timer for `token`. No-op if not admitted (a race
    /// with reclamation, not an error condition worth surfacing).
    pub fn touch(&self, token: LocalToken, size: u64) {
        if let Some(entry) = self.entries.get(&token) {
            entry.debounce.update_args((token, size));
        }
    }

    pub fn register_transport(&self, token: LocalToken, transport: TransportId) {
        if let Some(entry) = self.entries.get(&token) {
            entry.transports.insert(transport);
        }
    }

    pub fn unregister_transport(&self, token: LocalToken, transport: TransportId) {
        if let Some(entry) = self.entries.get(&token) {
            entry.transports.remove(&transport);
        }
    }

    pub fn observe_block(&self, token: LocalToken, offset: u64) {
        if let Some(entry) = self.entries.get(&token) {
            entry.downloaded_blocks.insert(offset);
        }
    }

    fn has_open_transports(&self, token: &LocalToken) -> bool {
        self.entries
            .get(token)
            .map(|e| !e.transports.is_empty())
            .unwrap_or(false)
    }

    /// Called when a session's debounce fires. Reschedules if a transport
    /// is still open; otherwise computes the remaining-percentage and
    /// drives reclamation through the owning [`SessionManager`].
    async fn on_idle_fire(self: &Arc<Self>, token: LocalToken, size: u64) {
        if self.has_open_transports(&token) {
            if let Some(entry) = self.entries.get(&token) {
                entry.debounce.reschedule();
            }
            return;
        }

        let remaining_pct = self.remove(token, size);
        self.manager.close(token, remaining_pct).await;
    }

    /// Removes `token`'s entry and returns the remaining-percentage
    /// computed from its observed downloaded blocks, per the literal
    /// off-by-one formula: `blocks = size/B + 1`, `remaining = blocks -
    /// |downloaded_blocks|` (defaulting to `blocks` if nothing was
    /// observed).
    fn remove(&self, token: LocalToken, size: u64) -> f64 {
        let block_size = self.block_size;
        let blocks = size / block_size + 1;
        let observed = self
            .entries
            .remove(&token)
            .map(|(_, entry)| entry.downloaded_blocks.len() as u64)
            .unwrap_or(0);
        let remaining = blocks.saturating_sub(observed);
        (remaining as f64 / blocks as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registry::DeviceRegistry;

    fn make_table() -> (Arc<SessionTable>, Arc<SessionManager>) {
        let manager = SessionManager::new(Arc::new(DeviceRegistry::new(vec![])));
        let table = SessionTable::new(manager.clone(), Duration::from_secs(900), DEFAULT_BLOCK_SIZE);
        (table, manager)
    }

    #[test]
    fn admit_marks_token_as_admitted() {
        let (table, _manager) = make_table();
        let token = LocalToken::new(1);
        assert!(!table.is_admitted(&token));
        table.admit(token, 5_000_000);
        assert!(table.is_admitted(&token));
    }

    #[test]
    fn admit_is_idempotent() {
        let (table, _manager) = make_table();
        let token = LocalToken::new(1);
        table.admit(token, 5_000_000);
        table.observe_block(token, 0);
        table.admit(token, 5_000_000);
        assert_eq!(table.entries.get(&token).unwrap().downloaded_blocks.len(), 1);
    }

    #[test]
    fn remove_computes_remaining_pct_with_off_by_one_block_count() {
        let (table, _manager) = make_table();
        let token = LocalToken::new(1);
        let size = DEFAULT_BLOCK_SIZE * 3;
        table.admit(token, size);
        table.observe_block(token, 0);
        table.observe_block(token, DEFAULT_BLOCK_SIZE);
        let pct = table.remove(token, size);
        // blocks = 3/1 + 1 = 4, observed = 2, remaining = 2, pct = 50%
        assert!((pct - 50.0).abs() < 1e-9);
        assert!(!table.is_admitted(&token));
    }

    #[test]
    fn remove_defaults_to_full_remaining_when_no_blocks_observed() {
        let (table, _manager) = make_table();
        let token = LocalToken::new(1);
        let size = DEFAULT_BLOCK_SIZE * 3;
        table.admit(token, size);
        let pct = table.remove(token, size);
        assert!((pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn remove_uses_configured_block_size_not_the_default_constant() {
        let manager = SessionManager::new(Arc::new(DeviceRegistry::new(vec![])));
        let custom_block_size = 1024;
        let table = SessionTable::new(manager, Duration::from_secs(900), custom_block_size);
        let token = LocalToken::new(1);
        let size = custom_block_size * 3;
        table.admit(token, size);
        table.observe_block(token, 0);
        let pct = table.remove(token, size);
        // blocks = 3/1 + 1 = 4, observed = 1, remaining = 3, pct = 75%
        assert!((pct - 75.0).abs() < 1e-9);
    }
}
