pub const EVENTS_RECEIVED: &str = "catalog_sync_events_received";
pub const EVENT_DECODE_FAILED: &str = "catalog_sync_event_decode_failed";
pub const EVENTS_RECONCILED: &str = "catalog_sync_events_reconciled";
pub const RECONCILE_TIME: &str = "catalog_sync_reconcile_time_ms";
pub const OFFSETS_COMMITTED: &str = "catalog_sync_offsets_committed";
pub const COMMITS_WITHHELD: &str = "catalog_sync_commits_withheld";
pub const COMMIT_FAILED: &str = "catalog_sync_commit_failed";
pub const RECV_ERRORS: &str = "catalog_sync_recv_errors";
