pub mod record;
pub mod report;
pub mod snapshot;
pub mod tombstone;
