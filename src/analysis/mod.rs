pub mod anomaly;
pub mod checksum;
pub mod ordering;
