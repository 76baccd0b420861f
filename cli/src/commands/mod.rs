pub mod backup;
pub mod copy;
pub mod init;
pub mod prune;
pub mod restore;
pub mod snapshots;
