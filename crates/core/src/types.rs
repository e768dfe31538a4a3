/// File primary keys are SHA-256 hex digests of the absolute path.
pub type FileId = String;

/// Node identifiers inside a workflow graph. UI-format integer ids are
/// stringified so both document shapes share one key space.
pub type NodeId = String;

/// All filesystem and scan timestamps are whole seconds since the Unix epoch.
pub type EpochSecs = i64;
