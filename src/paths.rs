// src/paths.rs

//! On-host filesystem layout
//!
//! Every artifact the engine writes on either endpoint lives under these
//! paths. `DATA_DIR` is owned by the engine for the duration of a run.

/// Engine working directory on both endpoints
pub const DATA_DIR: &str = "/root/.cloudflock";

/// Newline-delimited exclusion list on the source
pub const EXCLUSIONS_FILE: &str = "/root/.cloudflock/migration_exclusions";

/// Transfer keypair on the source
pub const PRIVATE_KEY: &str = "/root/.cloudflock/migration_id_rsa";
pub const PUBLIC_KEY: &str = "/root/.cloudflock/migration_id_rsa.pub";

/// Where the destination's target root is mounted during migration
pub const MOUNT_POINT: &str = "/mnt/migration_target";

/// Destination block device holding the target root
pub const DEFAULT_BLOCK_DEVICE: &str = "/dev/xvdb1";

/// Suffix for credential-file backups under the mounted root
pub const BACKUP_SUFFIX: &str = "migration";
