pub const HASH_SIZE: usize = 32;
pub const GENESIS_INDEX: u64 = 0;
pub const GENESIS_REQUEST_ID: &str = "GENESIS";
pub const GENESIS_LABEL: &str = "N/A";
pub const GENESIS_IMAGE_HASH: &str = "0";
pub const DEFAULT_TAIL_SIZE: usize = 10;
pub const MAX_TAIL_SIZE: usize = 250;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 2_000;
