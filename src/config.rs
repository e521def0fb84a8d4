use std::time::Duration;

use crate::listing::{ListingOptions, DEFAULT_MOUNT_POINT};

/// Default time a volume size stays fresh.
pub const DEFAULT_SIZE_TTL: Duration = Duration::from_secs(60);

/// Runtime settings shared by the catalog and the docker client.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Path or name of the docker client binary
    pub docker_bin: String,
    /// Image used for throwaway inspection containers (needs `sh`, `find`, `stat`, `du`)
    pub sandbox_image: String,
    /// Where volumes are mounted inside the sandbox
    pub mount_point: String,
    /// How long a queried volume size is reused
    pub size_ttl: Duration,
    /// Count directory entries' own block size in tree totals
    pub count_directory_size: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            sandbox_image: "alpine".to_string(),
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
            size_ttl: DEFAULT_SIZE_TTL,
            count_directory_size: false,
        }
    }
}

impl AnalyzerConfig {
    pub fn listing_options(&self) -> ListingOptions {
        ListingOptions {
            strip_prefix: self.mount_point.clone(),
            count_directory_size: self.count_directory_size,
        }
    }
}
