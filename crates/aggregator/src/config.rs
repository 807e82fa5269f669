//! Configuration for fetch operations and data locations

use crate::error::{PipelineError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Smallest page size the SpaceDock API accepts.
pub const MIN_PAGE_SIZE: u32 = 30;
/// Largest page size the SpaceDock API accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Configuration shared by all source fetchers.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// SpaceDock API base, without trailing slash.
    pub spacedock_base: String,
    /// Curse portal base, without trailing slash.
    pub curse_base: String,
    /// Listing path on the Curse portal.
    pub curse_listing: String,
    /// Full URL of the CKAN metadata tarball.
    pub ckan_archive_url: String,
    /// Mods per SpaceDock API page, clamped to 30..=500.
    pub page_size: u32,
    pub timeout: Duration,
    pub user_agent: String,
    /// Directory for cache snapshots and the database file.
    pub data_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            spacedock_base: "https://spacedock.info".to_string(),
            curse_base: "https://mods.curse.com".to_string(),
            curse_listing: "/ksp-mods/kerbal".to_string(),
            ckan_archive_url: "https://github.com/KSP-CKAN/CKAN-meta/archive/master.tar.gz"
                .to_string(),
            page_size: 100,
            timeout: Duration::from_secs(30),
            user_agent: "aggregator/0.1.0".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl FetchConfig {
    /// Override the SpaceDock page size, clamped to the API's accepted range.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// URL for one SpaceDock API page. The first page carries only the page
    /// size, matching how the API is normally entered.
    pub fn spacedock_page_url(&self, page: u32) -> String {
        if page <= 1 {
            format!("{}/api/browse?count={}", self.spacedock_base, self.page_size)
        } else {
            format!(
                "{}/api/browse?page={}&count={}",
                self.spacedock_base, page, self.page_size
            )
        }
    }

    /// URL for one Curse listing page, `?page=N` from the second page on.
    pub fn curse_page_url(&self, page: u32) -> String {
        if page <= 1 {
            format!("{}{}", self.curse_base, self.curse_listing)
        } else {
            format!("{}{}?page={}", self.curse_base, self.curse_listing, page)
        }
    }

    /// Build the shared HTTP client. Cookies stay enabled so the Curse portal
    /// sees one session across pages.
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .cookie_store(true)
            .build()
            .map_err(|source| PipelineError::ClientBuild { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped_to_api_range() {
        assert_eq!(FetchConfig::default().with_page_size(5).page_size, MIN_PAGE_SIZE);
        assert_eq!(FetchConfig::default().with_page_size(9999).page_size, MAX_PAGE_SIZE);
        assert_eq!(FetchConfig::default().with_page_size(250).page_size, 250);
    }

    #[test]
    fn first_pages_omit_the_page_parameter() {
        let config = FetchConfig::default();
        assert!(!config.spacedock_page_url(1).contains("page="));
        assert!(config.spacedock_page_url(3).contains("page=3"));
        assert!(!config.curse_page_url(1).contains("?page="));
        assert!(config.curse_page_url(2).ends_with("?page=2"));
    }
}
