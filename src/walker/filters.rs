use regex::Regex;

use crate::error::{ProxyError, ProxyResult};
use crate::storage::item::StorageItem;

pub trait WalkerFilter: Send + Sync {
    fn should_process(&self, item: &StorageItem) -> bool;

    fn should_recurse_into(&self, _collection: &StorageItem) -> bool {
        true
    }
}

/// Every filter must agree; no filters at all means everything passes
#[derive(Default)]
pub struct AndWalkerFilter {
    filters: Vec<Box<dyn WalkerFilter>>,
}

impl AndWalkerFilter {
    pub fn new(filters: Vec<Box<dyn WalkerFilter>>) -> AndWalkerFilter {
        AndWalkerFilter { filters }
    }

    pub fn add(mut self, filter: impl WalkerFilter + 'static) -> AndWalkerFilter {
        self.filters.push(Box::new(filter));
        self
    }
}

impl WalkerFilter for AndWalkerFilter {
    fn should_process(&self, item: &StorageItem) -> bool {
        self.filters.iter().all(|f| f.should_process(item))
    }

    fn should_recurse_into(&self, collection: &StorageItem) -> bool {
        self.filters.iter().all(|f| f.should_recurse_into(collection))
    }
}

/// One filter agreeing is enough; no filters at all means everything passes
#[derive(Default)]
pub struct OrWalkerFilter {
    filters: Vec<Box<dyn WalkerFilter>>,
}

impl OrWalkerFilter {
    pub fn new(filters: Vec<Box<dyn WalkerFilter>>) -> OrWalkerFilter {
        OrWalkerFilter { filters }
    }

    pub fn add(mut self, filter: impl WalkerFilter + 'static) -> OrWalkerFilter {
        self.filters.push(Box::new(filter));
        self
    }
}

impl WalkerFilter for OrWalkerFilter {
    fn should_process(&self, item: &StorageItem) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.should_process(item))
    }

    fn should_recurse_into(&self, collection: &StorageItem) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.should_recurse_into(collection))
    }
}

pub struct FileOnlyFilter {}

impl WalkerFilter for FileOnlyFilter {
    fn should_process(&self, item: &StorageItem) -> bool {
        !item.is_collection()
    }
}

/// Processes items whose path matches; recursion is not restricted
pub struct PathPatternFilter {
    pattern: Regex,
}

impl PathPatternFilter {
    pub fn new(pattern: &str) -> ProxyResult<PathPatternFilter> {
        Ok(PathPatternFilter {
            pattern: Regex::new(pattern)
                .map_err(|e| ProxyError::InvalidArgument(format!("invalid path pattern {:?}: {}", pattern, e)))?,
        })
    }
}

impl WalkerFilter for PathPatternFilter {
    fn should_process(&self, item: &StorageItem) -> bool {
        self.pattern.is_match(item.path())
    }
}
