pub mod filters;

use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use async_recursion::async_recursion;
use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::ProxyError;
use crate::proxy::context::RequestContext;
use crate::proxy::repository::Repository;
use crate::storage::item::StorageItem;
use crate::util::item_path;
use crate::walker::filters::WalkerFilter;

/// Callbacks invoked while walking a repository. Processors keep their own state behind interior
///  mutability, since a walk only hands out shared references. An error from any hook stops the
///  walk with that error as the cause.
#[async_trait]
pub trait WalkerProcessor: Send + Sync {
    async fn before_walk(&self, _ctx: &WalkerContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_item(&self, ctx: &WalkerContext, item: &StorageItem) -> anyhow::Result<()>;

    /// after all children of `collection` were visited
    async fn on_collection_exit(&self, _ctx: &WalkerContext, _collection: &StorageItem) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_walk(&self, _ctx: &WalkerContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The cancellation state of a walk, shared with whoever wants to stop it
#[derive(Clone, Default)]
pub struct WalkerControl {
    running: Arc<AtomicBool>,
    stop_cause: Arc<Mutex<Option<Arc<anyhow::Error>>>>,
}

impl Debug for WalkerControl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkerControl")
            .field("running", &self.is_running())
            .field("stop_cause", &self.stop_cause().map(|e| e.to_string()))
            .finish()
    }
}

impl WalkerControl {
    fn new() -> WalkerControl {
        WalkerControl {
            running: Arc::new(AtomicBool::new(true)),
            stop_cause: Default::default(),
        }
    }

    /// Takes effect before the next node is visited. The first cause is kept.
    pub fn stop(&self, cause: Option<anyhow::Error>) {
        if let Some(cause) = cause {
            let mut stop_cause = self.stop_cause.lock().unwrap_or_else(|e| e.into_inner());
            if stop_cause.is_none() {
                *stop_cause = Some(Arc::new(cause));
            }
        }
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop_cause(&self) -> Option<Arc<anyhow::Error>> {
        self.stop_cause.lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct WalkerContext {
    pub request: RequestContext,
    pub start_path: String,
    pub collections_only: bool,
    filter: Option<Box<dyn WalkerFilter>>,
    processors: Vec<Arc<dyn WalkerProcessor>>,
    control: WalkerControl,
}

impl Debug for WalkerContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkerContext")
            .field("request", &self.request)
            .field("start_path", &self.start_path)
            .field("collections_only", &self.collections_only)
            .field("processors", &self.processors.len())
            .field("control", &self.control)
            .finish()
    }
}

impl WalkerContext {
    pub fn new(request: RequestContext) -> WalkerContext {
        WalkerContext {
            request,
            start_path: item_path::ROOT.to_string(),
            collections_only: false,
            filter: None,
            processors: vec![],
            control: WalkerControl::new(),
        }
    }

    pub fn with_start_path(mut self, start_path: &str) -> WalkerContext {
        self.start_path = item_path::normalize(start_path);
        self
    }

    pub fn with_collections_only(mut self, collections_only: bool) -> WalkerContext {
        self.collections_only = collections_only;
        self
    }

    pub fn with_filter(mut self, filter: impl WalkerFilter + 'static) -> WalkerContext {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn WalkerProcessor>) -> WalkerContext {
        self.processors.push(processor);
        self
    }

    pub fn local_only(&self) -> bool {
        self.request.local_only
    }

    /// a handle for stopping the walk from elsewhere
    pub fn control(&self) -> WalkerControl {
        self.control.clone()
    }

    pub fn stop(&self, cause: Option<anyhow::Error>) {
        self.control.stop(cause)
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stop_cause(&self) -> Option<Arc<anyhow::Error>> {
        self.control.stop_cause()
    }

    fn should_process(&self, item: &StorageItem) -> bool {
        if self.collections_only && !item.is_collection() {
            return false;
        }
        self.filter.as_ref().map_or(true, |f| f.should_process(item))
    }

    fn should_recurse_into(&self, collection: &StorageItem) -> bool {
        self.filter.as_ref().map_or(true, |f| f.should_recurse_into(collection))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// nodes the walk reached
    pub visited: usize,
    /// nodes handed to the processors
    pub processed: usize,
}

/// A walk that was stopped with a cause
#[derive(Debug, Clone)]
pub struct WalkerError {
    pub cause: Arc<anyhow::Error>,
}

impl WalkerError {
    /// true if the start path does not exist, which most callers treat as "nothing to do"
    pub fn is_not_found(&self) -> bool {
        self.cause.downcast_ref::<ProxyError>()
            .map_or(false, |e| e.is_not_found())
    }
}

impl Display for WalkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "walk aborted: {:#}", self.cause)
    }
}

impl std::error::Error for WalkerError {}

#[derive(Default)]
struct Counters {
    visited: AtomicUsize,
    processed: AtomicUsize,
}

/// Depth-first, pre-order traversal of `repository` below the context's start path. Children
///  are visited in the order `list` returns them. The running flag is checked before every node
///  and between processors, so a stop takes effect without visiting anything further.
pub async fn walk(repository: &dyn Repository, ctx: &WalkerContext) -> Result<WalkReport, WalkerError> {
    debug!("walking {} from {}", repository.id(), ctx.start_path);
    let counters = Counters::default();

    let result = async {
        for processor in &ctx.processors {
            processor.before_walk(ctx).await?;
        }

        let start = repository.retrieve(&ctx.start_path, &ctx.request.for_new_operation()).await?;
        walk_item(repository, ctx, start, &counters).await?;

        if ctx.is_running() {
            for processor in &ctx.processors {
                processor.after_walk(ctx).await?;
            }
        }
        Ok::<_, anyhow::Error>(())
    }.await;

    if let Err(e) = result {
        ctx.stop(Some(e));
    }

    let report = WalkReport {
        visited: counters.visited.load(Ordering::Acquire),
        processed: counters.processed.load(Ordering::Acquire),
    };
    match ctx.stop_cause() {
        Some(cause) => {
            debug!("walk of {} stopped: {:#}", repository.id(), cause);
            Err(WalkerError { cause })
        }
        None => {
            debug!("walk of {} finished: {:?}", repository.id(), report);
            Ok(report)
        }
    }
}

#[async_recursion]
async fn walk_item(repository: &dyn Repository, ctx: &WalkerContext, item: StorageItem, counters: &Counters) -> anyhow::Result<()> {
    if !ctx.is_running() {
        return Ok(());
    }
    counters.visited.fetch_add(1, Ordering::AcqRel);

    if ctx.should_process(&item) {
        trace!("processing {}", item.uid());
        counters.processed.fetch_add(1, Ordering::AcqRel);
        for processor in &ctx.processors {
            if !ctx.is_running() {
                return Ok(());
            }
            processor.process_item(ctx, &item).await?;
        }
    }

    if !item.is_collection() || !ctx.should_recurse_into(&item) {
        return Ok(());
    }

    let children = match repository.list(item.path(), &ctx.request.for_new_operation()).await {
        Ok(children) => children,
        Err(e) if e.is_not_found() => {
            trace!("{} vanished during the walk", item.uid());
            return Ok(());
        }
        Err(e) => return Err(anyhow!(e)),
    };

    for child in children {
        if !ctx.is_running() {
            return Ok(());
        }
        walk_item(repository, ctx, child, counters).await?;
    }

    if ctx.is_running() {
        for processor in &ctx.processors {
            processor.on_collection_exit(ctx, &item).await?;
        }
    }
    Ok(())
}
