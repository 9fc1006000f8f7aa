//! Frontend-side handler for engine notifications.
//!
//! `Frontend` is the `RpcHandler` installed on the connection. It runs on
//! the delivery thread and:
//!
//! - folds `update` batches into the view's `LineCache`
//! - records `def_style` definitions in the `StyleMap`
//! - forwards `scroll_to` and `alert` to the application as `FrontendEvent`s
//!
//! Readers (rendering code) share the `ViewRegistry` and `StyleMap` through
//! cheap clones. Each update is applied under the registry's write lock, so
//! a reader sees either the old cache or the new one, never a mix.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::line_cache::LineCache;
use crate::protocol::{CoreNotification, ScrollToParams, StyleDef, UpdateParams, ViewId};
use crate::rpc::RpcHandler;

/// Events from the engine that the application reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendEvent {
    /// A view's line cache changed.
    Updated { view_id: ViewId, height: usize },
    /// The engine asks the view to bring a position into sight.
    ScrollTo(ScrollToParams),
    /// A style id was (re)defined.
    StyleDefined(u32),
    /// User-facing message from the engine.
    Alert(String),
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// View Registry
// =============================================================================

#[derive(Debug, Default)]
struct Views {
    caches: HashMap<ViewId, LineCache>,
    closed: HashSet<ViewId>,
}

/// Line caches of all open views, keyed by view id.
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    inner: Arc<RwLock<Views>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view with an empty cache. An update may already have
    /// created it; that cache is kept.
    pub fn open(&self, view_id: ViewId) {
        let mut views = write(&self.inner);
        views.closed.remove(&view_id);
        views.caches.entry(view_id).or_default();
    }

    /// Drop a view's cache. Later updates for it are ignored.
    pub fn close(&self, view_id: &ViewId) -> bool {
        let mut views = write(&self.inner);
        views.closed.insert(view_id.clone());
        views.caches.remove(view_id).is_some()
    }

    pub fn contains(&self, view_id: &ViewId) -> bool {
        read(&self.inner).caches.contains_key(view_id)
    }

    /// Run `f` against a view's cache under the read lock.
    pub fn with_view<R>(&self, view_id: &ViewId, f: impl FnOnce(&LineCache) -> R) -> Option<R> {
        read(&self.inner).caches.get(view_id).map(f)
    }

    pub fn height(&self, view_id: &ViewId) -> Option<usize> {
        self.with_view(view_id, LineCache::height)
    }

    /// Apply an update batch. Returns the new height, or `None` when the
    /// view was closed.
    ///
    /// Updates can arrive before `new_view`'s response has been processed,
    /// so a view that was never registered gets its cache created here.
    pub fn apply(&self, params: UpdateParams) -> Result<Option<usize>, ProtocolError> {
        let UpdateParams { view_id, update } = params;
        // Decode outside the lock; a bad batch changes nothing.
        let ops = update.into_ops()?;

        let mut views = write(&self.inner);
        if views.closed.contains(&view_id) {
            debug!("Ignoring update for closed view {}", view_id);
            return Ok(None);
        }
        let cache = views.caches.entry(view_id).or_default();
        cache.apply_update(ops)?;
        Ok(Some(cache.height()))
    }
}

// =============================================================================
// Style Map
// =============================================================================

/// Style definitions received through `def_style`.
#[derive(Debug, Clone, Default)]
pub struct StyleMap {
    inner: Arc<RwLock<HashMap<u32, StyleDef>>>,
}

impl StyleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, def: StyleDef) {
        write(&self.inner).insert(def.id, def);
    }

    pub fn get(&self, id: u32) -> Option<StyleDef> {
        read(&self.inner).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Handler
// =============================================================================

pub struct Frontend {
    views: ViewRegistry,
    styles: StyleMap,
    events: Sender<FrontendEvent>,
}

impl Frontend {
    pub fn new(views: ViewRegistry, styles: StyleMap, events: Sender<FrontendEvent>) -> Self {
        Self {
            views,
            styles,
            events,
        }
    }

    fn emit(&self, event: FrontendEvent) {
        if self.events.send(event).is_err() {
            debug!("No receiver for frontend events");
        }
    }
}

impl RpcHandler for Frontend {
    fn handle(&mut self, method: &str, params: Value) -> anyhow::Result<Option<Value>> {
        match CoreNotification::parse(method, params)? {
            CoreNotification::Update(update) => {
                let view_id = update.view_id.clone();
                if let Some(height) = self.views.apply(update)? {
                    self.emit(FrontendEvent::Updated { view_id, height });
                }
            }
            CoreNotification::ScrollTo(scroll) => self.emit(FrontendEvent::ScrollTo(scroll)),
            CoreNotification::DefStyle(def) => {
                let id = def.id;
                self.styles.define(def);
                self.emit(FrontendEvent::StyleDefined(id));
            }
            CoreNotification::Alert(alert) => {
                info!("Engine alert: {}", alert.msg);
                self.emit(FrontendEvent::Alert(alert.msg));
            }
            CoreNotification::Unknown(method) => {
                warn!("Unknown method from engine: {}", method);
            }
        }
        Ok(None)
    }
}
