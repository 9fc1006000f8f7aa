//! Client-side handle for one open document.
//!
//! The engine assigns a view id only when `new_view` answers. Edits issued
//! before that are queued here and flushed, in order, as soon as the id is
//! set, so callers never have to wait for the round trip before typing.
//!
//! An edit leaves the queue only once it has been handed to the engine. If
//! a send fails, the failed edit and everything behind it stay queued and
//! go out ahead of the next edit.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::commands::{CoreService, EditOp};
use crate::error::RpcError;
use crate::protocol::ViewId;

#[derive(Debug, Default)]
pub struct Document {
    view_id: Option<ViewId>,
    file_path: Option<PathBuf>,
    pending: Vec<EditOp>,
    /// Filled in from the delivery thread once `initial_plugins` answers.
    plugins: Arc<Mutex<Option<Vec<String>>>>,
}

impl Document {
    pub fn new(file_path: Option<PathBuf>) -> Self {
        Self {
            file_path,
            ..Self::default()
        }
    }

    pub fn view_id(&self) -> Option<&ViewId> {
        self.view_id.as_ref()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Edits not yet handed to the engine.
    pub fn pending_edits(&self) -> &[EditOp] {
        &self.pending
    }

    /// Plugins the engine reported for this view, once known.
    pub fn available_plugins(&self) -> Option<Vec<String>> {
        self.plugins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the engine-assigned view id and flush queued edits.
    ///
    /// The id is kept even if a send fails, since the engine has already
    /// opened the view. On the first assignment the view's plugin list is
    /// requested as well.
    pub fn set_view_id<S: CoreService + ?Sized>(
        &mut self,
        core: &S,
        view_id: ViewId,
    ) -> Result<(), RpcError> {
        let first_open = self.view_id.is_none();
        self.view_id = Some(view_id.clone());

        if first_open {
            let plugins = Arc::clone(&self.plugins);
            core.initial_plugins(
                &view_id,
                Box::new(move |result| match result {
                    Ok(names) => {
                        *plugins.lock().unwrap_or_else(PoisonError::into_inner) = Some(names)
                    }
                    Err(e) => debug!("No plugin list for view: {}", e),
                }),
            )?;
        }
        self.flush_pending(core)
    }

    /// Send an edit, or queue it if the view isn't open yet.
    pub fn send_edit<S: CoreService + ?Sized>(
        &mut self,
        core: &S,
        op: EditOp,
    ) -> Result<(), RpcError> {
        self.pending.push(op);
        self.flush_pending(core)
    }

    /// Send an edit as a blocking request and return the engine's answer.
    ///
    /// Unlike `send_edit` this needs the view to be open already. Queued
    /// edits are flushed first so the engine sees them in order.
    pub fn call_edit_sync<S: CoreService + ?Sized>(
        &mut self,
        core: &S,
        op: &EditOp,
    ) -> Result<Value, RpcError> {
        self.flush_pending(core)?;
        let view_id = self.view_id.as_ref().ok_or(RpcError::ViewNotOpen)?;
        core.edit_sync(view_id, op)
    }

    fn flush_pending<S: CoreService + ?Sized>(&mut self, core: &S) -> Result<(), RpcError> {
        let Some(view_id) = &self.view_id else {
            return Ok(());
        };

        let mut sent = 0;
        let result = self
            .pending
            .iter()
            .try_for_each(|op| -> Result<(), RpcError> {
                core.edit(view_id, op)?;
                sent += 1;
                Ok(())
            });
        self.pending.drain(..sent);

        if let Err(e) = &result {
            debug!(
                "Sent {} edit(s) to {}, {} still queued: {}",
                sent,
                view_id,
                self.pending.len(),
                e
            );
        }
        result
    }

    /// Save to `file_path`, which becomes the document's path.
    pub fn save<S: CoreService + ?Sized>(
        &mut self,
        core: &S,
        file_path: PathBuf,
    ) -> Result<(), RpcError> {
        let view_id = self.view_id.as_ref().ok_or(RpcError::ViewNotOpen)?;
        core.save(view_id, &file_path)?;
        self.file_path = Some(file_path);
        Ok(())
    }

    /// Close the view. Closing twice is a no-op.
    pub fn close<S: CoreService + ?Sized>(&mut self, core: &S) -> Result<(), RpcError> {
        self.pending.clear();
        match self.view_id.take() {
            Some(view_id) => core.close_view(&view_id),
            None => Ok(()),
        }
    }
}
