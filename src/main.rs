//! xi-frontend - headless client for the xi engine.
//!
//! Spawns the engine, opens a view (optionally on a file), fills the first
//! window of lines by requesting whatever the line cache reports missing,
//! prints them and closes the view.
//!
//! ```text
//! xi-frontend [FILE]
//! ```

use std::collections::HashSet;
use std::io::{self, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xi_frontend::commands::{CoreService, EditOp};
use xi_frontend::config::Config;
use xi_frontend::document::Document;
use xi_frontend::frontend::{Frontend, FrontendEvent, StyleMap, ViewRegistry};
use xi_frontend::protocol::ViewId;
use xi_frontend::rpc::CoreConnection;

fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    info!("Starting xi-frontend v{}", env!("CARGO_PKG_VERSION"));
    match &config.source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    let file_path = std::env::args_os().nth(1).map(PathBuf::from);

    let views = ViewRegistry::new();
    let styles = StyleMap::new();
    let (event_tx, event_rx) = mpsc::channel();
    let frontend = Frontend::new(views.clone(), styles, event_tx);

    let conn = CoreConnection::spawn(&config.core_path, frontend)
        .with_context(|| format!("Could not start engine at {}", config.core_path.display()))?;

    let mut doc = Document::new(file_path);
    let view_id = conn
        .new_view(doc.file_path())
        .context("Engine did not open a view")?;
    views.open(view_id.clone());
    doc.set_view_id(&conn, view_id.clone())?;
    doc.send_edit(
        &conn,
        EditOp::Scroll {
            first: 0,
            last: config.window_lines,
        },
    )?;

    let mut requested: HashSet<Range<usize>> = HashSet::new();
    loop {
        match event_rx.recv_timeout(config.idle_timeout()) {
            Ok(FrontendEvent::Updated { view_id: id, height }) if id == view_id => {
                let missing = missing_in_window(&views, &view_id, config.window_lines);
                debug!("View {} height {}, missing {:?}", id, height, missing);
                if missing.is_empty() {
                    print_window(&views, &view_id, config.window_lines)?;
                    break;
                }
                for range in missing {
                    if requested.insert(range.clone()) {
                        doc.send_edit(
                            &conn,
                            EditOp::RequestLines {
                                first: range.start,
                                last: range.end,
                            },
                        )?;
                    }
                }
            }
            Ok(FrontendEvent::Alert(msg)) => eprintln!("xi: {}", msg),
            Ok(other) => debug!("Ignoring event {:?}", other),
            Err(RecvTimeoutError::Timeout) => {
                warn!("No update from engine within {:?}", config.idle_timeout());
                print_window(&views, &view_id, config.window_lines)?;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Engine connection closed");
                break;
            }
        }
    }

    views.close(&view_id);
    if !conn.is_closed() {
        doc.close(&conn)?;
    }
    Ok(())
}

fn missing_in_window(views: &ViewRegistry, view_id: &ViewId, window: usize) -> Vec<Range<usize>> {
    views
        .with_view(view_id, |cache| {
            if cache.height() == 0 {
                Vec::new()
            } else {
                cache.compute_missing(0, window)
            }
        })
        .unwrap_or_default()
}

/// Print the first `window` lines; unfetched lines show as `~`.
fn print_window(views: &ViewRegistry, view_id: &ViewId, window: usize) -> Result<()> {
    let rendered: Vec<String> = views
        .with_view(view_id, |cache| {
            (0..cache.height().min(window))
                .map(|ix| match cache.get(ix) {
                    Some(line) => line.text().trim_end_matches('\n').to_string(),
                    None => "~".to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let mut out = io::stdout().lock();
    for line in rendered {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}
