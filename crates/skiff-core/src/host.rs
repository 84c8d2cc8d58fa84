//! The host document and event channel collaborator.
//!
//! The evaluated program renders into a document the core shares with the
//! embedder; the core reaches it only through this trait. A recording
//! implementation is provided for tests and headless embedding.

use parking_lot::Mutex;
use serde::Serialize;

use crate::diagnostics::TranspileDiagnostic;

/// Messages emitted over the host event channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SandboxMessage {
    Resize {
        height: u32,
    },
    Success,
    Error {
        module: Option<String>,
        file_name: String,
        message: String,
    },
}

/// Capability surface over the embedding document.
pub trait Host {
    /// Send a message over the event channel.
    fn dispatch(&self, message: SandboxMessage);

    /// Replace the document body with the given markup before an entry
    /// evaluation (HMR inactive only).
    fn reset_document(&self, html: &str);

    /// Unmount root-level containers left by a DOM reconciliation library
    /// from the previous manifest.
    fn unmount_roots(&self);

    /// Request a full page reload; used when HMR cannot patch an entry.
    fn request_reload(&self);

    /// Diagnostics sink: surface a transpiler warning to the user.
    fn show_correction(&self, diagnostic: &TranspileDiagnostic);

    /// Inject a style tag attributed to a virtual path.
    fn insert_style(&self, path: &str, css: &str) {
        let _ = (path, css);
    }

    /// Remove a previously injected style tag.
    fn remove_style(&self, path: &str) {
        let _ = path;
    }

    /// Rendered document height, reported back after a successful compile.
    fn document_height(&self) -> u32 {
        0
    }
}

/// A host that drops everything; useful for analysis-only runs.
#[derive(Debug, Default)]
pub struct NullHost;

impl Host for NullHost {
    fn dispatch(&self, _message: SandboxMessage) {}
    fn reset_document(&self, _html: &str) {}
    fn unmount_roots(&self) {}
    fn request_reload(&self) {}
    fn show_correction(&self, _diagnostic: &TranspileDiagnostic) {}
}

/// A host that records every interaction, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub messages: Mutex<Vec<SandboxMessage>>,
    pub document_resets: Mutex<Vec<String>>,
    pub unmount_calls: Mutex<usize>,
    pub reload_requests: Mutex<usize>,
    pub corrections: Mutex<Vec<TranspileDiagnostic>>,
    pub styles: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SandboxMessage> {
        self.messages.lock().clone()
    }

    pub fn reload_requested(&self) -> bool {
        *self.reload_requests.lock() > 0
    }
}

impl Host for RecordingHost {
    fn dispatch(&self, message: SandboxMessage) {
        self.messages.lock().push(message);
    }

    fn reset_document(&self, html: &str) {
        self.document_resets.lock().push(html.to_string());
    }

    fn unmount_roots(&self) {
        *self.unmount_calls.lock() += 1;
    }

    fn request_reload(&self) {
        *self.reload_requests.lock() += 1;
    }

    fn show_correction(&self, diagnostic: &TranspileDiagnostic) {
        self.corrections.lock().push(diagnostic.clone());
    }

    fn insert_style(&self, path: &str, css: &str) {
        self.styles
            .lock()
            .push((path.to_string(), css.to_string()));
    }

    fn remove_style(&self, path: &str) {
        self.styles.lock().retain(|(p, _)| p != path);
    }
}
