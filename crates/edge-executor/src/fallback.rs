//! Placeholder and error output for slots without content.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use edge_core::{FragmentDescriptor, FragmentError};

/// Renders the hold for a pending slot.
pub type PlaceholderRenderer = Arc<dyn Fn(&FragmentDescriptor) -> Bytes + Send + Sync>;

/// Renders the content of a failed slot.
pub type ErrorRenderer = Arc<dyn Fn(&FragmentDescriptor, &FragmentError) -> Bytes + Send + Sync>;

/// Caller-supplied renderers for slots that have no fragment content.
#[derive(Clone)]
pub struct Fallbacks {
    pub placeholder: PlaceholderRenderer,
    pub error: ErrorRenderer,
}

impl Fallbacks {
    /// Create fallbacks from two closures.
    pub fn new<P, E>(placeholder: P, error: E) -> Self
    where
        P: Fn(&FragmentDescriptor) -> Bytes + Send + Sync + 'static,
        E: Fn(&FragmentDescriptor, &FragmentError) -> Bytes + Send + Sync + 'static,
    {
        Self {
            placeholder: Arc::new(placeholder),
            error: Arc::new(error),
        }
    }

    /// Empty placeholders and an escaped HTML error box.
    pub fn html() -> Self {
        Self::new(
            |_| Bytes::new(),
            |descriptor, err| {
                Bytes::from(format!(
                    r#"<div class="fragment-error" data-fragment="{}">Failed to load {}: {}</div>"#,
                    html_escape(&descriptor.id),
                    html_escape(&descriptor.id),
                    html_escape(&err.to_string())
                ))
            },
        )
    }

    /// Placeholder output for a slot.
    pub fn render_placeholder(&self, descriptor: &FragmentDescriptor) -> Bytes {
        (self.placeholder)(descriptor)
    }

    /// Error output for a slot.
    pub fn render_error(&self, descriptor: &FragmentDescriptor, err: &FragmentError) -> Bytes {
        (self.error)(descriptor, err)
    }
}

impl Default for Fallbacks {
    fn default() -> Self {
        Self::html()
    }
}

impl fmt::Debug for Fallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallbacks").finish_non_exhaustive()
    }
}

/// Simple HTML escape for error messages.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
