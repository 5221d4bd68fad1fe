use std::fmt;

use morph_core::ContentContainer;
use serde::{Deserialize, Serialize};

/// Opaque continuation token returned by `list_containers`.
///
/// Only meaningful to the store that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(pub String);

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of containers bound to a schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerPage {
    pub containers: Vec<ContentContainer>,
    /// `None` when this is the last page.
    pub next_cursor: Option<PageCursor>,
}
