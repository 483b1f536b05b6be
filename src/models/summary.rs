use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ICON: &str = "box-open";

/// Identity and display record of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub path: PathBuf,
}

/// Partial update accepted by `Collection::set_properties`. Absent or empty
/// fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryUpdate {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

impl SummaryUpdate {
    pub(crate) fn fields(&self) -> [(&'static str, Option<&str>); 3] {
        [
            ("name", non_empty(&self.name)),
            ("icon", non_empty(&self.icon)),
            ("color", non_empty(&self.color)),
        ]
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
