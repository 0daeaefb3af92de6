use serde::{Deserialize, Serialize};

/// A form listed in a metadata table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormEntry {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavForm {
    pub id: String,
    pub table: String,
    /// Translation key, used as menu key when present.
    pub key: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSection {
    pub key: String,
    pub table: String,
    pub label: String,
    pub forms: Vec<NavForm>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub sections: Vec<NavSection>,
    /// Forms whose parent is not a menu section.
    pub uncategorized: Vec<NavForm>,
}
