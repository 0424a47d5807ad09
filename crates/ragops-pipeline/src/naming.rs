//! Collection and alias naming.

/// Derives backend names from `(index, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNaming {
    prefix: String,
}

impl IndexNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `{prefix}_{index}_v{version}`
    pub fn collection_name(&self, index: &str, version: u32) -> String {
        format!("{}_{}_v{}", self.prefix, index, version)
    }

    /// `{prefix}_{index}_active`
    pub fn alias_name(&self, index: &str) -> String {
        format!("{}_{}_active", self.prefix, index)
    }
}

impl Default for IndexNaming {
    fn default() -> Self {
        Self::new("demo")
    }
}
