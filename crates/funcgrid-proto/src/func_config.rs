//! Function config registry.
//!
//! Loaded once at gateway startup from a JSON file:
//!
//! ```json
//! [
//!     {"funcName": "echo", "funcId": 7},
//!     {"funcName": "grpc:foo.Bar", "funcId": 8, "grpcMethods": ["Baz"]}
//! ]
//! ```
//!
//! Entries are immutable after load. gRPC services are registered under
//! the `grpc:` prefix; their callable methods live in `grpc_methods`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub const GRPC_FUNC_PREFIX: &str = "grpc:";
const MAX_FUNC_ID: u16 = 1024;

/// Errors from loading or validating the function config file.
#[derive(Debug, Error)]
pub enum FuncConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid entry {func_name:?}: {reason}")]
    InvalidEntry { func_name: String, reason: String },

    #[error("duplicate function name {0:?}")]
    DuplicateName(String),

    #[error("duplicate func_id {0}")]
    DuplicateId(u16),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    func_name: String,
    func_id: u16,
    #[serde(default)]
    grpc_methods: Vec<String>,
}

/// One registered function.
#[derive(Debug, Clone)]
pub struct FuncEntry {
    pub func_name: String,
    pub func_id: u16,
    pub grpc_methods: HashSet<String>,
}

impl FuncEntry {
    pub fn is_grpc_service(&self) -> bool {
        self.func_name.starts_with(GRPC_FUNC_PREFIX)
    }

    pub fn has_grpc_method(&self, method: &str) -> bool {
        self.grpc_methods.contains(method)
    }
}

/// Static name → function mapping, loaded once at startup.
#[derive(Debug, Default)]
pub struct FuncConfig {
    entries: Vec<FuncEntry>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u16, usize>,
}

impl FuncConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FuncConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, FuncConfigError> {
        let raw: Vec<RawEntry> = serde_json::from_str(contents)?;
        let mut config = Self::default();
        for entry in raw {
            config.insert(entry)?;
        }
        Ok(config)
    }

    fn insert(&mut self, raw: RawEntry) -> Result<(), FuncConfigError> {
        if raw.func_name.is_empty() {
            return Err(FuncConfigError::InvalidEntry {
                func_name: raw.func_name,
                reason: "empty function name".to_string(),
            });
        }
        if raw.func_id == 0 || raw.func_id >= MAX_FUNC_ID {
            return Err(FuncConfigError::InvalidEntry {
                func_name: raw.func_name,
                reason: format!("func_id must be within [1, {MAX_FUNC_ID})"),
            });
        }
        let is_grpc = raw.func_name.starts_with(GRPC_FUNC_PREFIX);
        if is_grpc && raw.grpc_methods.is_empty() {
            return Err(FuncConfigError::InvalidEntry {
                func_name: raw.func_name,
                reason: "gRPC service entry carries no methods".to_string(),
            });
        }
        if !is_grpc && !raw.grpc_methods.is_empty() {
            return Err(FuncConfigError::InvalidEntry {
                func_name: raw.func_name,
                reason: "grpcMethods given for a non-gRPC entry".to_string(),
            });
        }
        if self.by_name.contains_key(&raw.func_name) {
            return Err(FuncConfigError::DuplicateName(raw.func_name));
        }
        if self.by_id.contains_key(&raw.func_id) {
            return Err(FuncConfigError::DuplicateId(raw.func_id));
        }
        let index = self.entries.len();
        self.by_name.insert(raw.func_name.clone(), index);
        self.by_id.insert(raw.func_id, index);
        self.entries.push(FuncEntry {
            func_name: raw.func_name,
            func_id: raw.func_id,
            grpc_methods: raw.grpc_methods.into_iter().collect(),
        });
        Ok(())
    }

    pub fn find_by_func_name(&self, func_name: &str) -> Option<&FuncEntry> {
        self.by_name.get(func_name).map(|&i| &self.entries[i])
    }

    pub fn find_by_func_id(&self, func_id: u16) -> Option<&FuncEntry> {
        self.by_id.get(&func_id).map(|&i| &self.entries[i])
    }

    /// Lookup for a gRPC call: `service` without the `grpc:` prefix.
    pub fn find_grpc_service(&self, service: &str) -> Option<&FuncEntry> {
        self.find_by_func_name(&format!("{GRPC_FUNC_PREFIX}{service}"))
    }

    pub fn entries(&self) -> &[FuncEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {"funcName": "echo", "funcId": 7},
        {"funcName": "grpc:foo.Bar", "funcId": 8, "grpcMethods": ["Baz", "Qux"]}
    ]"#;

    #[test]
    fn loads_and_indexes_entries() {
        let config = FuncConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.entries().len(), 2);

        let echo = config.find_by_func_name("echo").unwrap();
        assert_eq!(echo.func_id, 7);
        assert!(!echo.is_grpc_service());

        let svc = config.find_grpc_service("foo.Bar").unwrap();
        assert_eq!(svc.func_id, 8);
        assert!(svc.has_grpc_method("Baz"));
        assert!(!svc.has_grpc_method("Missing"));

        assert_eq!(config.find_by_func_id(7).unwrap().func_name, "echo");
        assert!(config.find_by_func_name("nope").is_none());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = FuncConfig::load(file.path()).unwrap();
        assert!(config.find_by_func_name("echo").is_some());
    }

    #[test]
    fn rejects_duplicate_names_and_ids() {
        let dup_name = r#"[
            {"funcName": "echo", "funcId": 1},
            {"funcName": "echo", "funcId": 2}
        ]"#;
        assert!(matches!(
            FuncConfig::from_json(dup_name),
            Err(FuncConfigError::DuplicateName(_))
        ));

        let dup_id = r#"[
            {"funcName": "a", "funcId": 1},
            {"funcName": "b", "funcId": 1}
        ]"#;
        assert!(matches!(
            FuncConfig::from_json(dup_id),
            Err(FuncConfigError::DuplicateId(1))
        ));
    }

    #[test]
    fn rejects_out_of_range_func_id() {
        let zero = r#"[{"funcName": "a", "funcId": 0}]"#;
        assert!(matches!(
            FuncConfig::from_json(zero),
            Err(FuncConfigError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn rejects_grpc_entry_without_methods() {
        let bad = r#"[{"funcName": "grpc:foo.Bar", "funcId": 1}]"#;
        assert!(matches!(
            FuncConfig::from_json(bad),
            Err(FuncConfigError::InvalidEntry { .. })
        ));
    }
}
