pub mod extract;

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::graph::resource::{Resource, ResourceKind};
use crate::graph::ResourceGraph;
use crate::template::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Where a candidate value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceOrigin {
    /// `KEY=value` style declaration, including template environment variables.
    #[serde(rename = "env-declaration")]
    EnvDeclaration,
    /// A quoted string literal in code.
    #[serde(rename = "literal-in-code")]
    Literal,
}

/// A candidate value attributed to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExtract {
    pub origin: SourceOrigin,
    pub key: Option<String>,
    pub value: String,
    pub file: String,
    /// `None` for template environment entries.
    pub line: Option<usize>,
}

/// Candidate values per resource id. Built once, read by rules.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    extracts: BTreeMap<String, Vec<SourceExtract>>,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

/// A function and the directories whose files it owns.
struct CodeOwner<'a> {
    id: &'a str,
    code_dir: Option<PathBuf>,
    code_name: Option<String>,
}

impl SourceIndex {
    /// Walk every root, extract candidates and attribute them to functions.
    ///
    /// Template environment blocks are merged in as `env-declaration` extracts.
    pub fn build(graph: &ResourceGraph, roots: &[PathBuf], config: &ScanConfig) -> Result<Self> {
        let mut index = SourceIndex::default();
        index.merge_template_environment(graph);

        let template_dir = Path::new(&graph.source_file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let functions = graph.resources_of_kind(ResourceKind::Function);
        let owners: Vec<CodeOwner> = functions
            .iter()
            .map(|f| code_owner(f, &template_dir))
            .collect();

        for root in roots {
            index.scan_root(root, &owners, config)?;
        }

        info!(
            files = index.files_scanned,
            skipped = index.files_skipped,
            "source scan complete"
        );
        Ok(index)
    }

    /// Extracts for a resource id. Empty when the resource has no source.
    pub fn for_resource(&self, id: &str) -> &[SourceExtract] {
        self.extracts.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All `(resource id, extracts)` pairs, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SourceExtract])> {
        self.extracts.iter().map(|(id, e)| (id.as_str(), e.as_slice()))
    }

    pub fn total(&self) -> usize {
        self.extracts.values().map(Vec::len).sum()
    }

    pub fn push(&mut self, resource_id: &str, extract: SourceExtract) {
        self.extracts
            .entry(resource_id.to_string())
            .or_default()
            .push(extract);
    }

    fn merge_template_environment(&mut self, graph: &ResourceGraph) {
        for function in graph.resources_of_kind(ResourceKind::Function) {
            let Some(vars) = function
                .property_path(&["Environment", "Variables"])
                .and_then(PropertyValue::as_map)
            else {
                continue;
            };
            for (key, value) in vars {
                if value.is_reference() {
                    debug!(resource = %function.id, key = %key, "skipping referenced env value");
                    continue;
                }
                let Some(text) = value.as_str() else {
                    continue;
                };
                self.push(
                    &function.id,
                    SourceExtract {
                        origin: SourceOrigin::EnvDeclaration,
                        key: Some(key.clone()),
                        value: text.to_string(),
                        file: graph.source_file.clone(),
                        line: None,
                    },
                );
            }
        }
    }

    fn scan_root(&mut self, root: &Path, owners: &[CodeOwner], config: &ScanConfig) -> Result<()> {
        if !root.is_dir() {
            return Err(ScanError::source_read(root, "not a readable directory"));
        }
        let pattern = format!("{}/**/*", root.display());
        let entries = glob::glob(&pattern)
            .map_err(|e| ScanError::source_read(root, format!("invalid path pattern: {}", e)))?;

        let canonical_root = canonical(root);
        let root_name = last_component(root);
        let fallback_id = format!("source:{}", root.display());

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "unreadable entry in source tree");
                    self.files_skipped += 1;
                    continue;
                }
            };
            if !path.is_file() || is_excluded(&path, root, &config.source.exclude_dirs) {
                continue;
            }
            let Some(content) = self.read_text(&path, config.source.max_file_bytes) else {
                continue;
            };

            let canonical_path = canonical(&path);
            let mut claimed: Vec<&str> = owners
                .iter()
                .filter(|o| {
                    o.code_dir
                        .as_ref()
                        .is_some_and(|dir| canonical_path.starts_with(dir))
                        || (o.code_name.is_some()
                            && o.code_name == root_name
                            && canonical_path.starts_with(&canonical_root))
                })
                .map(|o| o.id)
                .collect();
            if claimed.is_empty() {
                claimed.push(&fallback_id);
            }

            let file = path.display().to_string();
            let mut found = 0;
            for (n, line) in content.lines().enumerate() {
                for candidate in extract::extract_line(line, config.secrets.min_literal_length) {
                    found += 1;
                    for id in &claimed {
                        self.push(
                            id,
                            SourceExtract {
                                origin: candidate.origin,
                                key: candidate.key.clone(),
                                value: candidate.value.clone(),
                                file: file.clone(),
                                line: Some(n + 1),
                            },
                        );
                    }
                }
            }
            self.files_scanned += 1;
            debug!(file = %file, owners = ?claimed, candidates = found, "scanned source file");
        }
        Ok(())
    }

    /// Read a file as UTF-8 text, skipping oversized and binary files.
    fn read_text(&mut self, path: &Path, max_bytes: u64) -> Option<String> {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size > max_bytes {
            debug!(file = %path.display(), size, "skipping oversized file");
            self.files_skipped += 1;
            return None;
        }
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot read source file");
                self.files_skipped += 1;
                return None;
            }
        };
        if bytes.contains(&0) {
            self.files_skipped += 1;
            return None;
        }
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                self.files_skipped += 1;
                None
            }
        }
    }
}

fn code_owner<'a>(function: &'a Resource, template_dir: &Path) -> CodeOwner<'a> {
    let code_uri = function
        .property("CodeUri")
        .and_then(PropertyValue::as_str)
        .filter(|uri| !uri.contains("://"));
    CodeOwner {
        id: &function.id,
        code_dir: code_uri.map(|uri| canonical(&template_dir.join(uri))),
        code_name: code_uri.and_then(|uri| last_component(Path::new(uri))),
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn last_component(path: &Path) -> Option<String> {
    path.components().rev().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().to_string()),
        _ => None,
    })
}

fn is_excluded(path: &Path, root: &Path, exclude_dirs: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => exclude_dirs
            .iter()
            .any(|d| name.to_str() == Some(d.as_str())),
        _ => false,
    })
}
