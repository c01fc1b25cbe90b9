//! 文件访问提供方（read / write / list）
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 逃逸与根外绝对路径）；
//! ReadFileTool / WriteFileTool / ListDirectoryTool 基于 SafeFs，打包为一个 RegistryProvider。

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tools::{RegistryProvider, Tool, ToolRegistry};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path escapes workspace: {0}")]
    PathEscape(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// 沙箱文件系统：绑定根目录
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 已存在路径：canonicalize 后检查仍在根下（顺带解开符号链接）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(FsError::PathEscape(path.to_string()))
        }
    }

    /// 可能尚不存在的路径：先按路径分量做词法归一化，再把最深的已存在祖先 canonicalize
    /// （解开其中的符号链接）后检查仍在根下，最后拼回尚不存在的部分
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, FsError> {
        let trimmed = path.trim_start_matches("./");
        let mut normalized = PathBuf::new();
        for component in self.root_dir.join(trimmed).components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(FsError::PathEscape(path.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }
        if !normalized.starts_with(&self.root_dir) || normalized == self.root_dir {
            return Err(FsError::PathEscape(path.to_string()));
        }

        let mut existing = normalized.as_path();
        let mut missing = Vec::new();
        while std::fs::symlink_metadata(existing).is_err() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(FsError::PathEscape(path.to_string())),
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|_| FsError::PathEscape(path.to_string()))?;
        if !resolved.starts_with(&self.root_dir) {
            return Err(FsError::PathEscape(path.to_string()));
        }
        for name in missing.into_iter().rev() {
            resolved.push(name);
        }
        if resolved == self.root_dir {
            return Err(FsError::PathEscape(path.to_string()));
        }
        Ok(resolved)
    }

    pub fn read_file(&self, path: &str) -> Result<String, FsError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved).map_err(|source| FsError::Io { op: "Read", source })
    }

    /// 整体覆盖写入，自动创建父目录；返回写入的字节数
    pub fn write_file(&self, path: &str, content: &str) -> Result<usize, FsError> {
        let target = self.resolve_for_write(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| FsError::Io { op: "Create directory", source })?;
        }
        std::fs::write(&target, content).map_err(|source| FsError::Io { op: "Write", source })?;
        Ok(content.len())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(|source| FsError::Io { op: "List", source })? {
            let e = e.map_err(|source| FsError::Io { op: "List", source })?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub struct ReadFileTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file inside the workspace. Args: {\"path\": \"relative or absolute path\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path").unwrap_or("");
        tracing::info!(path = %path, "read_file");
        self.fs.read_file(path).map_err(|e| e.to_string())
    }
}

pub struct WriteFileTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file inside the workspace. Args: {\"path\": \"...\", \"content\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path").ok_or("Missing 'path'")?;
        let content = str_arg(&args, "content").ok_or("Missing 'content'")?;
        tracing::info!(path = %path, bytes = content.len(), "write_file");
        let written = self.fs.write_file(path, content).map_err(|e| e.to_string())?;
        Ok(format!("Wrote {} bytes to {}", written, path))
    }
}

pub struct ListDirectoryTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace; directories end with '/'. Args: {\"path\": \"default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path").unwrap_or(".");
        tracing::info!(path = %path, "list_directory");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        Ok(entries.join("\n"))
    }
}

/// 文件族提供方
pub fn filesystem_provider(root_dir: impl AsRef<Path>, timeout: Duration) -> RegistryProvider {
    let fs = Arc::new(SafeFs::new(root_dir));
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool { fs: fs.clone() });
    registry.register(WriteFileTool { fs: fs.clone() });
    registry.register(ListDirectoryTool { fs });
    RegistryProvider::new("filesystem", registry, timeout)
}
