//! 沙箱文件系统
//!
//! SafeFs 绑定工作根目录，所有路径先按词法规整再校验必须在根下（禁止 ../ 逃逸）；
//! 已存在的路径额外按真实路径校验，防止符号链接指向根外。
//! 写入时自动创建中间目录；失败统一为带解析后路径的 Io 错误。

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::core::AgentError;

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

    /// 解析为根目录下的绝对路径
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let requested = Path::new(path.trim());
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root_dir.join(requested)
        };
        let resolved = normalize(&joined);

        if !resolved.starts_with(&self.root_dir) {
            return Err(escape(resolved));
        }
        if let Ok(real) = resolved.canonicalize() {
            if !real.starts_with(&self.root_dir) {
                return Err(escape(resolved));
            }
        }
        Ok(resolved)
    }

    pub fn read_file(&self, path: &str) -> Result<(PathBuf, String), AgentError> {
        let resolved = self.resolve(path)?;
        let content = std::fs::read_to_string(&resolved).map_err(|e| AgentError::io(&resolved, e))?;
        Ok((resolved, content))
    }

    /// 写入文件，返回解析后路径与写入字节数
    pub fn write_file(&self, path: &str, content: &str) -> Result<(PathBuf, usize), AgentError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::io(parent, e))?;
        }
        std::fs::write(&resolved, content).map_err(|e| AgentError::io(&resolved, e))?;
        Ok((resolved, content.len()))
    }
}

fn escape(path: PathBuf) -> AgentError {
    AgentError::io(
        path,
        io::Error::new(io::ErrorKind::PermissionDenied, "path escapes the working root"),
    )
}

/// 词法规整：去掉 `.`，`..` 回退一级（不访问文件系统）
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
