//! 执行器使用的本地工具：shell、git、沙箱文件系统

pub mod filesystem;
pub mod git;
pub mod shell;

pub use filesystem::SafeFs;
pub use git::{GitAdapter, GitCommand};
pub use shell::{run_process, CommandOutput, ShellRunner};
