/// 挂载会话的可调参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// 打开文件表的容量
    pub max_open_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_open_files: 64 }
    }
}
