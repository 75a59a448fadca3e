//! 文件系统辅助函数
//!
//! 提供临时文件加原子重命名的写入方式，读者永远看不到写了一半的文件。

use crate::utils::error::Result;
use crate::utils::id::temp_path_for;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// 原子写入文件
///
/// 先写入同目录下唯一命名的临时文件，再重命名覆盖目标。
/// 父目录不存在时自动创建。写入失败时尽力删除临时文件。
///
/// # Arguments
///
/// * `path` - 目标文件路径
/// * `contents` - 文件内容
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let temp = temp_path_for(path);
    if let Err(e) = tokio::fs::write(&temp, contents.as_ref()).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }

    debug!(path = %path.display(), "原子写入完成");
    Ok(())
}

/// 读取文件修改时间，文件不存在时返回 `None`
pub async fn modified_time(path: &Path) -> Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 将系统时间转换为自 UNIX 纪元起的毫秒数
pub fn system_time_millis(time: SystemTime) -> u128 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
