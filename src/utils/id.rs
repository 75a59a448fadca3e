//! 临时文件标识生成
//!
//! 生成产物和状态文件都先写入同目录下的临时文件再原子重命名。
//! 临时文件名带一个 10 位 62 进制后缀，保证并发写入者互不覆盖。

use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 后缀长度
const SUFFIX_LENGTH: usize = 10;

/// 临时文件扩展名
pub const TEMP_EXTENSION: &str = "tmp";

/// 生成 10 位 62 进制后缀
///
/// 时间戳与随机数异或后编码，进程内外都足够唯一。
///
/// # 示例
///
/// ```
/// use mosaic_core::utils::id::generate_suffix;
///
/// let suffix = generate_suffix();
/// assert_eq!(suffix.len(), 10);
/// ```
pub fn generate_suffix() -> String {
    let mut rng = rand::thread_rng();

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let mut value = timestamp ^ rng.gen::<u64>();

    let mut result = String::with_capacity(SUFFIX_LENGTH);
    for _ in 0..SUFFIX_LENGTH {
        result.push(BASE62_CHARS[(value % 62) as usize] as char);
        value /= 62;
    }
    result
}

/// 为目标文件生成同目录下的临时文件路径
///
/// 形如 `Product.json.a1B2c3D4e5.tmp`，与目标位于同一文件系统，
/// 重命名因此是原子的。
///
/// # Arguments
///
/// * `target` - 最终写入的文件路径
pub fn temp_path_for(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(
        "{}.{}.{}",
        file_name,
        generate_suffix(),
        TEMP_EXTENSION
    ))
}

/// 判断路径是否为本模块生成的临时文件
pub fn is_temp_path(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    let Some(stem) = name.strip_suffix(&format!(".{}", TEMP_EXTENSION)) else {
        return false;
    };
    match stem.rsplit_once('.') {
        Some((_, suffix)) => {
            suffix.len() == SUFFIX_LENGTH && suffix.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}
