use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static RE_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]+").expect("failed to build regex"));

/// 将向量转换为小端序字节
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice(vector).to_vec()
    } else {
        vector.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// 将小端序字节还原为向量，长度不是 4 的倍数时返回 None
pub fn bytes_to_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    if cfg!(target_endian = "little") {
        // NOTE: blob 不保证 4 字节对齐，不能直接 cast_slice
        Some(bytemuck::pod_collect_to_vec(bytes))
    } else {
        Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }
}

/// 根据逗号分隔的后缀名列表构建匹配正则，忽略大小写
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$"))
}

/// 返回文件的后缀名
pub fn extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|ext| ext.to_str())
}

/// 清理上传的文件名，只保留最后一级路径中的安全字符
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = RE_UNSAFE.replace_all(base.trim(), "_");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() { "unnamed".to_string() } else { cleaned.to_string() }
}
