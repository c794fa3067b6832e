use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

use crate::error::{BridgeError, Result};

lazy_static! {
    // CSI 序列，例如 \x1b[32m、\x1b[2K
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap();
}

/// 去掉 ANSI 颜色/控制序列
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// 从命令输出中提取 JSON 数组
///
/// pm2 可能在 JSON 前后输出 banner、日志行或颜色序列。先去掉 ANSI 序列（合法 JSON 字符串里
/// 不可能出现原始 ESC 字符），再截取第一个 `[` 到最后一个 `]` 之间的内容解析。
/// 已知限制：数组前后的噪声里不能再出现方括号。
pub fn extract_json_array(raw: &str) -> Result<Vec<serde_json::Value>> {
    let cleaned = strip_ansi(raw);

    let (start, end) = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            log::error!("No JSON array found in supervisor output");
            log::debug!("Raw supervisor output: {:?}", raw);
            return Err(BridgeError::MalformedOutput(
                "no JSON array delimiters in output".to_string(),
            ));
        }
    };

    serde_json::from_str::<Vec<serde_json::Value>>(&cleaned[start..=end]).map_err(|e| {
        log::error!("Failed to parse supervisor output: {}", e);
        log::debug!("Raw supervisor output: {:?}", raw);
        BridgeError::MalformedOutput(e.to_string())
    })
}
