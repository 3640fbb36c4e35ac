//! server-sent events 的最小行扫描器。只关心 `data:` 行，忽略注释与事件名。

pub(crate) const DONE_SENTINEL: &str = "[DONE]";

/// 按字节块增量喂入，产出完整的 data 载荷。跨块的半行会被缓存到下一次调用。
#[derive(Debug, Default)]
pub(crate) struct SseLineScanner {
    buffer: String,
}

impl SseLineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(position) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=position).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_split_across_chunks() {
        let mut scanner = SseLineScanner::new();
        assert!(scanner.push(b"data: {\"id\":").is_empty());
        let payloads = scanner.push(b"\"x\"}\n\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec!["{\"id\":\"x\"}", "[DONE]"]);
    }

    #[test]
    fn test_crlf_and_keepalive_lines() {
        let mut scanner = SseLineScanner::new();
        let payloads = scanner.push(b": keepalive\r\ndata: {\"a\":1}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }
}
