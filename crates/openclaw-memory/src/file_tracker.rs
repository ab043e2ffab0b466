//! 文件指纹
//!
//! 计算文件内容的 SHA-256 指纹与内容预览，并维护一个按路径、按 Agent 的指纹缓存。
//! 缓存只用于加速，权威数据始终是存储中的 FileVersion 日志。

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::RwLock;

const CHUNK_SIZE: usize = 8192;

/// 流式计算 SHA-256 指纹, 文件不可读时返回 `None`
pub fn compute_checksum(path: &Path) -> Option<String> {
    fingerprint(path, 0).map(|(checksum, _)| checksum)
}

/// 一次读取同时得到指纹与开头最多 `max_chars` 个字符的预览，两者来自同一份内容
pub fn fingerprint(path: &Path, max_chars: usize) -> Option<(String, String)> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    // UTF-8 单个字符最多 4 字节
    let budget = max_chars.saturating_mul(4);
    let mut prefix = Vec::with_capacity(budget.min(CHUNK_SIZE));

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
                if prefix.len() < budget {
                    let take = n.min(budget - prefix.len());
                    prefix.extend_from_slice(&buffer[..take]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return None,
        }
    }

    let preview = String::from_utf8_lossy(&prefix)
        .chars()
        .take(max_chars)
        .collect();
    Some((format!("{:x}", hasher.finalize()), preview))
}

/// 路径 → Agent → 指纹
#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: &str, agent: &str, checksum: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(path.to_string())
            .or_default()
            .insert(agent.to_string(), checksum.to_string());
    }

    pub fn get(&self, path: &str, agent: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(path).and_then(|agents| agents.get(agent)).cloned()
    }

    pub fn agents_for(&self, path: &str) -> HashMap<String, String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(path).cloned().unwrap_or_default()
    }

    /// 缓存里该路径是否已有多个不同指纹
    pub fn is_divergent(&self, path: &str) -> bool {
        let agents = self.agents_for(path);
        let mut checksums: Vec<&String> = agents.values().collect();
        checksums.sort();
        checksums.dedup();
        checksums.len() > 1
    }

    pub fn forget(&self, path: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(path);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
