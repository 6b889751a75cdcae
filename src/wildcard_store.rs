use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::RwLock;

type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// 已确认的泛解析IP集合
///
/// 跨任务并发共享。除了本次运行判定出的泛解析IP，
/// 还可以从文件预载历史运行积累的IP，省掉重复判定。
#[derive(Debug, Default)]
pub struct WildcardStore {
    wildcards: RwLock<HashSet<String>>,
}

impl WildcardStore {
    /// 创建空集合
    pub fn new() -> Self {
        WildcardStore::default()
    }

    /// 标记一个IP为泛解析
    pub fn set(&self, ip: &str) {
        self.wildcards.write().unwrap().insert(ip.to_string());
    }

    /// 判断IP是否已标记
    pub fn has(&self, ip: &str) -> bool {
        self.wildcards.read().unwrap().contains(ip)
    }

    /// 移除一个IP
    pub fn delete(&self, ip: &str) {
        self.wildcards.write().unwrap().remove(ip);
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.wildcards.read().unwrap().is_empty()
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.wildcards.read().unwrap().len()
    }

    /// 清空集合
    pub fn clear(&self) {
        self.wildcards.write().unwrap().clear();
    }

    /// 遍历当前快照
    ///
    /// 在集合副本上遍历，不持锁回调，回调里允许再操作集合。
    pub fn iterate<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&str) -> Result<(), StoreError>,
    {
        let snapshot: Vec<String> = self.wildcards.read().unwrap().iter().cloned().collect();
        for ip in &snapshot {
            f(ip)?;
        }
        Ok(())
    }

    /// 集合快照
    pub fn snapshot(&self) -> HashSet<String> {
        self.wildcards.read().unwrap().clone()
    }

    /// 保存到文件，每行一个IP，空集合视为错误
    pub fn save_to_file(&self, path: &Path) -> Result<(), StoreError> {
        if self.is_empty() {
            return Err("泛解析IP集合为空".into());
        }

        let file = File::create(path)
            .map_err(|e| format!("无法创建泛解析IP文件 {}: {}", path.display(), e))?;
        let mut writer = BufWriter::new(file);
        self.iterate(|ip| {
            writeln!(writer, "{}", ip)?;
            Ok(())
        })?;
        writer.flush()?;
        Ok(())
    }

    /// 从文件追加加载，空行跳过
    pub fn load_from_file(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::open(path)
            .map_err(|e| format!("无法打开泛解析IP文件 {}: {}", path.display(), e))?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            let ip = line.trim();
            if ip.is_empty() {
                continue;
            }
            self.set(ip);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_has_delete() {
        let store = WildcardStore::new();
        assert!(store.is_empty());

        store.set("1.2.3.4");
        store.set("1.2.3.4");
        assert!(store.has("1.2.3.4"));
        assert_eq!(store.len(), 1);

        store.delete("1.2.3.4");
        assert!(!store.has("1.2.3.4"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear() {
        let store = WildcardStore::new();
        store.set("1.2.3.4");
        store.set("5.6.7.8");
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_empty_is_error() {
        let store = WildcardStore::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(store.save_to_file(&dir.path().join("wildcards.txt")).is_err());
    }

    #[test]
    fn test_save_clear_load_round_trip() {
        let store = WildcardStore::new();
        store.set("1.2.3.4");
        store.set("5.6.7.8");
        let original = store.snapshot();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wildcards.txt");
        store.save_to_file(&path).unwrap();

        store.clear();
        store.load_from_file(&path).unwrap();
        assert_eq!(store.snapshot(), original);
    }

    #[test]
    fn test_load_appends() {
        let store = WildcardStore::new();
        store.set("9.9.9.9");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wildcards.txt");
        std::fs::write(&path, "1.2.3.4\n\n5.6.7.8\n").unwrap();

        store.load_from_file(&path).unwrap();
        assert_eq!(store.len(), 3);
        assert!(store.has("9.9.9.9"));
        assert!(store.has("1.2.3.4"));
        assert!(store.has("5.6.7.8"));
    }
}
