use crate::error::StoreError;
use crate::models::Position;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Flat-file store for open positions
///
/// The whole collection is a JSON array rewritten on every mutation. Reads
/// fail soft: a missing or unreadable file is an empty collection. There is
/// no locking; one process owns the file.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all positions, empty on missing or malformed data
    pub fn load(&self) -> Vec<Position> {
        match Self::read_file(&self.path) {
            Ok(positions) => positions,
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!("Ignoring position file {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Replace the stored collection
    ///
    /// Writes a sibling temp file and renames it over the target, so readers
    /// see either the old or the new collection.
    pub fn save(&self, positions: &[Position]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(positions)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            "Saved {} positions to {}",
            positions.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn find(&self, symbol: &str) -> Option<Position> {
        self.load().into_iter().find(|p| p.symbol == symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.load().iter().any(|p| p.symbol == symbol)
    }

    /// Append one position and persist
    pub fn append(&self, position: Position) -> Result<(), StoreError> {
        let mut positions = self.load();
        positions.push(position);
        self.save(&positions)
    }

    /// Drop every record for `symbol` and persist; returns the first removed
    pub fn remove(&self, symbol: &str) -> Result<Option<Position>, StoreError> {
        let positions = self.load();
        let (removed, kept): (Vec<Position>, Vec<Position>) =
            positions.into_iter().partition(|p| p.symbol == symbol);

        if removed.is_empty() {
            return Ok(None);
        }

        self.save(&kept)?;
        Ok(removed.into_iter().next())
    }

    /// Replace the collection with the contents of another position file
    ///
    /// Unlike [`load`](Self::load) this is strict: a malformed upload is an
    /// error and the current file is left alone.
    pub fn replace_from(&self, source: &Path) -> Result<usize, StoreError> {
        let positions = Self::read_file(source)?;
        self.save(&positions)?;
        Ok(positions.len())
    }

    fn read_file(path: &Path) -> Result<Vec<Position>, StoreError> {
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|e| StoreError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionOrigin;
    use chrono::{TimeZone, Utc};

    fn position(symbol: &str, buy_price: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            buy_price,
            quantity: 0.5,
            take_profit_price: buy_price * 1.015,
            stop_loss_price: buy_price * 0.98,
            opened_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            origin: PositionOrigin::Signal,
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> PositionStore {
        PositionStore::new(dir.path().join("positions.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().is_empty());
        assert!(!store.contains("BTC/USDT"));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let positions = vec![
            position("BTC/USDT", 60000.0),
            position("ETH/USDT", 3000.0),
            Position {
                symbol: "DOGE/USDT".to_string(),
                buy_price: 0.1234567,
                quantity: 88.8,
                take_profit_price: 0.0,
                stop_loss_price: 0.0,
                opened_at: None,
                origin: PositionOrigin::Manual,
            },
        ];

        store.save(&positions).unwrap();
        assert_eq!(store.load(), positions);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_computed_prices_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let positions: Vec<Position> = (1..400)
            .map(|i| {
                let price = 0.000137 * 1.173_f64.powi(i % 60) + i as f64 / 7.0;
                Position {
                    symbol: format!("C{}/USDT", i),
                    buy_price: price,
                    quantity: 11.0 / price * 0.998,
                    take_profit_price: price * 1.015,
                    stop_loss_price: price * 0.98,
                    opened_at: None,
                    origin: PositionOrigin::Signal,
                }
            })
            .collect();

        store.save(&positions).unwrap();
        assert_eq!(store.load(), positions);
    }

    #[test]
    fn test_blocked_temp_file_fails_save_but_not_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(position("BTC/USDT", 60000.0)).unwrap();

        fs::create_dir(store.tmp_path()).unwrap();
        assert!(store.append(position("ETH/USDT", 3000.0)).is_err());
        assert!(store.remove("BTC/USDT").is_err());
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());

        fs::write(store.path(), r#"{"symbol": "BTC/USDT"}"#).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_reads_legacy_position_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        fs::write(
            store.path(),
            r#"[{"symbol": "SOL/USDT", "buy_price": 150.0, "quantity": 0.073, "tp": 152.25, "sl": 147.0}]"#,
        )
        .unwrap();

        let positions = store.load();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].take_profit_price, 152.25);
        assert_eq!(positions[0].stop_loss_price, 147.0);
        assert_eq!(positions[0].origin, PositionOrigin::Manual);
    }

    #[test]
    fn test_append_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(position("BTC/USDT", 60000.0)).unwrap();
        store.append(position("ETH/USDT", 3000.0)).unwrap();
        assert!(store.contains("ETH/USDT"));
        assert_eq!(store.find("BTC/USDT").unwrap().buy_price, 60000.0);

        let removed = store.remove("BTC/USDT").unwrap().unwrap();
        assert_eq!(removed.symbol, "BTC/USDT");
        assert_eq!(store.load().len(), 1);

        assert!(store.remove("XRP/USDT").unwrap().is_none());
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_replace_from_rejects_malformed_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(position("BTC/USDT", 60000.0)).unwrap();

        let upload = dir.path().join("upload.json");
        fs::write(&upload, "[{]").unwrap();
        assert!(matches!(
            store.replace_from(&upload),
            Err(StoreError::Malformed { .. })
        ));
        assert_eq!(store.load().len(), 1);

        let replacement = vec![position("ADA/USDT", 0.5), position("XRP/USDT", 0.6)];
        fs::write(&upload, serde_json::to_string(&replacement).unwrap()).unwrap();
        assert_eq!(store.replace_from(&upload).unwrap(), 2);
        assert_eq!(store.load(), replacement);
    }
}
