//! Symbol universe: sector-organized ticker lists stored as TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Tickers grouped by sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Universe {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read universe file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse universe TOML")
    }

    /// Every ticker, sectors in name order, duplicates dropped.
    pub fn symbols(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.sectors
            .values()
            .flatten()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect()
    }

    /// Tickers of one sector, if present.
    pub fn sector(&self, name: &str) -> Option<Vec<String>> {
        self.sectors
            .get(name)
            .map(|tickers| tickers.iter().map(|t| t.trim().to_uppercase()).collect())
    }

    pub fn ticker_count(&self) -> usize {
        self.sectors.values().map(Vec::len).sum()
    }

    /// A small built-in US equity universe.
    pub fn default_us() -> Self {
        let mut sectors = BTreeMap::new();
        let mut add = |name: &str, tickers: &[&str]| {
            sectors.insert(
                name.to_string(),
                tickers.iter().map(|t| t.to_string()).collect(),
            );
        };
        add(
            "Technology",
            &["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "AVGO", "CRM", "ADBE", "ORCL"],
        );
        add("Healthcare", &["JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT"]);
        add(
            "Finance",
            &["JPM", "BAC", "WFC", "GS", "MS", "BLK", "SCHW", "C", "AXP", "V"],
        );
        add("Energy", &["XOM", "CVX", "COP", "SLB", "EOG", "MPC", "PSX", "VLO"]);
        add(
            "Consumer",
            &["WMT", "PG", "KO", "PEP", "COST", "HD", "MCD", "NKE", "SBUX", "TGT"],
        );
        add("ETFs", &["SPY", "QQQ", "IWM", "DIA", "XLF", "XLE", "XLK", "XLV"]);
        Self { sectors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_universe_has_sectors() {
        let u = Universe::default_us();
        assert!(u.sectors.contains_key("Technology"));
        assert!(u.sectors.contains_key("ETFs"));
        assert_eq!(u.ticker_count(), 54);
        assert_eq!(u.symbols().len(), 54);
    }

    #[test]
    fn parses_and_normalizes() {
        let u = Universe::from_toml(
            r#"
[sectors]
Tech = ["aapl", " msft "]
Mixed = ["AAPL", "spy", ""]
"#,
        )
        .unwrap();
        // BTreeMap order: Mixed before Tech.
        assert_eq!(u.symbols(), vec!["AAPL", "SPY", "MSFT"]);
        assert_eq!(u.sector("Tech"), Some(vec!["AAPL".to_string(), "MSFT".to_string()]));
        assert_eq!(u.sector("Utilities"), None);
    }

    #[test]
    fn from_file_reports_path() {
        let err = Universe::from_file(Path::new("/no/such/universe.toml")).unwrap_err();
        assert!(err.to_string().contains("universe.toml"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.toml");
        std::fs::write(&path, "[sectors]\nEnergy = [\"XOM\", \"CVX\"]\n").unwrap();
        let u = Universe::from_file(&path).unwrap();
        assert_eq!(u.symbols(), vec!["XOM", "CVX"]);
    }
}
