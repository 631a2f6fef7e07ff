use crate::models::LivePrice;
use std::collections::HashMap;
use std::sync::RwLock;

/// Latest pushed price per stock code.
///
/// Updated one tick at a time and never cleared wholesale; independent of the
/// ranking pages.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: RwLock<HashMap<String, LivePrice>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `tick.stock_code`.
    pub fn apply(&self, tick: LivePrice) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(tick.stock_code.clone(), tick);
    }

    pub fn get(&self, code: &str) -> Option<LivePrice> {
        self.prices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(code)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, sorted by code.
    pub fn snapshot(&self) -> Vec<LivePrice> {
        let mut all: Vec<LivePrice> = self
            .prices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.stock_code.cmp(&b.stock_code));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(code: &str, price: f64) -> LivePrice {
        LivePrice {
            stock_code: code.to_string(),
            price,
            change_rate: Some("0.5".into()),
            prev_day_compare: None,
        }
    }

    #[test]
    fn test_unknown_code_adds_entry_and_known_code_overwrites() {
        let book = PriceBook::new();
        book.apply(tick("005930", 78_000.0));
        book.apply(tick("000660", 182_000.0));
        book.apply(tick("005930", 78_400.0));

        assert_eq!(book.len(), 2);
        assert_eq!(book.get("005930").map(|p| p.price), Some(78_400.0));
        assert!(book.get("035420").is_none());

        let codes: Vec<String> = book.snapshot().into_iter().map(|p| p.stock_code).collect();
        assert_eq!(codes, vec!["000660", "005930"]);
    }
}
