//! Symbol selections carried by subscribe / unsubscribe requests.

use crate::shared::Symbol;
use serde::{Deserialize, Serialize};

/// Which symbols a subscribe or unsubscribe request targets.
///
/// Wire format is untagged: a batch serializes as `{"symbols": [...]}`, a
/// single symbol as `{"symbol": "..."}`. The outer request supplies `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SymbolSelection {
    Batch { symbols: Vec<Symbol> },
    Single { symbol: Symbol },
}

impl SymbolSelection {
    pub fn batch<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        SymbolSelection::Batch {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(symbol: impl Into<Symbol>) -> Self {
        SymbolSelection::Single {
            symbol: symbol.into(),
        }
    }

    /// Symbols in request order.
    pub fn symbols(&self) -> Vec<&Symbol> {
        match self {
            SymbolSelection::Batch { symbols } => symbols.iter().collect(),
            SymbolSelection::Single { symbol } => vec![symbol],
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols().iter().any(|s| s.as_str() == symbol)
    }

    pub fn len(&self) -> usize {
        match self {
            SymbolSelection::Batch { symbols } => symbols.len(),
            SymbolSelection::Single { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
