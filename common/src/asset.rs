//! Asset classes and directed conversion pairs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SwapError;

/// One of the three fungible balances an account holds.
///
/// All three are treated as 1:1 convertible; only amounts matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Asset {
    /// The exchange's native token.
    #[serde(rename = "NATIVE")]
    NativeToken,
    /// Stable asset held on the first chain.
    #[serde(rename = "STABLE-A")]
    StableA,
    /// Stable asset held on the second chain.
    #[serde(rename = "STABLE-B")]
    StableB,
}

impl Asset {
    /// All asset classes, in canonical order.
    pub const ALL: [Asset; 3] = [Asset::NativeToken, Asset::StableA, Asset::StableB];

    /// Canonical asset code.
    pub fn code(&self) -> &'static str {
        match self {
            Asset::NativeToken => "NATIVE",
            Asset::StableA => "STABLE-A",
            Asset::StableB => "STABLE-B",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Asset {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NATIVE" => Ok(Asset::NativeToken),
            "STABLE-A" => Ok(Asset::StableA),
            "STABLE-B" => Ok(Asset::StableB),
            other => Err(SwapError::validation(
                format!("Unknown asset: {other}"),
                "asset",
            )),
        }
    }
}

/// A directed conversion from one asset into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    /// Asset being given up.
    pub from: Asset,
    /// Asset being received.
    pub to: Asset,
}

impl AssetPair {
    /// Create a new pair. Same-asset conversion is rejected.
    pub fn new(from: Asset, to: Asset) -> Result<Self, SwapError> {
        if from == to {
            return Err(SwapError::validation(
                format!("Cannot convert {from} into itself"),
                "to_asset",
            ));
        }
        Ok(Self { from, to })
    }

    /// Get the inverse pair (the side this pair matches against).
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }

    /// Direction-independent key; both sides of a market share it.
    pub fn market(&self) -> (Asset, Asset) {
        if self.from <= self.to {
            (self.from, self.to)
        } else {
            (self.to, self.from)
        }
    }

    /// All six directed pairs, in reporting order.
    pub fn all() -> [AssetPair; 6] {
        use Asset::*;
        [
            AssetPair { from: NativeToken, to: StableA },
            AssetPair { from: NativeToken, to: StableB },
            AssetPair { from: StableA, to: StableB },
            AssetPair { from: StableA, to: NativeToken },
            AssetPair { from: StableB, to: StableA },
            AssetPair { from: StableB, to: NativeToken },
        ]
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}
