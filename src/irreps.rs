//! Irreducible-representation layout descriptors.
//!
//! A model's internal feature vectors decompose into blocks that transform
//! under specific rotation-group representations. The layout — an ordered
//! sequence of `(multiplicity, representation)` pairs such as
//! `"32x0e + 16x1o"` — determines tensor shapes throughout the model and is
//! the unit of bookkeeping for parameter-layout conversion.
//!
//! # Example
//!
//! ```
//! use equiparar::irreps::Irreps;
//!
//! let irreps: Irreps = "32x0e + 16x1o".parse().unwrap();
//! assert_eq!(irreps.dim(), 32 + 16 * 3);
//! assert_eq!(irreps.to_string(), "32x0e + 16x1o");
//! ```

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EquipararError;

/// Parity of an irreducible representation under inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    /// Even (gerade), written `e`
    Even,
    /// Odd (ungerade), written `o`
    Odd,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Even => write!(f, "e"),
            Parity::Odd => write!(f, "o"),
        }
    }
}

/// A single irreducible representation: angular order `l` and parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Irrep {
    /// Angular momentum order
    pub l: usize,
    /// Inversion parity
    pub parity: Parity,
}

impl Irrep {
    /// Dimension of the representation: 2l + 1.
    #[must_use]
    pub fn dim(&self) -> usize {
        2 * self.l + 1
    }

    /// Whether this is the scalar representation `0e`.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.l == 0 && self.parity == Parity::Even
    }
}

impl fmt::Display for Irrep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.l, self.parity)
    }
}

/// One layout block: `mul` copies of an irrep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MulIrrep {
    /// Multiplicity (channel count)
    pub mul: usize,
    /// The representation
    pub irrep: Irrep,
}

impl MulIrrep {
    /// Total dimension of this block: mul * (2l + 1).
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mul * self.irrep.dim()
    }
}

impl fmt::Display for MulIrrep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.mul, self.irrep)
    }
}

/// Ordered sequence of irrep blocks describing a feature layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Irreps(Vec<MulIrrep>);

impl Irreps {
    /// Build from explicit blocks.
    #[must_use]
    pub fn new(blocks: Vec<MulIrrep>) -> Self {
        Self(blocks)
    }

    /// A purely scalar layout: `mul` copies of `0e`.
    #[must_use]
    pub fn scalars(mul: usize) -> Self {
        Self(vec![MulIrrep {
            mul,
            irrep: Irrep {
                l: 0,
                parity: Parity::Even,
            },
        }])
    }

    /// The blocks in layout order.
    #[must_use]
    pub fn blocks(&self) -> &[MulIrrep] {
        &self.0
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.0.len()
    }

    /// Total feature dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.0.iter().map(MulIrrep::dim).sum()
    }

    /// Column range of each block inside the flat feature dimension.
    #[must_use]
    pub fn slices(&self) -> Vec<Range<usize>> {
        let mut out = Vec::with_capacity(self.0.len());
        let mut offset = 0;
        for block in &self.0 {
            out.push(offset..offset + block.dim());
            offset += block.dim();
        }
        out
    }

    /// Whether every block is the scalar representation `0e`.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.0.iter().all(|b| b.irrep.is_scalar())
    }
}

impl fmt::Display for Irreps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(" + "))
    }
}

impl FromStr for Irreps {
    type Err = EquipararError;

    /// Parse a layout string like `"32x0e + 16x1o"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = |message: &str| EquipararError::ParseError {
            input: s.to_string(),
            message: message.to_string(),
        };

        let mut blocks = Vec::new();
        for part in s.split('+') {
            let part = part.trim();
            if part.is_empty() {
                return Err(parse_err("empty block"));
            }

            let (mul_str, irrep_str) = part
                .split_once('x')
                .ok_or_else(|| parse_err("expected 'x' separator in block"))?;

            let mul: usize = mul_str
                .trim()
                .parse()
                .map_err(|_| parse_err("invalid multiplicity"))?;

            let irrep_str = irrep_str.trim();
            let parity = match irrep_str.chars().last() {
                Some('e') => Parity::Even,
                Some('o') => Parity::Odd,
                _ => return Err(parse_err("irrep must end in 'e' or 'o'")),
            };
            let l: usize = irrep_str[..irrep_str.len() - 1]
                .parse()
                .map_err(|_| parse_err("invalid angular order"))?;

            blocks.push(MulIrrep {
                mul,
                irrep: Irrep { l, parity },
            });
        }

        if blocks.is_empty() {
            return Err(parse_err("no blocks"));
        }
        Ok(Self(blocks))
    }
}

impl Serialize for Irreps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Irreps {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
