//! Width multipliers and the active width.
//!
//! A slimmable model is built once for the widest configuration. Every
//! forward pass is told which width to run at through a [`Width`], which is
//! obtained from the model's [`WidthMults`] and indexes the per-width slices,
//! statistics and layer copies.

use burn::config::Config;

use crate::error::{Error, Result};

const MULT_TOLERANCE: f64 = 1e-9;

#[derive(Config, Debug, PartialEq)]
pub struct WidthConfig {
    #[config(default = "vec![0.25, 0.5, 0.75, 1.0]")]
    pub width_mult_list: Vec<f64>,
}
impl WidthConfig {
    pub fn init(&self) -> Result<WidthMults> {
        WidthMults::new(self.width_mult_list.clone())
    }
}

/// Validated, ordered list of width multipliers.
#[derive(Debug, Clone, PartialEq)]
pub struct WidthMults {
    mults: Vec<f64>,
}

impl WidthMults {
    pub fn new(mults: Vec<f64>) -> Result<Self> {
        if mults.is_empty() {
            return Err(Error::EmptyWidthList);
        }
        for (i, &mult) in mults.iter().enumerate() {
            if !mult.is_finite() || mult <= 0.0 || mult > 1.0 {
                return Err(Error::InvalidWidthMult(mult));
            }
            if mults[..i]
                .iter()
                .any(|other| (other - mult).abs() < MULT_TOLERANCE)
            {
                return Err(Error::DuplicateWidthMult(mult));
            }
        }

        Ok(Self { mults })
    }

    pub fn len(&self) -> usize {
        self.mults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mults.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.mults
    }

    pub fn select(&self, mult: f64) -> Result<Width> {
        self.mults
            .iter()
            .position(|m| (m - mult).abs() < MULT_TOLERANCE)
            .map(|index| Width {
                index,
                mult: self.mults[index],
            })
            .ok_or(Error::UnknownWidth(mult))
    }

    pub fn at(&self, index: usize) -> Result<Width> {
        self.mults
            .get(index)
            .map(|&mult| Width { index, mult })
            .ok_or(Error::WidthIndex {
                index,
                len: self.mults.len(),
            })
    }

    /// The widest configured width, the one a freshly built model runs at.
    pub fn max(&self) -> Width {
        self.extreme(|a, b| a > b)
    }

    pub fn min(&self) -> Width {
        self.extreme(|a, b| a < b)
    }

    fn extreme(&self, better: impl Fn(f64, f64) -> bool) -> Width {
        let mut best = Width {
            index: 0,
            mult: self.mults[0],
        };
        for (index, &mult) in self.mults.iter().enumerate().skip(1) {
            if better(mult, best.mult) {
                best = Width { index, mult };
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = Width> + '_ {
        self.mults
            .iter()
            .enumerate()
            .map(|(index, &mult)| Width { index, mult })
    }

    /// Channel count of a layer with `base` channels at every width.
    pub fn channels(&self, layer: &'static str, base: usize) -> Result<Vec<usize>> {
        self.iter()
            .map(|width| match width.scale(base) {
                0 => Err(Error::ZeroChannels {
                    layer,
                    base,
                    mult: width.mult,
                }),
                channels => Ok(channels),
            })
            .collect()
    }

    /// The same count at every width, for inputs/outputs that never slim.
    pub fn fixed(&self, channels: usize) -> Vec<usize> {
        vec![channels; self.len()]
    }
}

/// One entry of a [`WidthMults`] list. Only a `WidthMults` hands these out,
/// so the index always addresses a configured width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Width {
    index: usize,
    mult: f64,
}

impl Width {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mult(&self) -> f64 {
        self.mult
    }

    pub fn scale(&self, base: usize) -> usize {
        (base as f64 * self.mult).floor() as usize
    }
}
