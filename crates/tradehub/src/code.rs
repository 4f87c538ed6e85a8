//! Eight-digit link codes that pair a requester with a worker.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdmissionError;

/// A link code in `00000000..=99999999`.
///
/// The only way to build one is through `TryFrom`, so any `LinkCode` in the
/// system is already in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct LinkCode(u32);

impl LinkCode {
    pub const MAX: u32 = 99_999_999;

    /// Raw numeric value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// The eight digits, most significant first.
    pub fn digits(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        let mut rest = self.0;
        for slot in out.iter_mut().rev() {
            *slot = (rest % 10) as u8;
            rest /= 10;
        }
        out
    }

    /// Rendered as `0000 0000`, the way players type it.
    pub fn grouped(self) -> String {
        format!("{:04} {:04}", self.0 / 10_000, self.0 % 10_000)
    }

    /// Draw a code uniformly from `[min, max]`, both clamped to the valid range.
    pub fn random_in(min: u32, max: u32) -> Self {
        let hi = max.min(Self::MAX);
        let lo = min.min(hi);
        Self(fastrand::u32(lo..=hi))
    }
}

impl TryFrom<i64> for LinkCode {
    type Error = AdmissionError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        if (0..=i64::from(Self::MAX)).contains(&code) {
            Ok(Self(code as u32))
        } else {
            Err(AdmissionError::InvalidCode { code })
        }
    }
}

impl TryFrom<u32> for LinkCode {
    type Error = AdmissionError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::try_from(i64::from(code))
    }
}

impl From<LinkCode> for u32 {
    fn from(code: LinkCode) -> Self {
        code.0
    }
}

impl fmt::Display for LinkCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}
