use crate::{error::Error, Age};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, str::FromStr};

const AGE_BIN_LABELS: [&str; AgeBin::COUNT] = [
    "0-0", "1-4", "5-9", "10-19", "20-29", "30-39", "40-49", "50-59", "60-69", "70-79", "80-89",
    "90+",
];
const AGE_BIN_LOWER: [Age; AgeBin::COUNT] = [0, 1, 5, 10, 20, 30, 40, 50, 60, 70, 80, 90];

/// Coarse age group used by the external model. Bins are ordered from the
/// youngest (`0-0`) to the open-ended `90+`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgeBin(u8);

impl AgeBin {
    pub const COUNT: usize = 12;

    pub const AGE_0: AgeBin = AgeBin(0);
    pub const AGE_1_4: AgeBin = AgeBin(1);
    pub const AGE_5_9: AgeBin = AgeBin(2);
    pub const AGE_10_19: AgeBin = AgeBin(3);
    pub const AGE_20_29: AgeBin = AgeBin(4);
    pub const AGE_30_39: AgeBin = AgeBin(5);
    pub const AGE_40_49: AgeBin = AgeBin(6);
    pub const AGE_50_59: AgeBin = AgeBin(7);
    pub const AGE_60_69: AgeBin = AgeBin(8);
    pub const AGE_70_79: AgeBin = AgeBin(9);
    pub const AGE_80_89: AgeBin = AgeBin(10);
    pub const AGE_90_PLUS: AgeBin = AgeBin(11);

    /// Iterate over all bins, youngest first.
    pub fn all() -> impl Iterator<Item = AgeBin> + Clone {
        (0..Self::COUNT as u8).map(AgeBin)
    }

    /// Bin holding the given single-year age.
    pub fn for_age(age: Age) -> AgeBin {
        let k = AGE_BIN_LOWER.iter().rposition(|&lo| age >= lo).unwrap_or(0);
        AgeBin(k as u8)
    }

    /// Position of the bin in [`AgeBin::all`].
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn label(self) -> &'static str {
        AGE_BIN_LABELS[self.index()]
    }

    /// Youngest single-year age in the bin.
    pub fn lower(self) -> Age {
        AGE_BIN_LOWER[self.index()]
    }

    /// Oldest single-year age in the bin, or None for the open-ended bin.
    pub fn upper(self) -> Option<Age> {
        AGE_BIN_LOWER.get(self.index() + 1).map(|next| next - 1)
    }

    pub fn contains(self, age: Age) -> bool {
        AgeBin::for_age(age) == self
    }
}

impl fmt::Display for AgeBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgeBin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AGE_BIN_LABELS
            .iter()
            .position(|&label| label == s)
            .map(|k| AgeBin(k as u8))
            .ok_or_else(|| Error::UnknownAgeBin(s.to_string()))
    }
}

impl TryFrom<String> for AgeBin {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgeBin> for String {
    fn from(bin: AgeBin) -> String {
        bin.label().to_string()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn suffix(self) -> char {
        match self {
            Sex::Male => 'M',
            Sex::Female => 'F',
        }
    }

    pub fn other(self) -> Sex {
        match self {
            Sex::Male => Sex::Female,
            Sex::Female => Sex::Male,
        }
    }
}

/// An age-by-sex population group of the external model, written as the bin
/// label followed by the sex suffix (e.g. `20-29M`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Stratum {
    bin: AgeBin,
    sex: Sex,
}

impl Stratum {
    pub const fn new(bin: AgeBin, sex: Sex) -> Self {
        Stratum { bin, sex }
    }

    pub const fn male(bin: AgeBin) -> Self {
        Stratum::new(bin, Sex::Male)
    }

    pub const fn female(bin: AgeBin) -> Self {
        Stratum::new(bin, Sex::Female)
    }

    /// All strata known to the model, ordered by bin then sex.
    pub fn all() -> impl Iterator<Item = Stratum> {
        AgeBin::all().flat_map(|bin| [Stratum::male(bin), Stratum::female(bin)])
    }

    pub fn bin(&self) -> AgeBin {
        self.bin
    }

    pub fn sex(&self) -> Sex {
        self.sex
    }

    /// Same age bin, opposite sex.
    pub fn counterpart(&self) -> Stratum {
        Stratum::new(self.bin, self.sex.other())
    }
}

impl fmt::Display for Stratum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bin, self.sex.suffix())
    }
}

impl FromStr for Stratum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownStratum(s.to_string());
        let (split, suffix) = s.char_indices().last().ok_or_else(unknown)?;
        let sex = match suffix {
            'M' => Sex::Male,
            'F' => Sex::Female,
            _ => return Err(unknown()),
        };
        let bin = s[..split].parse().map_err(|_| unknown())?;
        Ok(Stratum::new(bin, sex))
    }
}

impl TryFrom<String> for Stratum {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Stratum> for String {
    fn from(stratum: Stratum) -> String {
        stratum.to_string()
    }
}
