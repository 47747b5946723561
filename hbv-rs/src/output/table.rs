use crate::{
    error::{Error, Result},
    params::AgeBin,
    Real, Year,
};
use getset::*;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// A wide table of one model output: one row per year, one column per
/// coarse age bin (both sexes summed), in [`AgeBin::all`] order.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
pub struct WideTable {
    #[getset(get = "pub")]
    years: Vec<Year>,
    data: Array2<Real>,
}

/// A single cell of a melted [`WideTable`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LongRow {
    pub year: Year,
    pub bin: AgeBin,
    pub value: Real,
}

impl WideTable {
    /// Create table from a `years × bins` array.
    pub fn new(years: Vec<Year>, data: Array2<Real>) -> Result<Self> {
        if data.dim() != (years.len(), AgeBin::COUNT) {
            return Err(Error::MalformedOutput(format!(
                "expected {}x{} table, got {:?}",
                years.len(),
                AgeBin::COUNT,
                data.dim()
            )));
        }
        Ok(WideTable { years, data })
    }

    pub fn zeros(years: Vec<Year>) -> Self {
        let n = years.len();
        WideTable {
            years,
            data: Array2::zeros((n, AgeBin::COUNT)),
        }
    }

    /// Create table from rows of bin values.
    pub fn from_rows(rows: Vec<(Year, [Real; AgeBin::COUNT])>) -> Self {
        let mut table = WideTable::zeros(rows.iter().map(|r| r.0).collect());
        for (i, (_, row)) in rows.iter().enumerate() {
            table.data.row_mut(i).assign(&ArrayView1::from(&row[..]));
        }
        return table;
    }

    pub fn nrows(&self) -> usize {
        self.years.len()
    }

    pub fn data(&self) -> ArrayView2<'_, Real> {
        self.data.view()
    }

    /// Position of a year in the table.
    pub fn year_index(&self, year: Year) -> Option<usize> {
        self.years.iter().position(|&y| y == year)
    }

    pub fn get(&self, year: Year, bin: AgeBin) -> Option<Real> {
        let i = self.year_index(year)?;
        Some(self.data[[i, bin.index()]])
    }

    pub fn set(&mut self, year: Year, bin: AgeBin, value: Real) -> bool {
        match self.year_index(year) {
            Some(i) => {
                self.data[[i, bin.index()]] = value;
                true
            }
            None => false,
        }
    }

    /// Return the row of a year.
    pub fn row(&self, year: Year) -> Option<ArrayView1<'_, Real>> {
        self.year_index(year).map(|i| self.data.row(i))
    }

    /// Return the column of an age bin.
    pub fn column(&self, bin: AgeBin) -> ArrayView1<'_, Real> {
        self.data.column(bin.index())
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Reshape into one row per (year, bin), year-major.
    pub fn melt(&self) -> impl Iterator<Item = LongRow> + '_ {
        self.years.iter().enumerate().flat_map(move |(i, &year)| {
            AgeBin::all().map(move |bin| LongRow {
                year,
                bin,
                value: self.data[[i, bin.index()]],
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn melt_wide_table() {
        let mut row = [0.0; AgeBin::COUNT];
        row[AgeBin::AGE_20_29.index()] = 5.0;
        let table = WideTable::from_rows(vec![(2000, row), (2001, [1.0; AgeBin::COUNT])]);

        assert_eq!(table.get(2000, AgeBin::AGE_20_29), Some(5.0));
        assert_eq!(table.get(2002, AgeBin::AGE_20_29), None);
        assert_eq!(table.column(AgeBin::AGE_20_29).to_vec(), vec![5.0, 1.0]);

        let long: Vec<LongRow> = table.melt().collect();
        assert_eq!(long.len(), 2 * AgeBin::COUNT);
        assert_eq!(long[4].year, 2000);
        assert_eq!(long[4].bin, AgeBin::AGE_20_29);
        assert_eq!(long[4].value, 5.0);
        assert_eq!(long[AgeBin::COUNT].year, 2001);
    }

    #[test]
    fn shape_is_checked() {
        assert!(WideTable::new(vec![2000, 2001], Array2::zeros((2, 3))).is_err());
        assert!(WideTable::new(vec![2000], Array2::zeros((1, AgeBin::COUNT))).is_ok());
    }
}
