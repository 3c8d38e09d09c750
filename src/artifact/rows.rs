// src/artifact/rows.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// A single (name, age, city) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    pub age: i64,
    pub city: String,
}

impl Row {
    pub fn new(name: impl Into<String>, age: i64, city: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age,
            city: city.into(),
        }
    }
}

/// Column-wise people table. All three columns always have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSet {
    names: Vec<String>,
    ages: Vec<i64>,
    cities: Vec<String>,
}

impl RowSet {
    pub fn try_new(names: Vec<String>, ages: Vec<i64>, cities: Vec<String>) -> Result<Self> {
        if names.len() != ages.len() || names.len() != cities.len() {
            bail!(
                "column lengths differ: name={}, age={}, city={}",
                names.len(),
                ages.len(),
                cities.len()
            );
        }
        Ok(Self {
            names,
            ages,
            cities,
        })
    }

    /// The fixed three-row table the producer writes on every run.
    pub fn sample() -> Self {
        Self::from_rows(vec![
            Row::new("Alice", 25, "New York"),
            Row::new("Bob", 30, "Los Angeles"),
            Row::new("Charlie", 35, "Chicago"),
        ])
    }

    pub fn from_rows(rows: impl IntoIterator<Item = Row>) -> Self {
        let mut set = Self::default();
        set.extend(rows);
        set
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = Row>) {
        for row in rows {
            self.names.push(row.name);
            self.ages.push(row.age);
            self.cities.push(row.city);
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.names
            .iter()
            .zip(&self.ages)
            .zip(&self.cities)
            .map(|((name, age), city)| Row::new(name.clone(), *age, city.clone()))
    }

    /// Arrow schema: name Utf8, age Int64, city Utf8, none nullable.
    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, false),
            Field::new("age", DataType::Int64, false),
            Field::new("city", DataType::Utf8, false),
        ]))
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(self.names.clone())),
            Arc::new(Int64Array::from(self.ages.clone())),
            Arc::new(StringArray::from(self.cities.clone())),
        ];
        RecordBatch::try_new(Self::schema(), columns).context("building people record batch")
    }

    /// Decode a batch by column name; any extra columns are ignored.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let names = string_column(batch, "name")?;
        let ages = batch
            .column_by_name("age")
            .ok_or_else(|| anyhow!("missing column `age`"))?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| anyhow!("column `age` is not Int64"))?;
        if ages.null_count() > 0 {
            bail!("column `age` contains nulls");
        }
        let cities = string_column(batch, "city")?;

        Self::try_new(names, ages.values().to_vec(), cities)
    }
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("missing column `{}`", name))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("column `{}` is not Utf8", name))?;
    if col.null_count() > 0 {
        bail!("column `{}` contains nulls", name);
    }
    Ok(col.iter().flatten().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_has_three_people() {
        let set = RowSet::sample();
        let rows: Vec<Row> = set.rows().collect();
        assert_eq!(
            rows,
            vec![
                Row::new("Alice", 25, "New York"),
                Row::new("Bob", 30, "Los Angeles"),
                Row::new("Charlie", 35, "Chicago"),
            ]
        );
    }

    #[test]
    fn try_new_rejects_ragged_columns() {
        let err = RowSet::try_new(vec!["a".into()], vec![], vec!["c".into()]).unwrap_err();
        assert!(err.to_string().contains("column lengths differ"));
    }

    #[test]
    fn record_batch_keeps_column_order_and_types() -> Result<()> {
        let batch = RowSet::sample().to_record_batch()?;
        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["name", "age", "city"]);
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(RowSet::from_record_batch(&batch)?, RowSet::sample());
        Ok(())
    }

    #[test]
    fn from_record_batch_rejects_wrong_age_type() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, false),
            Field::new("age", DataType::Utf8, false),
            Field::new("city", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["Alice"])) as ArrayRef,
                Arc::new(StringArray::from(vec!["25"])) as ArrayRef,
                Arc::new(StringArray::from(vec!["New York"])) as ArrayRef,
            ],
        )
        .unwrap();
        let err = RowSet::from_record_batch(&batch).unwrap_err();
        assert!(err.to_string().contains("not Int64"));
    }
}
