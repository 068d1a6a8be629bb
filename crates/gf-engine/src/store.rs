//! Parameter and results tables on disk.

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use gf_types::{GfResult, Individual, Lineage, RankingEntry, RankingTable, TableError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const MODEL_NAME: &str = "model_name";
const FITNESS_COLUMNS: [&str; 2] = ["fitness", "chi2"];

/// Storage of the per-generation tables.
///
/// Parameter tables are keyed by `model_name` with one float column per
/// parameter. Results tables carry `model_name` and a fitness column.
pub trait TableStore: Send + Sync {
    fn write_parameters(
        &self,
        path: &Path,
        columns: &[&str],
        individuals: &[Individual],
    ) -> GfResult<()>;

    fn read_parameters(&self, path: &Path) -> GfResult<Vec<Individual>>;

    fn write_results(&self, path: &Path, table: &RankingTable) -> GfResult<()>;

    fn read_results(&self, path: &Path) -> GfResult<RankingTable>;

    /// Concatenate the parameter tables at `paths`, in order.
    fn read_parameter_history(&self, paths: &[PathBuf]) -> GfResult<Vec<Individual>> {
        let mut history = Vec::new();
        for path in paths {
            history.extend(self.read_parameters(path)?);
        }
        Ok(history)
    }

    /// The results tables at `paths`, in order.
    fn read_results_history(&self, paths: &[PathBuf]) -> GfResult<Vec<RankingTable>> {
        paths.iter().map(|path| self.read_results(path)).collect()
    }
}

/// Comma-separated tables with a header row.
#[derive(Debug, Clone, Default)]
pub struct CsvTableStore;

impl CsvTableStore {
    pub fn new() -> Self {
        Self
    }

    fn reader(path: &Path) -> GfResult<(csv::Reader<fs::File>, StringRecord)> {
        if !path.is_file() {
            return Err(TableError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(|e| format_error(path, e))?;
        let headers = reader.headers().map_err(|e| format_error(path, e))?.clone();
        Ok((reader, headers))
    }

    fn writer(path: &Path) -> GfResult<csv::Writer<fs::File>> {
        WriterBuilder::new()
            .from_path(path)
            .map_err(|e| format_error(path, e).into())
    }
}

fn format_error(path: &Path, e: impl std::fmt::Display) -> TableError {
    TableError::Format {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn column_index(path: &Path, headers: &StringRecord, column: &str) -> Result<usize, TableError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| TableError::MissingColumn {
            path: path.display().to_string(),
            column: column.to_string(),
        })
}

fn parse_value(path: &Path, row: usize, column: &str, raw: &str) -> Result<f64, TableError> {
    raw.parse::<f64>().map_err(|e| TableError::InvalidValue {
        path: path.display().to_string(),
        row,
        column: column.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

impl TableStore for CsvTableStore {
    fn write_parameters(
        &self,
        path: &Path,
        columns: &[&str],
        individuals: &[Individual],
    ) -> GfResult<()> {
        let mut writer = Self::writer(path)?;
        let mut header = vec![MODEL_NAME];
        header.extend_from_slice(columns);
        writer.write_record(&header).map_err(|e| format_error(path, e))?;

        for (row, individual) in individuals.iter().enumerate() {
            let mut record = Vec::with_capacity(columns.len() + 1);
            record.push(individual.model_name.clone());
            for column in columns {
                let value = individual.value(column).ok_or_else(|| TableError::InvalidValue {
                    path: path.display().to_string(),
                    row,
                    column: column.to_string(),
                    message: format!("{} has no value", individual.model_name),
                })?;
                record.push(value.to_string());
            }
            writer.write_record(&record).map_err(|e| format_error(path, e))?;
        }
        writer.flush()?;
        debug!(path = %path.display(), rows = individuals.len(), "wrote parameter table");
        Ok(())
    }

    fn read_parameters(&self, path: &Path) -> GfResult<Vec<Individual>> {
        let (mut reader, headers) = Self::reader(path)?;
        let name_idx = column_index(path, &headers, MODEL_NAME)?;

        let mut individuals = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| format_error(path, e))?;
            let mut values = BTreeMap::new();
            let mut model_name = String::new();
            for (i, (column, raw)) in headers.iter().zip(record.iter()).enumerate() {
                if i == name_idx {
                    model_name = raw.to_string();
                } else {
                    values.insert(column.to_string(), parse_value(path, row, column, raw)?);
                }
            }
            individuals.push(Individual::new(model_name, values));
        }
        Ok(individuals)
    }

    fn write_results(&self, path: &Path, table: &RankingTable) -> GfResult<()> {
        let mut writer = Self::writer(path)?;
        writer
            .write_record([MODEL_NAME, FITNESS_COLUMNS[0]])
            .map_err(|e| format_error(path, e))?;
        for entry in table.entries() {
            writer
                .write_record([entry.model_name.clone(), entry.fitness.to_string()])
                .map_err(|e| format_error(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Accepts a fitness column named `fitness` or `chi2`; other columns
    /// are ignored.
    fn read_results(&self, path: &Path) -> GfResult<RankingTable> {
        let (mut reader, headers) = Self::reader(path)?;
        let name_idx = column_index(path, &headers, MODEL_NAME)?;
        let (fitness_column, fitness_idx) = FITNESS_COLUMNS
            .iter()
            .find_map(|c| headers.iter().position(|h| h == *c).map(|i| (*c, i)))
            .ok_or_else(|| TableError::MissingColumn {
                path: path.display().to_string(),
                column: FITNESS_COLUMNS.join(" or "),
            })?;

        let mut entries = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| format_error(path, e))?;
            let name = record.get(name_idx).unwrap_or_default();
            let raw = record.get(fitness_idx).unwrap_or_default();
            entries.push(RankingEntry::new(
                name,
                parse_value(path, row, fitness_column, raw)?,
            ));
        }
        Ok(RankingTable::new(entries))
    }
}

/// One line per evolved child, e.g. `g2_0 = crossover of g1_3 and g1_7`.
pub fn write_lineage_log(path: &Path, lineage: &[Lineage]) -> GfResult<()> {
    let mut file = fs::File::create(path)?;
    for entry in lineage {
        writeln!(file, "{entry}")?;
    }
    Ok(())
}

/// Pool indices consumed by the selector, one per line, for plotting the
/// sampling distribution.
pub fn write_sampling(path: &Path, selected: &[usize]) -> GfResult<()> {
    let mut writer = CsvTableStore::writer(path)?;
    writer
        .write_record(["pool_index"])
        .map_err(|e| format_error(path, e))?;
    for index in selected {
        writer
            .write_record([index.to_string()])
            .map_err(|e| format_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gf_types::GfError;

    fn individual(name: &str, a: f64, b: f64) -> Individual {
        let values = [("alpha".to_string(), a), ("beta".to_string(), b)]
            .into_iter()
            .collect();
        Individual::new(name, values)
    }

    #[test]
    fn parameter_table_round_trip_keeps_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.csv");
        let store = CsvTableStore::new();
        let rows = vec![individual("g1_0", 0.25, 1e-4), individual("g1_1", 3.0, 12.5)];

        store.write_parameters(&path, &["beta", "alpha"], &rows).unwrap();

        let header = fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("model_name,beta,alpha\n"));
        assert_eq!(store.read_parameters(&path).unwrap(), rows);
    }

    #[test]
    fn results_accept_chi2_column_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitting_output.csv");
        fs::write(&path, "model_name,chi2,n_points\ng1_0,8.5,30\ng1_1,2.0,30\ng1_2,4.0,30\n")
            .unwrap();

        let table = CsvTableStore::new().read_results(&path).unwrap();
        let names: Vec<_> = table.entries().iter().map(|e| e.model_name.as_str()).collect();
        assert_eq!(names, vec!["g1_1", "g1_2", "g1_0"]);
    }

    #[test]
    fn missing_tables_and_columns_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new();

        let err = store.read_results(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, GfError::Table(TableError::NotFound { .. })));

        let path = dir.path().join("bad.csv");
        fs::write(&path, "model_name,score\ng1_0,1.0\n").unwrap();
        let err = store.read_results(&path).unwrap_err();
        assert!(matches!(err, GfError::Table(TableError::MissingColumn { .. })));

        fs::write(&path, "model_name,fitness\ng1_0,abc\n").unwrap();
        let err = store.read_results(&path).unwrap_err();
        assert!(matches!(err, GfError::Table(TableError::InvalidValue { .. })));
    }

    #[test]
    fn history_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new();
        let first = dir.path().join("g1.csv");
        let second = dir.path().join("g2.csv");
        store
            .write_parameters(&first, &["alpha", "beta"], &[individual("g1_0", 1.0, 2.0)])
            .unwrap();
        store
            .write_parameters(&second, &["alpha", "beta"], &[individual("g2_0", 3.0, 4.0)])
            .unwrap();

        let history = store.read_parameter_history(&[first, second]).unwrap();
        let names: Vec<_> = history.iter().map(|i| i.model_name.as_str()).collect();
        assert_eq!(names, vec!["g1_0", "g2_0"]);
    }

    #[test]
    fn lineage_and_sampling_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("parameters.log");
        let lineage = vec![
            Lineage::Crossover {
                child: "g2_0".into(),
                parents: ("g1_3".into(), "g1_7".into()),
            },
            Lineage::Mutation {
                child: "g2_1".into(),
                parent: "g1_3".into(),
                parameter: "alpha".into(),
            },
        ];
        write_lineage_log(&log, &lineage).unwrap();
        let text = fs::read_to_string(&log).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("g2_0 = crossover of g1_3 and g1_7"));

        let sampling = dir.path().join("sampling.csv");
        write_sampling(&sampling, &[3, 0, 3]).unwrap();
        assert_eq!(fs::read_to_string(&sampling).unwrap(), "pool_index\n3\n0\n3\n");
    }
}
