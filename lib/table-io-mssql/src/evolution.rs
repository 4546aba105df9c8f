//! Schema evolution.
//!
//! Every version of every table schema is a row of the `tableCfgs` registry.
//! The current version of a table is the registered version with the most
//! columns. Extending a table compares column counts only and appends the
//! columns beyond the current count; it never inspects earlier columns.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value as JsonValue;
use table_io::{
    ColumnCfg, ContentType, JsonValueType, NameMapping, Row, SqlRow, StatementBuilder,
    StorageError, TableCfg, hash_table_cfg,
};
use tracing::{debug, warn};

use crate::codec;

/// What [`plan`] decided for a requested schema.
#[derive(Debug, Clone, PartialEq)]
pub enum EvolutionPlan {
    /// Unknown table: create it and register its first version.
    Create { sql: String, registry: TableCfg },
    /// Known table with new trailing columns: add them and register the
    /// new version.
    Extend {
        added: Vec<ColumnCfg>,
        statements: Vec<String>,
        registry: TableCfg,
    },
    /// Nothing to add.
    Unchanged,
}

/// Columns of `requested` beyond the column count of `current`.
pub fn column_delta<'a>(current: &TableCfg, requested: &'a TableCfg) -> &'a [ColumnCfg] {
    requested
        .columns
        .get(current.columns.len()..)
        .unwrap_or_default()
}

/// The current version among registered versions of one table.
///
/// Equal column counts are not expected; they resolve to the greatest
/// `_hash` so the choice does not depend on row order.
pub fn current_table_cfg(versions: &[TableCfg]) -> Option<&TableCfg> {
    versions
        .iter()
        .max_by(|a, b| {
            a.columns
                .len()
                .cmp(&b.columns.len())
                .then_with(|| a.hash.cmp(&b.hash))
        })
}

/// The current version of every registered table, ordered by table key.
pub fn current_table_cfgs(versions: &[TableCfg]) -> Vec<TableCfg> {
    let mut by_key: BTreeMap<&str, Vec<TableCfg>> = BTreeMap::new();
    for cfg in versions {
        by_key.entry(&cfg.key).or_default().push(cfg.clone());
    }
    by_key
        .values()
        .filter_map(|group| current_table_cfg(group).cloned())
        .collect()
}

/// Tables of a batch ordered so every referenced table precedes the tables
/// referencing it.
///
/// Self-references and references to tables outside `tables` add no
/// constraint. A reference cycle is broken at the first of its tables in
/// `tables`, which then comes last.
pub fn insert_order<'a>(tables: &[&'a str], cfgs: &BTreeMap<String, TableCfg>) -> Vec<&'a str> {
    let mut ordered = Vec::with_capacity(tables.len());
    let mut visiting = HashSet::new();
    for &table in tables {
        visit(table, tables, cfgs, &mut visiting, &mut ordered);
    }
    ordered
}

fn visit<'a>(
    table: &'a str,
    tables: &[&'a str],
    cfgs: &BTreeMap<String, TableCfg>,
    visiting: &mut HashSet<&'a str>,
    ordered: &mut Vec<&'a str>,
) {
    if ordered.contains(&table) || !visiting.insert(table) {
        return;
    }
    if let Some(cfg) = cfgs.get(table) {
        let targets = cfg
            .reference_columns()
            .filter_map(|column| NameMapping::referenced_table(&column.key));
        for target in targets {
            if target == table {
                continue;
            }
            if let Some(&target) = tables.iter().find(|&&t| t == target) {
                visit(target, tables, cfgs, visiting, ordered);
            }
        }
    }
    ordered.push(table);
}

/// Decide how to bring the table of `requested` up to date.
pub fn plan<S: StatementBuilder + ?Sized>(
    statements: &S,
    current: Option<&TableCfg>,
    requested: &TableCfg,
) -> Result<EvolutionPlan, StorageError> {
    requested.validate()?;

    let mut registry = requested.clone();
    hash_table_cfg(&mut registry)?;

    let Some(current) = current else {
        return Ok(EvolutionPlan::Create {
            sql: statements.create_table(requested)?,
            registry,
        });
    };

    if requested.columns.len() < current.columns.len() {
        warn!(
            table = %requested.key,
            current = current.columns.len(),
            requested = requested.columns.len(),
            "Ignoring schema with fewer columns than the current version"
        );
        return Ok(EvolutionPlan::Unchanged);
    }

    let added = column_delta(current, requested);
    if added.is_empty() {
        debug!(table = %requested.key, "Schema unchanged");
        return Ok(EvolutionPlan::Unchanged);
    }

    Ok(EvolutionPlan::Extend {
        added: added.to_vec(),
        statements: statements.alter_table(&requested.key, added)?,
        registry,
    })
}

/// The registry row storing one schema version.
pub fn registry_row(cfg: &TableCfg) -> Result<Row, StorageError> {
    let mut cfg = cfg.clone();
    if cfg.hash.is_none() {
        hash_table_cfg(&mut cfg)?;
    }

    match serde_json::to_value(&cfg)? {
        JsonValue::Object(row) => Ok(row),
        _ => Err(StorageError::StorageError(format!(
            "table cfg {} did not serialize to an object",
            cfg.key
        ))),
    }
}

fn field<'a>(row: &'a Row, key: &str) -> Result<&'a JsonValue, StorageError> {
    row.get(key).ok_or_else(|| {
        StorageError::InvalidSchema {
            table: NameMapping::TABLE_CFGS.to_string(),
            reason: format!("registry row without {key}"),
        }
    })
}

fn decode_column(table: &str, value: &JsonValue) -> Result<ColumnCfg, StorageError> {
    let invalid = || StorageError::InvalidSchema {
        table: table.to_string(),
        reason: format!("malformed column {value}"),
    };

    let key = value.get("key").and_then(JsonValue::as_str).ok_or_else(invalid)?;
    let tag = value.get("type").and_then(JsonValue::as_str).ok_or_else(invalid)?;
    let column_type = tag
        .parse::<JsonValueType>()
        .map_err(|_| StorageError::UnsupportedColumnType {
            table: table.to_string(),
            column: key.to_string(),
            column_type: tag.to_string(),
        })?;

    Ok(ColumnCfg::new(key, column_type))
}

/// Decode a native registry row into the schema version it stores.
///
/// A column type tag outside the known six fails with
/// [`StorageError::UnsupportedColumnType`].
pub fn decode_registry_row(row: &SqlRow) -> Result<TableCfg, StorageError> {
    let row = codec::parse_row(row, &TableCfg::table_cfgs())?;

    let key = field(&row, "key")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let content_type: ContentType = serde_json::from_value(field(&row, "type")?.clone())?;
    let columns = field(&row, "columns")?
        .as_array()
        .map(|columns| {
            columns
                .iter()
                .map(|c| decode_column(&key, c))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    let flag = |name: &str| row.get(name).and_then(JsonValue::as_bool).unwrap_or(false);

    Ok(TableCfg {
        hash: row
            .get(NameMapping::PRIMARY_KEY_COLUMN)
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        is_head: flag("isHead"),
        is_root: flag("isRoot"),
        is_shared: flag("isShared"),
        key,
        content_type,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MsSqlStatements;
    use table_io::Value;

    fn v1() -> TableCfg {
        TableCfg::new("cars", ContentType::Components)
            .with_column("brand", JsonValueType::String)
            .with_column("doors", JsonValueType::Number)
    }

    fn v2() -> TableCfg {
        v1()
            .with_column("electric", JsonValueType::Boolean)
            .with_column("specs", JsonValueType::Json)
    }

    fn versioned(mut cfg: TableCfg) -> TableCfg {
        hash_table_cfg(&mut cfg).unwrap();
        cfg
    }

    #[test]
    fn delta_is_the_appended_suffix() {
        let current = v1();
        let requested = v2();
        let delta = column_delta(&current, &requested);
        let keys: Vec<_> = delta.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["electric", "specs"]);
        assert!(column_delta(&v2(), &v2()).is_empty());
        assert!(column_delta(&v2(), &v1()).is_empty());
    }

    #[test]
    fn current_is_widest_version() {
        let versions = vec![versioned(v2()), versioned(v1())];
        assert_eq!(current_table_cfg(&versions).unwrap().columns.len(), 5);
        assert!(current_table_cfg(&[]).is_none());
    }

    #[test]
    fn current_per_key() {
        let other = versioned(
            TableCfg::new("boats", ContentType::Components)
                .with_column("name", JsonValueType::String),
        );
        let versions = vec![versioned(v1()), other.clone(), versioned(v2())];
        let current = current_table_cfgs(&versions);
        assert_eq!(current.len(), 2);
        assert_eq!(current[0], other);
        assert_eq!(current[1].columns.len(), 5);
    }

    fn by_key(cfgs: Vec<TableCfg>) -> BTreeMap<String, TableCfg> {
        cfgs.into_iter().map(|cfg| (cfg.key.clone(), cfg)).collect()
    }

    #[test]
    fn referenced_tables_are_inserted_first() {
        let cfgs = by_key(vec![
            TableCfg::new("axles", ContentType::Components)
                .with_column("wheelRef", JsonValueType::String),
            TableCfg::new("wheel", ContentType::Components)
                .with_column("size", JsonValueType::Number),
            TableCfg::new("brakes", ContentType::Components)
                .with_column("axlesRef", JsonValueType::String)
                .with_column("brakesRef", JsonValueType::String),
        ]);

        assert_eq!(
            insert_order(&["axles", "brakes", "wheel"], &cfgs),
            vec!["wheel", "axles", "brakes"]
        );
        // targets outside the batch are already stored
        assert_eq!(
            insert_order(&["axles", "brakes"], &cfgs),
            vec!["axles", "brakes"]
        );
        assert_eq!(insert_order(&["brakes"], &cfgs), vec!["brakes"]);
    }

    #[test]
    fn reference_cycle_keeps_every_table() {
        let cfgs = by_key(vec![
            TableCfg::new("a", ContentType::Components)
                .with_column("bRef", JsonValueType::String),
            TableCfg::new("b", ContentType::Components)
                .with_column("aRef", JsonValueType::String),
        ]);
        assert_eq!(insert_order(&["a", "b"], &cfgs), vec!["b", "a"]);
        assert!(insert_order(&[], &cfgs).is_empty());
    }

    #[test]
    fn plan_create_extend_unchanged() {
        let stmts = MsSqlStatements::new("dbo").unwrap();

        let create = plan(&stmts, None, &v1()).unwrap();
        let EvolutionPlan::Create { sql, registry } = create else {
            panic!("expected create");
        };
        assert!(sql.contains("CREATE TABLE [dbo].[cars_tbl]"));
        assert!(registry.hash.is_some());

        let current = versioned(v1());
        let extend = plan(&stmts, Some(&current), &v2()).unwrap();
        let EvolutionPlan::Extend {
            added, statements, ..
        } = extend
        else {
            panic!("expected extend");
        };
        assert_eq!(added.len(), 2);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("ADD [electric_col] BIT"));

        let current = versioned(v2());
        assert_eq!(plan(&stmts, Some(&current), &v2()).unwrap(), EvolutionPlan::Unchanged);
        assert_eq!(plan(&stmts, Some(&current), &v1()).unwrap(), EvolutionPlan::Unchanged);
    }

    #[test]
    fn plan_rejects_schema_without_hash() {
        let stmts = MsSqlStatements::new("dbo").unwrap();
        let cfg = TableCfg {
            columns: vec![ColumnCfg::new("brand", JsonValueType::String)],
            ..v1()
        };
        assert!(matches!(
            plan(&stmts, None, &cfg),
            Err(StorageError::MissingHashColumn(_))
        ));
    }

    #[test]
    fn registry_row_decodes_back() {
        let cfg = versioned(v2());
        let row = registry_row(&cfg).unwrap();
        let registry = TableCfg::table_cfgs();
        let params = codec::serialize_row(&row, &registry).unwrap();
        let native: SqlRow = registry
            .columns
            .iter()
            .map(|c| NameMapping::add_column_suffix(&c.key))
            .zip(params)
            .collect();

        assert_eq!(decode_registry_row(&native).unwrap(), cfg);
    }

    #[test]
    fn unknown_column_tag_is_unsupported() {
        let native: SqlRow = [
            ("_hash_col", Value::String("h".into())),
            ("key_col", Value::String("cars".into())),
            ("type_col", Value::String("components".into())),
            (
                "columns_col",
                Value::String(
                    r#"[{"key":"_hash","type":"string"},{"key":"x","type":"date"}]"#.into(),
                ),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let err = decode_registry_row(&native).unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedColumnType { ref column_type, .. } if column_type == "date"
        ));
    }
}
