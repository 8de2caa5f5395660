//! PostGIS table writer
//!
//! Replace semantics in one transaction: drop, create, batched insert. A
//! failure anywhere rolls back to the previous table.

use super::{CellValue, ColumnType, TablePlan, TableWriter, GEOMETRY_COLUMN};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

/// Postgres caps a statement at this many bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

pub struct PostgisWriter {
    pool: PgPool,
}

impl PostgisWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_rows(&self, tx: &mut Transaction<'_, Postgres>, plan: &TablePlan) -> Result<u64> {
        if plan.row_count() == 0 {
            return Ok(0);
        }

        if plan.params_per_row() == 0 {
            let result = sqlx::query(&insert_empty_rows_sql(plan))
                .bind(plan.row_count() as i64)
                .execute(&mut **tx)
                .await?;
            return Ok(result.rows_affected());
        }

        let chunk_size = rows_per_statement(plan.params_per_row());
        let total_chunks = plan.row_count().div_ceil(chunk_size);
        let mut inserted = 0;

        for (chunk_idx, start) in (0..plan.row_count()).step_by(chunk_size).enumerate() {
            let end = (start + chunk_size).min(plan.row_count());
            debug!(
                table = %plan.table,
                chunk = chunk_idx + 1,
                total_chunks,
                rows = end - start,
                "Inserting rows"
            );

            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(insert_prefix(plan));
            query_builder.push_values(start..end, |mut b, i| {
                for (cell, column) in plan.rows[i].iter().zip(&plan.columns) {
                    match (cell, column.ty) {
                        (CellValue::Boolean(v), _) => b.push_bind(*v),
                        (CellValue::BigInt(v), _) => b.push_bind(*v),
                        (CellValue::Double(v), _) => b.push_bind(*v),
                        (CellValue::Text(v), _) => b.push_bind(v.clone()),
                        (CellValue::Null, ColumnType::Boolean) => b.push_bind(None::<bool>),
                        (CellValue::Null, ColumnType::BigInt) => b.push_bind(None::<i64>),
                        (CellValue::Null, ColumnType::Double) => b.push_bind(None::<f64>),
                        (CellValue::Null, ColumnType::Text) => b.push_bind(None::<String>),
                    };
                }

                if let Some(geometry) = &plan.geometry {
                    b.push("ST_SetSRID(ST_GeomFromGeoJSON(")
                        .push_bind_unseparated(geometry.values[i].clone())
                        .push_unseparated(format!("), {})", geometry.srid));
                }
            });

            let result = query_builder.build().execute(&mut **tx).await?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }
}

#[async_trait]
impl TableWriter for PostgisWriter {
    async fn replace_table(&self, plan: &TablePlan) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&drop_table_sql(plan)).execute(&mut *tx).await?;
        sqlx::query(&create_table_sql(plan)).execute(&mut *tx).await?;
        let rows = self.insert_rows(&mut tx, plan).await?;

        if let Some(sql) = valid_geometry_count_sql(plan) {
            let valid = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&mut *tx).await?;
            if valid == 0 {
                tx.rollback().await?;
                return Err(IngestError::NoValidGeometries);
            }
        }

        tx.commit().await?;
        Ok(rows)
    }
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_name(plan: &TablePlan) -> String {
    format!("{}.{}", quote_ident(&plan.schema), quote_ident(&plan.table))
}

pub fn drop_table_sql(plan: &TablePlan) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified_name(plan))
}

pub fn create_table_sql(plan: &TablePlan) -> String {
    let mut definitions: Vec<String> = plan
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_type()))
        .collect();

    if let Some(geometry) = &plan.geometry {
        definitions.push(format!(
            "{} geometry(Geometry, {})",
            quote_ident(GEOMETRY_COLUMN),
            geometry.srid
        ));
    }

    format!("CREATE TABLE {} ({})", qualified_name(plan), definitions.join(", "))
}

/// `INSERT INTO ... (cols) ` ready for `push_values`
pub fn insert_prefix(plan: &TablePlan) -> String {
    let mut names: Vec<String> = plan.columns.iter().map(|c| quote_ident(&c.name)).collect();
    if plan.geometry.is_some() {
        names.push(quote_ident(GEOMETRY_COLUMN));
    }

    format!("INSERT INTO {} ({}) ", qualified_name(plan), names.join(", "))
}

/// Rows for a table with no columns at all, count bound as `$1`
pub fn insert_empty_rows_sql(plan: &TablePlan) -> String {
    format!("INSERT INTO {} SELECT FROM generate_series(1, $1)", qualified_name(plan))
}

/// Rows per INSERT that stay under the bind parameter cap
pub fn rows_per_statement(params_per_row: usize) -> usize {
    (MAX_BIND_PARAMS / params_per_row.max(1)).max(1)
}

/// Post-insert check that at least one stored geometry is non-empty
pub fn valid_geometry_count_sql(plan: &TablePlan) -> Option<String> {
    plan.geometry.as_ref().filter(|_| plan.row_count() > 0).map(|_| {
        let column = quote_ident(GEOMETRY_COLUMN);
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND NOT ST_IsEmpty({})",
            qualified_name(plan),
            column,
            column
        )
    })
}
