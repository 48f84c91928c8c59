//! Predicate Trees
//!
//! A query is compiled into a [`SelectPlan`]: the `record r` root, its joins,
//! a conjunction of [`Predicate`]s, an ordering and a page. Rendering walks the
//! tree once and emits SQL with positional parameters in textual order.

use libsql::Value;

/// Alias of the record root in every plan
pub const ROOT: &str = "r";

/// `alias.column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    alias: String,
    name: &'static str,
}

impl Column {
    pub fn new(alias: impl Into<String>, name: &'static str) -> Self {
        Self {
            alias: alias.into(),
            name,
        }
    }

    fn render(&self, sql: &mut String) {
        sql.push_str(&self.alias);
        sql.push('.');
        sql.push_str(self.name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
    ColumnsEqual(Column, Column),
    In {
        column: Column,
        values: Vec<Value>,
    },
    Like {
        column: Column,
        pattern: String,
    },
    /// Correlated `EXISTS (SELECT 1 FROM table alias WHERE ...)`
    Exists {
        table: &'static str,
        alias: String,
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn eq(column: Column, value: Value) -> Self {
        Predicate::Compare {
            column,
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Predicate::And(parts) => render_joined(parts, " AND ", "1 = 1", sql, params),
            Predicate::Or(parts) => render_joined(parts, " OR ", "1 = 0", sql, params),
            Predicate::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(sql, params);
                sql.push(')');
            }
            Predicate::Compare { column, op, value } => {
                column.render(sql);
                sql.push(' ');
                sql.push_str(op.sql());
                sql.push_str(" ?");
                params.push(value.clone());
            }
            Predicate::ColumnsEqual(left, right) => {
                left.render(sql);
                sql.push_str(" = ");
                right.render(sql);
            }
            Predicate::In { column, values } => {
                if values.is_empty() {
                    sql.push_str("1 = 0");
                    return;
                }
                column.render(sql);
                sql.push_str(" IN (");
                sql.push_str(&vec!["?"; values.len()].join(", "));
                sql.push(')');
                params.extend(values.iter().cloned());
            }
            Predicate::Like { column, pattern } => {
                column.render(sql);
                sql.push_str(" LIKE ?");
                params.push(Value::Text(pattern.clone()));
            }
            Predicate::Exists {
                table,
                alias,
                predicate,
            } => {
                sql.push_str("EXISTS (SELECT 1 FROM ");
                sql.push_str(table);
                sql.push(' ');
                sql.push_str(alias);
                sql.push_str(" WHERE ");
                predicate.render(sql, params);
                sql.push(')');
            }
        }
    }
}

fn render_joined(
    parts: &[Predicate],
    separator: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if parts.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sql.push_str(separator);
        }
        part.render(sql, params);
    }
    sql.push(')');
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: &'static str,
    pub alias: String,
    pub on: Predicate,
}

#[derive(Debug, Clone)]
pub struct OrderTerm {
    pub column: Column,
    pub descending: bool,
}

/// Result shape of a rendered plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// `id, payload, blob` of each record
    Records,
    /// A single `COUNT`
    Count,
}

/// A compiled query over `record r`
#[derive(Debug, Clone, Default)]
pub struct SelectPlan {
    pub distinct: bool,
    pub joins: Vec<Join>,
    pub filters: Vec<Predicate>,
    pub order: Vec<OrderTerm>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl SelectPlan {
    /// Render to SQL and parameters
    ///
    /// Pagination and ordering only apply to [`Projection::Records`].
    pub fn render(&self, projection: Projection) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        match projection {
            Projection::Records => {
                sql.push_str(if self.distinct { "SELECT DISTINCT " } else { "SELECT " });
                sql.push_str("r.id, r.payload, r.blob");
            }
            Projection::Count => {
                sql.push_str(if self.distinct {
                    "SELECT COUNT(DISTINCT r.id)"
                } else {
                    "SELECT COUNT(r.id)"
                });
            }
        }

        sql.push_str(" FROM record ");
        sql.push_str(ROOT);

        for join in &self.joins {
            if projection == Projection::Count && join.kind == JoinKind::Left {
                continue;
            }
            sql.push_str(match join.kind {
                JoinKind::Inner => " JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            sql.push_str(join.table);
            sql.push(' ');
            sql.push_str(&join.alias);
            sql.push_str(" ON ");
            join.on.render(&mut sql, &mut params);
        }

        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            for (i, filter) in self.filters.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                filter.render(&mut sql, &mut params);
            }
        }

        if projection == Projection::Records {
            if !self.order.is_empty() {
                sql.push_str(" ORDER BY ");
                for (i, term) in self.order.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    term.column.render(&mut sql);
                    sql.push_str(if term.descending { " DESC" } else { " ASC" });
                }
            }

            if self.limit.is_some() || self.offset.is_some() {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::Integer(
                    self.limit
                        .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
                        .unwrap_or(-1),
                ));
                params.push(Value::Integer(
                    self.offset
                        .map(|offset| i64::try_from(offset).unwrap_or(i64::MAX))
                        .unwrap_or(0),
                ));
            }
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(predicate: &Predicate) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        predicate.render(&mut sql, &mut params);
        (sql, params)
    }

    #[test]
    fn test_compare_binds_parameter() {
        let (sql, params) = render(&Predicate::eq(Column::new("r", "type_id"), Value::Integer(3)));
        assert_eq!(sql, "r.type_id = ?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_empty_groups() {
        assert_eq!(render(&Predicate::And(vec![])).0, "1 = 1");
        assert_eq!(render(&Predicate::Or(vec![])).0, "1 = 0");
        assert_eq!(
            render(&Predicate::In {
                column: Column::new("r", "id"),
                values: vec![]
            })
            .0,
            "1 = 0"
        );
    }

    #[test]
    fn test_exists_subquery() {
        let predicate = Predicate::Exists {
            table: "record_index",
            alias: "i0".into(),
            predicate: Box::new(Predicate::And(vec![
                Predicate::ColumnsEqual(Column::new("i0", "record_id"), Column::new("r", "id")),
                Predicate::Like {
                    column: Column::new("i0", "text_value"),
                    pattern: "Ba%".into(),
                },
            ])),
        };
        let (sql, params) = render(&predicate);
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM record_index i0 WHERE (i0.record_id = r.id AND i0.text_value LIKE ?))"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_plan_renders_joins_before_filters() {
        let plan = SelectPlan {
            distinct: true,
            joins: vec![Join {
                kind: JoinKind::Inner,
                table: "record_link",
                alias: "l0".into(),
                on: Predicate::ColumnsEqual(
                    Column::new("l0", "reference_id"),
                    Column::new("r", "id"),
                ),
            }],
            filters: vec![Predicate::eq(Column::new("r", "type_id"), Value::Integer(1))],
            order: vec![OrderTerm {
                column: Column::new("r", "id"),
                descending: true,
            }],
            offset: Some(2),
            limit: None,
        };

        let (sql, params) = plan.render(Projection::Records);
        assert_eq!(
            sql,
            "SELECT DISTINCT r.id, r.payload, r.blob FROM record r \
             JOIN record_link l0 ON l0.reference_id = r.id \
             WHERE r.type_id = ? ORDER BY r.id DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(params.len(), 3);

        let (count_sql, count_params) = plan.render(Projection::Count);
        assert_eq!(
            count_sql,
            "SELECT COUNT(DISTINCT r.id) FROM record r \
             JOIN record_link l0 ON l0.reference_id = r.id WHERE r.type_id = ?"
        );
        assert_eq!(count_params.len(), 1);
    }
}
