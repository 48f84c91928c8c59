//! Query Builder
//!
//! Builds one predicate tree per query and runs it once. Every query is
//! restricted to one record type (and to the session's tenant, when one is
//! configured) and is based on exactly one of:
//!
//! - the bare record set
//! - a link connector (`linking`, `linking_any`)
//! - a hierarchy connector (`child_of`, `parent_of`, `below`, `above` and
//!   their `_any` forms)
//!
//! # Architecture
//!
//! Builder calls only record what was asked for. Problems such as a second
//! connector, a filter added after sorting or an unknown indexed field are
//! reported as [`RecordError::IllegalState`] when the query executes.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use recordspace_core::{Records, Record, RecordMeta};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Serialize, Deserialize, Default)]
//! # struct Person { #[serde(skip)] meta: RecordMeta, age: u32 }
//! # impl Record for Person {
//! #     const SCHEMA_ID: &'static str = "demo.Person";
//! #     fn meta(&self) -> &RecordMeta { &self.meta }
//! #     fn meta_mut(&mut self) -> &mut RecordMeta { &mut self.meta }
//! # }
//! # async fn example(
//! #     records: &Records,
//! #     family: &Person,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let adults = records
//!     .query::<Person>()
//!     .child_of(&[family])
//!     .index_greater_than_or_equal_to("age", 18)
//!     .order_by_indexed_field("age")
//!     .max_results(10)
//!     .get_list()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod predicate;

#[cfg(test)]
mod query_test;

use crate::db::TransactionCoordinator;
use crate::models::{Identified, Record, RecordId, Schema, ToValue, Value, ValueKind};
use crate::services::error::RecordError;
use crate::services::hierarchy_engine::PathDirection;
use crate::services::record_store::RecordStore;
use crate::services::serializer::Serializer;
use predicate::{
    Column, CompareOp, Join, JoinKind, OrderTerm, Predicate, Projection, SelectPlan, ROOT,
};
use std::marker::PhantomData;

/// A condition on one typed value
#[derive(Debug, Clone)]
enum Condition {
    Compare(CompareOp, Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Like(Vec<String>),
    NotLike(Vec<String>),
}

#[derive(Debug, Clone)]
enum Connector {
    Link {
        targets: Vec<RecordId>,
        any: bool,
    },
    Path {
        direction: PathDirection,
        targets: Vec<RecordId>,
        any: bool,
    },
}

impl Connector {
    fn targets(&self) -> &[RecordId] {
        match self {
            Connector::Link { targets, .. } | Connector::Path { targets, .. } => targets,
        }
    }

    fn is_any(&self) -> bool {
        match self {
            Connector::Link { any, .. } | Connector::Path { any, .. } => *any,
        }
    }
}

#[derive(Debug, Clone)]
enum SortKey {
    IndexedField { field: String, descending: bool },
    Attribute { descending: bool },
}

/// Typed query over records of type `R`
///
/// Created by [`Records::query`](crate::services::Records::query).
pub struct Query<'a, R, S> {
    store: &'a RecordStore<S>,
    connector: Option<Connector>,
    index_filters: Vec<(String, Condition)>,
    attribute_filters: Vec<Condition>,
    sorts: Vec<SortKey>,
    insertion_order: Option<bool>,
    first_result: Option<u64>,
    max_results: Option<u64>,
    error: Option<RecordError>,
    _record: PhantomData<fn() -> R>,
}

impl<'a, R: Record, S: Serializer> Query<'a, R, S> {
    pub(crate) fn new(store: &'a RecordStore<S>) -> Self {
        Self {
            store,
            connector: None,
            index_filters: Vec::new(),
            attribute_filters: Vec::new(),
            sorts: Vec::new(),
            insertion_order: None,
            first_result: None,
            max_results: None,
            error: None,
            _record: PhantomData,
        }
    }

    /// Keep the first builder error; later ones are usually consequences
    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(RecordError::illegal_state(message));
        }
    }

    fn ensure_unsorted(&mut self, what: &str) -> bool {
        if self.sorts.is_empty() && self.insertion_order.is_none() {
            return true;
        }
        self.fail(format!("{} must be added before sorting", what));
        false
    }

    fn connect(mut self, connector: Connector, targets: &[impl Identified]) -> Self {
        if !self.ensure_unsorted("connector") {
            return self;
        }
        if self.connector.is_some() {
            self.fail("connector already set");
            return self;
        }
        if targets.iter().any(|t| t.record_id().is_none()) {
            self.error.get_or_insert_with(|| RecordError::missing_identity("query connector"));
            return self;
        }
        self.connector = Some(connector);
        self
    }

    fn ids(targets: &[impl Identified]) -> Vec<RecordId> {
        targets.iter().filter_map(Identified::record_id).collect()
    }

    // ------------------------------------------------------------------
    // Connectors
    // ------------------------------------------------------------------

    /// Records linked to every target
    pub fn linking(self, targets: &[impl Identified]) -> Self {
        let connector = Connector::Link {
            targets: Self::ids(targets),
            any: false,
        };
        self.connect(connector, targets)
    }

    /// Records linked to at least one target
    pub fn linking_any(self, targets: &[impl Identified]) -> Self {
        let connector = Connector::Link {
            targets: Self::ids(targets),
            any: true,
        };
        self.connect(connector, targets)
    }

    fn path(self, direction: PathDirection, targets: &[impl Identified], any: bool) -> Self {
        let connector = Connector::Path {
            direction,
            targets: Self::ids(targets),
            any,
        };
        self.connect(connector, targets)
    }

    /// Direct children of every target
    pub fn child_of(self, parents: &[impl Identified]) -> Self {
        self.path(PathDirection::ChildOf, parents, false)
    }

    /// Direct children of at least one target
    pub fn child_of_any(self, parents: &[impl Identified]) -> Self {
        self.path(PathDirection::ChildOf, parents, true)
    }

    /// Direct parents of every target
    pub fn parent_of(self, children: &[impl Identified]) -> Self {
        self.path(PathDirection::ParentOf, children, false)
    }

    pub fn parent_of_any(self, children: &[impl Identified]) -> Self {
        self.path(PathDirection::ParentOf, children, true)
    }

    /// Descendants of every target
    pub fn below(self, ancestors: &[impl Identified]) -> Self {
        self.path(PathDirection::Below, ancestors, false)
    }

    pub fn below_any(self, ancestors: &[impl Identified]) -> Self {
        self.path(PathDirection::Below, ancestors, true)
    }

    /// Ancestors of every target
    pub fn above(self, descendants: &[impl Identified]) -> Self {
        self.path(PathDirection::Above, descendants, false)
    }

    pub fn above_any(self, descendants: &[impl Identified]) -> Self {
        self.path(PathDirection::Above, descendants, true)
    }

    // ------------------------------------------------------------------
    // Index filters
    // ------------------------------------------------------------------

    fn index_filter(mut self, field: &str, condition: Option<Condition>) -> Self {
        if !self.ensure_unsorted("index filter") {
            return self;
        }
        match condition {
            Some(condition) => self.index_filters.push((field.to_string(), condition)),
            None => self.fail(format!("index filter on '{}' needs a non-null value", field)),
        }
        self
    }

    fn compare_index(self, field: &str, op: CompareOp, value: impl ToValue) -> Self {
        let condition = value.to_value().map(|v| Condition::Compare(op, v));
        self.index_filter(field, condition)
    }

    pub fn index_equal_to(self, field: &str, value: impl ToValue) -> Self {
        self.compare_index(field, CompareOp::Eq, value)
    }

    pub fn index_not_equal_to(self, field: &str, value: impl ToValue) -> Self {
        self.compare_index(field, CompareOp::Ne, value)
    }

    pub fn index_less_than(self, field: &str, value: impl ToValue) -> Self {
        self.compare_index(field, CompareOp::Lt, value)
    }

    pub fn index_greater_than(self, field: &str, value: impl ToValue) -> Self {
        self.compare_index(field, CompareOp::Gt, value)
    }

    pub fn index_less_than_or_equal_to(self, field: &str, value: impl ToValue) -> Self {
        self.compare_index(field, CompareOp::Le, value)
    }

    pub fn index_greater_than_or_equal_to(self, field: &str, value: impl ToValue) -> Self {
        self.compare_index(field, CompareOp::Ge, value)
    }

    /// Field value is one of `values`
    pub fn index_in<V: ToValue>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().filter_map(|v| v.to_value()).collect();
        self.index_filter(field, Some(Condition::In(values)))
    }

    pub fn index_not_in<V: ToValue>(
        self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().filter_map(|v| v.to_value()).collect();
        self.index_filter(field, Some(Condition::NotIn(values)))
    }

    /// Field matches at least one SQL `LIKE` pattern
    pub fn index_like<P: Into<String>>(
        self,
        field: &str,
        patterns: impl IntoIterator<Item = P>,
    ) -> Self {
        let patterns = patterns.into_iter().map(Into::into).collect();
        self.index_filter(field, Some(Condition::Like(patterns)))
    }

    /// Field matches none of the patterns
    ///
    /// This is `NOT (f LIKE p1 OR f LIKE p2 ...)`, not `f NOT LIKE p1 OR f NOT LIKE p2 ...`:
    /// with patterns `["D%", "B%"]` a value starting with either letter is excluded,
    /// where the disjunction of `NOT LIKE` terms would keep every value.
    pub fn index_not_like<P: Into<String>>(
        self,
        field: &str,
        patterns: impl IntoIterator<Item = P>,
    ) -> Self {
        let patterns = patterns.into_iter().map(Into::into).collect();
        self.index_filter(field, Some(Condition::NotLike(patterns)))
    }

    // ------------------------------------------------------------------
    // Link attribute filters
    // ------------------------------------------------------------------

    fn attribute_filter(mut self, condition: Option<Condition>) -> Self {
        if !self.ensure_unsorted("attribute filter") {
            return self;
        }
        if !matches!(self.connector, Some(Connector::Link { .. })) {
            self.fail("attribute filter requires a link connector");
            return self;
        }
        match condition {
            Some(condition) => self.attribute_filters.push(condition),
            None => self.fail("attribute filter needs a non-null value"),
        }
        self
    }

    fn compare_attribute(self, op: CompareOp, value: impl ToValue) -> Self {
        let condition = value.to_value().map(|v| Condition::Compare(op, v));
        self.attribute_filter(condition)
    }

    pub fn attribute_equal_to(self, value: impl ToValue) -> Self {
        self.compare_attribute(CompareOp::Eq, value)
    }

    pub fn attribute_not_equal_to(self, value: impl ToValue) -> Self {
        self.compare_attribute(CompareOp::Ne, value)
    }

    pub fn attribute_less_than(self, value: impl ToValue) -> Self {
        self.compare_attribute(CompareOp::Lt, value)
    }

    pub fn attribute_greater_than(self, value: impl ToValue) -> Self {
        self.compare_attribute(CompareOp::Gt, value)
    }

    pub fn attribute_less_than_or_equal_to(self, value: impl ToValue) -> Self {
        self.compare_attribute(CompareOp::Le, value)
    }

    pub fn attribute_greater_than_or_equal_to(self, value: impl ToValue) -> Self {
        self.compare_attribute(CompareOp::Ge, value)
    }

    pub fn attribute_in<V: ToValue>(self, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().filter_map(|v| v.to_value()).collect();
        self.attribute_filter(Some(Condition::In(values)))
    }

    pub fn attribute_not_in<V: ToValue>(self, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().filter_map(|v| v.to_value()).collect();
        self.attribute_filter(Some(Condition::NotIn(values)))
    }

    // ------------------------------------------------------------------
    // Sorting and paging
    // ------------------------------------------------------------------

    /// Oldest records first. The first insertion-order call wins.
    pub fn order_by_insert(mut self) -> Self {
        self.insertion_order.get_or_insert(false);
        self
    }

    /// Newest records first
    pub fn reverse_by_insert(mut self) -> Self {
        self.insertion_order.get_or_insert(true);
        self
    }

    pub fn order_by_indexed_field(mut self, field: &str) -> Self {
        self.sorts.push(SortKey::IndexedField {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    pub fn reverse_by_indexed_field(mut self, field: &str) -> Self {
        self.sorts.push(SortKey::IndexedField {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    fn sort_by_attribute(mut self, descending: bool) -> Self {
        if !matches!(self.connector, Some(Connector::Link { .. })) {
            self.fail("attribute sort requires a link connector");
            return self;
        }
        self.sorts.push(SortKey::Attribute { descending });
        self
    }

    /// Ascending by link attribute (text, then numeric, then timestamp column)
    pub fn order_by_attribute(self) -> Self {
        self.sort_by_attribute(false)
    }

    pub fn reverse_by_attribute(self) -> Self {
        self.sort_by_attribute(true)
    }

    /// Skip the first `offset` results
    pub fn first_result(mut self, offset: u64) -> Self {
        self.first_result = Some(offset);
        self
    }

    pub fn max_results(mut self, limit: u64) -> Self {
        self.max_results = Some(limit);
        self
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Compile the query; `None` when it cannot match anything
    async fn compile(&mut self) -> Result<Option<SelectPlan>, RecordError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }

        let schema = self.store.schema::<R>().await?;
        let type_id = self
            .store
            .types()
            .resolve(self.store.session(), R::SCHEMA_ID, true)
            .await?;

        let mut plan = SelectPlan {
            offset: self.first_result,
            limit: self.max_results,
            ..Default::default()
        };

        plan.filters.push(Predicate::eq(
            Column::new(ROOT, "type_id"),
            libsql::Value::Integer(type_id),
        ));
        if let Some(tenant) = self.store.tenant() {
            plan.filters.push(Predicate::eq(
                Column::new(ROOT, "tenant"),
                libsql::Value::Text(tenant.to_string()),
            ));
        }

        if let Some(connector) = &self.connector {
            if connector.targets().is_empty() {
                return Ok(None);
            }
            apply_connector(&mut plan, connector);
        }

        for (n, (field, condition)) in self.index_filters.iter().enumerate() {
            let descriptor = schema.field(field)?;
            let alias = format!("i{}", n);
            let value_column = Column::new(alias.as_str(), descriptor.kind().column());
            plan.filters.push(Predicate::Exists {
                table: "record_index",
                alias: alias.clone(),
                predicate: Box::new(Predicate::And(vec![
                    Predicate::ColumnsEqual(
                        Column::new(alias.as_str(), "record_id"),
                        Column::new(ROOT, "id"),
                    ),
                    Predicate::eq(
                        Column::new(alias.as_str(), "index_key"),
                        libsql::Value::Text(descriptor.index_key().to_string()),
                    ),
                    Predicate::eq(
                        Column::new(alias.as_str(), "field_name"),
                        libsql::Value::Text(descriptor.name().to_string()),
                    ),
                    condition_on(condition, |_| value_column.clone()),
                ])),
            });
        }

        for condition in &self.attribute_filters {
            let predicate = condition_on(condition, |kind| Column::new("l0", kind.column()));
            plan.filters.push(predicate);
        }

        apply_sorts(&mut plan, &schema, &self.sorts)?;
        if let Some(descending) = self.insertion_order {
            plan.order.push(OrderTerm {
                column: Column::new(ROOT, "id"),
                descending,
            });
        }

        Ok(Some(plan))
    }

    /// All matching records
    pub async fn get_list(mut self) -> Result<Vec<R>, RecordError> {
        let Some(plan) = self.compile().await? else {
            return Ok(Vec::new());
        };
        self.fetch(plan).await
    }

    /// The first matching record
    pub async fn get_first(self) -> Result<Option<R>, RecordError> {
        Ok(self.max_results(1).get_list().await?.into_iter().next())
    }

    /// Number of matching records; paging is ignored
    pub async fn count(mut self) -> Result<u64, RecordError> {
        let Some(plan) = self.compile().await? else {
            return Ok(0);
        };
        let (sql, params) = plan.render(Projection::Count);
        let mut rows = self.store.session().query(&sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(u64::try_from(row.get::<i64>(0)?).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// The record with `id`, if it also satisfies this query
    pub async fn find(mut self, id: RecordId) -> Result<Option<R>, RecordError> {
        let Some(mut plan) = self.compile().await? else {
            return Ok(None);
        };
        plan.filters.push(Predicate::eq(
            Column::new(ROOT, "id"),
            libsql::Value::Integer(id.get()),
        ));
        plan.limit = Some(1);
        plan.offset = None;
        Ok(self.fetch(plan).await?.into_iter().next())
    }

    async fn fetch(&self, plan: SelectPlan) -> Result<Vec<R>, RecordError> {
        let (sql, params) = plan.render(Projection::Records);
        tracing::trace!(
            "Executing {} query (in transaction: {}): {}",
            R::SCHEMA_ID,
            self.store.session().is_active(),
            sql
        );

        let mut rows = self.store.session().query(&sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let id = RecordId(row.get::<i64>(0)?);
            let payload = row.get::<String>(1)?;
            let blob = row.get::<Option<Vec<u8>>>(2)?;
            records.push(self.store.hydrate(id, &payload, blob)?);
        }
        Ok(records)
    }
}

/// Join the connector's table and constrain it to the targets
fn apply_connector(plan: &mut SelectPlan, connector: &Connector) {
    let targets = connector.targets();
    // A record reached through several hops would otherwise repeat
    let transitive =
        matches!(connector, Connector::Path { direction, .. } if !direction.direct_only());
    plan.distinct = transitive || (connector.is_any() && targets.len() > 1);

    let (table, prefix, selected, source, direct) = match connector {
        Connector::Link { .. } => ("record_link", "l", "reference_id", "target_id", false),
        Connector::Path { direction, .. } => (
            "record_path",
            "p",
            direction.selected_column(),
            direction.source_column(),
            direction.direct_only(),
        ),
    };
    let direct_edge = |alias: &str| {
        Predicate::ColumnsEqual(
            Column::new(alias, "ancestor_id"),
            Column::new(alias, "hop_parent_id"),
        )
    };

    let anchor = format!("{}0", prefix);
    plan.joins.push(Join {
        kind: JoinKind::Inner,
        table,
        alias: anchor.clone(),
        on: Predicate::ColumnsEqual(
            Column::new(anchor.as_str(), selected),
            Column::new(ROOT, "id"),
        ),
    });
    if direct {
        plan.filters.push(direct_edge(&anchor));
    }

    if connector.is_any() {
        plan.filters.push(Predicate::In {
            column: Column::new(anchor.as_str(), source),
            values: targets.iter().map(|t| libsql::Value::Integer(t.get())).collect(),
        });
        return;
    }

    plan.filters.push(Predicate::eq(
        Column::new(anchor.as_str(), source),
        libsql::Value::Integer(targets[0].get()),
    ));
    for (n, target) in targets.iter().enumerate().skip(1) {
        let alias = format!("{}{}", prefix, n);
        let mut on = vec![
            Predicate::ColumnsEqual(
                Column::new(alias.as_str(), selected),
                Column::new(anchor.as_str(), selected),
            ),
            Predicate::eq(
                Column::new(alias.as_str(), source),
                libsql::Value::Integer(target.get()),
            ),
        ];
        if direct {
            on.push(direct_edge(&alias));
        }
        plan.joins.push(Join {
            kind: JoinKind::Inner,
            table,
            alias,
            on: Predicate::And(on),
        });
    }
}

fn apply_sorts<R>(
    plan: &mut SelectPlan,
    schema: &Schema<R>,
    sorts: &[SortKey],
) -> Result<(), RecordError> {
    for (n, sort) in sorts.iter().enumerate() {
        match sort {
            SortKey::IndexedField { field, descending } => {
                let descriptor = schema.field(field)?;
                let alias = format!("s{}", n);
                plan.joins.push(Join {
                    kind: JoinKind::Left,
                    table: "record_index",
                    alias: alias.clone(),
                    on: Predicate::And(vec![
                        Predicate::ColumnsEqual(
                            Column::new(alias.as_str(), "record_id"),
                            Column::new(ROOT, "id"),
                        ),
                        Predicate::eq(
                            Column::new(alias.as_str(), "index_key"),
                            libsql::Value::Text(descriptor.index_key().to_string()),
                        ),
                        Predicate::eq(
                            Column::new(alias.as_str(), "field_name"),
                            libsql::Value::Text(descriptor.name().to_string()),
                        ),
                    ]),
                });
                plan.order.push(OrderTerm {
                    column: Column::new(alias, descriptor.kind().column()),
                    descending: *descending,
                });
            }
            SortKey::Attribute { descending } => {
                for kind in [ValueKind::Text, ValueKind::Numeric, ValueKind::Timestamp] {
                    plan.order.push(OrderTerm {
                        column: Column::new("l0", kind.column()),
                        descending: *descending,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Render a condition; `column_for` picks the column for each value's kind
fn condition_on(condition: &Condition, column_for: impl Fn(ValueKind) -> Column) -> Predicate {
    let text_column = || column_for(ValueKind::Text);
    match condition {
        Condition::Compare(op, value) => Predicate::Compare {
            column: column_for(value.kind()),
            op: *op,
            value: value.to_sql(),
        },
        Condition::In(values) => any_equal(values, &column_for),
        Condition::NotIn(values) => Predicate::Not(Box::new(any_equal(values, &column_for))),
        Condition::Like(patterns) => Predicate::Or(
            patterns
                .iter()
                .map(|pattern| Predicate::Like {
                    column: text_column(),
                    pattern: pattern.clone(),
                })
                .collect(),
        ),
        Condition::NotLike(patterns) => Predicate::Not(Box::new(Predicate::Or(
            patterns
                .iter()
                .map(|pattern| Predicate::Like {
                    column: text_column(),
                    pattern: pattern.clone(),
                })
                .collect(),
        ))),
    }
}

/// `column IN (...)` per value kind, OR-ed together
fn any_equal(values: &[Value], column_for: &impl Fn(ValueKind) -> Column) -> Predicate {
    let mut groups: Vec<Predicate> = Vec::new();
    for kind in [ValueKind::Text, ValueKind::Numeric, ValueKind::Timestamp] {
        let members: Vec<libsql::Value> = values
            .iter()
            .filter(|v| v.kind() == kind)
            .map(Value::to_sql)
            .collect();
        if !members.is_empty() {
            groups.push(Predicate::In {
                column: column_for(kind),
                values: members,
            });
        }
    }
    match groups.len() {
        1 => groups.remove(0),
        _ => Predicate::Or(groups),
    }
}
